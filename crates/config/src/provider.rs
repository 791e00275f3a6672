use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;

const REDACTED: &str = "<redacted>";

/// Which adapter a provider uses, and where it is rooted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
#[non_exhaustive]
pub enum BackendConfig {
    Filesystem { root: PathBuf },
}

/// Everything needed to build one provider from scratch.
///
/// Flat and serializable so it can travel inside a job payload. Credential
/// values never appear in [`Debug`] output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self { backend, credentials: BTreeMap::new(), settings: BTreeMap::new() }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::new(BackendConfig::Filesystem { root: root.into() })
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Short backend name, as written in configuration files.
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            BackendConfig::Filesystem { .. } => "filesystem",
        }
    }
}

impl Debug for ProviderConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let credentials: BTreeMap<&str, &str> = self.credentials.keys().map(|key| (key.as_str(), REDACTED)).collect();
        f.debug_struct("ProviderConfig")
            .field("backend", &self.backend)
            .field("credentials", &credentials)
            .field("settings", &self.settings)
            .finish()
    }
}
