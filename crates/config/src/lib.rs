//! Layered configuration for wharf.
//!
//! Values are merged from compiled defaults, then a configuration file, then
//! `WHARF_`-prefixed environment variables (`__` separates nesting levels, so
//! `WHARF_TRANSFER__CONCURRENCY=8` sets `transfer.concurrency`).

pub mod error;
mod provider;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use crate::provider::{BackendConfig, ProviderConfig};

pub const ENV_PREFIX: &str = "WHARF_";
pub const CONFIG_FILE_NAME: &str = "wharf.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub transfer: TransferConfig,
    pub jobs: JobConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Children of one folder transferred at once.
    pub concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { max_attempts: 3, retry_backoff_ms: 500 }
    }
}

impl Config {
    /// Load configuration from `path`, or from the platform configuration
    /// directory when no path is given and a `wharf.toml` exists there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::Load(path.display().to_string())),
            Some(path) => Some(path.to_path_buf()),
            None => default_path().filter(|path| path.is_file()),
        };
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            figment = merge_file(figment, file)?;
        }
        let source = match &file {
            Some(file) => file.display().to_string(),
            None => "environment".to_string(),
        };
        let config: Self =
            figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load(source.clone()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        match self.providers.get(name) {
            Some(provider) => Ok(provider),
            None => exn::bail!(ErrorKind::UnknownProvider(name.to_string())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("transfer.concurrency must be at least 1".to_string()));
        }
        if self.jobs.max_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("jobs.max_attempts must be at least 1".to_string()));
        }
        for (name, provider) in &self.providers {
            match &provider.backend {
                BackendConfig::Filesystem { root } if !root.is_absolute() => {
                    exn::bail!(ErrorKind::Invalid(format!("providers.{name}.root must be absolute")));
                },
                BackendConfig::Filesystem { .. } => {},
            }
        }
        Ok(())
    }
}

/// Location of `wharf.toml` in the platform configuration directory.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "wharf").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn merge_file(figment: Figment, file: &Path) -> Result<Figment> {
    Ok(match file.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => figment.merge(Toml::file(file)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
        Some("json") => figment.merge(Json::file(file)),
        _ => exn::bail!(ErrorKind::Load(file.display().to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    const TOML: &str = r#"
        [providers.local]
        backend = "filesystem"
        root = "/srv/data"

        [providers.local.credentials]
        token = "secret"

        [transfer]
        concurrency = 2
    "#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transfer.concurrency, 5);
        assert_eq!(config.jobs.max_attempts, 3);
        assert_eq!(config.jobs.retry_backoff_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("wharf.toml", TOML)?;
            let config = Config::load(Some(Path::new("wharf.toml"))).unwrap();
            let local = config.provider("local").unwrap();
            assert_eq!(local.backend, BackendConfig::Filesystem { root: PathBuf::from("/srv/data") });
            assert_eq!(local.credentials.get("token").map(String::as_str), Some("secret"));
            assert_eq!(config.transfer.concurrency, 2);
            assert_eq!(config.jobs, JobConfig::default());
            Ok(())
        });
    }

    #[rstest]
    #[case("wharf.yaml", "providers:\n  local:\n    backend: filesystem\n    root: /srv/data\n")]
    #[case("wharf.yml", "providers:\n  local:\n    backend: filesystem\n    root: /srv/data\n")]
    #[case("wharf.json", r#"{"providers": {"local": {"backend": "filesystem", "root": "/srv/data"}}}"#)]
    fn test_load_other_formats(#[case] name: &'static str, #[case] contents: &'static str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let config = Config::load(Some(Path::new(name))).unwrap();
            assert_eq!(config.provider("local").unwrap().backend_name(), "filesystem");
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("wharf.toml", TOML)?;
            jail.set_env("WHARF_TRANSFER__CONCURRENCY", "9");
            jail.set_env("WHARF_JOBS__MAX_ATTEMPTS", "1");
            let config = Config::load(Some(Path::new("wharf.toml"))).unwrap();
            assert_eq!(config.transfer.concurrency, 9);
            assert_eq!(config.jobs.max_attempts, 1);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_| {
            let err = Config::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load(_)));
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("wharf.ini", "")?;
            let err = Config::load(Some(Path::new("wharf.ini"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case("[transfer]\nconcurrency = 0\n")]
    #[case("[jobs]\nmax_attempts = 0\n")]
    #[case("[providers.local]\nbackend = \"filesystem\"\nroot = \"relative/dir\"\n")]
    fn test_invalid(#[case] contents: &'static str) {
        Jail::expect_with(|jail| {
            jail.create_file("wharf.toml", contents)?;
            let err = Config::load(Some(Path::new("wharf.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_provider() {
        let err = Config::default().provider("missing").unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownProvider("missing".to_string()));
    }
}
