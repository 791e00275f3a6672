use std::sync::Arc;
use wharf_config::{BackendConfig, ProviderConfig};
use wharf_provider::ProviderHandle;
use wharf_provider::backend::FilesystemBackend;
use wharf_provider::error::{ErrorKind, Result};

/// Builds a fresh provider from its configuration. Called on every attempt,
/// so no connection outlives a failed one.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, name: &str, config: &ProviderConfig) -> Result<ProviderHandle>;
}

/// Builds the adapters that ship with wharf.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFactory;

impl ProviderFactory for DefaultFactory {
    fn build(&self, name: &str, config: &ProviderConfig) -> Result<ProviderHandle> {
        match &config.backend {
            BackendConfig::Filesystem { root } => Ok(Arc::new(FilesystemBackend::new(name, root)?)),
            _ => exn::bail!(ErrorKind::Unsupported("backend not built in")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wharf_provider::Provider;

    #[test]
    fn test_builds_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DefaultFactory.build("local", &ProviderConfig::filesystem(dir.path())).unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(provider.identity().backend, "filesystem");
    }

    #[test]
    fn test_relative_root_is_invalid() {
        let Err(err) = DefaultFactory.build("local", &ProviderConfig::filesystem("relative")) else {
            panic!("relative root accepted");
        };
        assert_eq!(err.code(), 400);
    }
}
