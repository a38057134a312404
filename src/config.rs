use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{CredentialError, CredentialResult};

pub const DEFAULT_CONTEXT: &str = "default";
pub const FILE_BACKEND: &str = "file";

/// Ambient configuration read once at startup and threaded explicitly into
/// the pieces that need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: u32,
    /// Backend selector: `"file"` or the name of an external
    /// secure-storage helper (`toolvault-credential-<name>` on PATH).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds_store: Option<String>,
    /// Default credential context when the caller does not pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            creds_store: None,
            context: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> CredentialResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|err| {
            CredentialError::StoreCorrupt(format!("{}: {}", path.display(), err))
        })
    }

    pub fn save(&self, path: &Path) -> CredentialResult<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| CredentialError::Io(err.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perm = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perm)?;
        }
        Ok(())
    }

    pub fn creds_store(&self) -> &str {
        self.creds_store.as_deref().unwrap_or(FILE_BACKEND)
    }

    pub fn context(&self) -> &str {
        self.context.as_deref().unwrap_or(DEFAULT_CONTEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.creds_store(), FILE_BACKEND);
        assert_eq!(cfg.context(), DEFAULT_CONTEXT);
    }

    #[test]
    fn round_trips_creds_store_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Config {
            creds_store: Some("osxkeychain".to_string()),
            context: Some("work".to_string()),
            ..Config::default()
        };
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.creds_store(), "osxkeychain");
        assert_eq!(loaded.context(), "work");
    }

    #[test]
    fn unparsable_config_is_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, CredentialError::StoreCorrupt(_)));
    }
}
