use std::path::PathBuf;

/// Best-effort home directory resolution.
///
/// We prefer `dirs::home_dir()`, but that can return `None` in some
/// service/test environments. In those cases, fall back to common
/// environment variables.
pub fn user_home_dir() -> Option<PathBuf> {
    dirs::home_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
}

fn env_root_override() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("TOOLVAULT_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

/// Return the base `.toolvault` directory.
///
/// `TOOLVAULT_DIR` overrides the location so tests and parallel runs can use
/// isolated temp dirs. If the user's home directory can't be resolved, we
/// fall back to an absolute temp directory to avoid writing into the current
/// working directory.
pub fn toolvault_root_dir() -> PathBuf {
    if let Some(root) = env_root_override() {
        return root;
    }
    if let Some(home) = user_home_dir() {
        home.join(".toolvault")
    } else {
        std::env::temp_dir().join("toolvault-no-home")
    }
}

/// Fixed file locations under the root directory.
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub root_dir: PathBuf,
}

impl CredentialPaths {
    pub fn discover() -> Self {
        Self {
            root_dir: toolvault_root_dir(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root_dir.join("config.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.root_dir.join("credentials.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScopedEnvVar, ENV_LOCK};

    #[test]
    fn env_override_wins_over_home() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _dir = ScopedEnvVar::set("TOOLVAULT_DIR", "/tmp/tv-test-root");
        let paths = CredentialPaths::discover();
        assert_eq!(paths.root_dir, PathBuf::from("/tmp/tv-test-root"));
        assert_eq!(
            paths.config_path(),
            PathBuf::from("/tmp/tv-test-root/config.json")
        );
    }

    #[test]
    fn blank_env_override_falls_back() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _dir = ScopedEnvVar::set("TOOLVAULT_DIR", "  ");
        let root = toolvault_root_dir();
        assert_ne!(root, PathBuf::from("  "));
    }
}
