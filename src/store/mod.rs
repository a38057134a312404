mod file;
mod helper;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{CredentialError, CredentialResult};
use crate::paths::CredentialPaths;

pub use file::FileBackend;
pub use helper::{helper_program_name, HelperBackend, HelperLocator, PathLocator};

/// Environment mapping a resolved credential contributes to a tool.
pub type EnvMap = HashMap<String, String>;

/// One persisted credential: `(context, toolName) -> env`, unique per
/// backend. No expiry; reused until deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub context: String,
    pub tool_name: String,
    pub env: EnvMap,
    #[serde(default)]
    pub created_at_ms: i64,
}

impl CredentialRecord {
    pub fn new(context: &str, tool_name: &str, env: EnvMap) -> Self {
        Self {
            context: context.to_string(),
            tool_name: tool_name.to_string(),
            env,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Names (not values) of the environment variables this record sets,
    /// sorted for stable listing output.
    pub fn env_var_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Pluggable persistence for credential records.
///
/// `delete` on an absent key reports `NotFound` as a soft error; `get` uses
/// `Option` because an absent record is the expected miss that drives
/// fallthrough to provider invocation.
pub trait CredentialBackend: Send + Sync {
    fn get(&self, context: &str, tool_name: &str) -> CredentialResult<Option<CredentialRecord>>;
    fn set(&self, record: &CredentialRecord) -> CredentialResult<()>;
    fn delete(&self, context: &str, tool_name: &str) -> CredentialResult<()>;
    /// `None` lists every context.
    fn list(&self, context: Option<&str>) -> CredentialResult<Vec<CredentialRecord>>;
}

/// Namespacing layer over a backend. Validates context names and holds no
/// state of its own.
#[derive(Clone)]
pub struct ContextStore {
    backend: Arc<dyn CredentialBackend>,
}

fn validate_context(context: &str) -> CredentialResult<()> {
    if context.trim().is_empty() {
        return Err(CredentialError::InvalidContext(
            "context name must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl ContextStore {
    pub fn new(backend: Arc<dyn CredentialBackend>) -> Self {
        Self { backend }
    }

    pub fn get(&self, context: &str, tool_name: &str) -> CredentialResult<Option<CredentialRecord>> {
        validate_context(context)?;
        self.backend.get(context, tool_name)
    }

    pub fn set(&self, context: &str, tool_name: &str, env: EnvMap) -> CredentialResult<()> {
        validate_context(context)?;
        self.backend
            .set(&CredentialRecord::new(context, tool_name, env))
    }

    pub fn delete(&self, context: &str, tool_name: &str) -> CredentialResult<()> {
        validate_context(context)?;
        self.backend.delete(context, tool_name)
    }

    pub fn list(&self, context: &str) -> CredentialResult<Vec<CredentialRecord>> {
        validate_context(context)?;
        self.backend.list(Some(context))
    }

    pub fn list_all(&self) -> CredentialResult<Vec<CredentialRecord>> {
        self.backend.list(None)
    }
}

type BackendCtor =
    Box<dyn Fn(&CredentialPaths) -> CredentialResult<Arc<dyn CredentialBackend>> + Send + Sync>;

/// Maps a `credsStore` name to a backend constructor, resolved once at
/// startup. Names without a registered constructor become external
/// secure-storage helpers of that name.
pub struct BackendRegistry {
    ctors: HashMap<String, BackendCtor>,
}

impl BackendRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };
        registry.register(crate::config::FILE_BACKEND, |paths| {
            Ok(Arc::new(FileBackend::new(paths.credentials_path())) as Arc<dyn CredentialBackend>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&CredentialPaths) -> CredentialResult<Arc<dyn CredentialBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(name.to_string(), Box::new(ctor));
    }

    pub fn open(
        &self,
        name: &str,
        paths: &CredentialPaths,
    ) -> CredentialResult<Arc<dyn CredentialBackend>> {
        if let Some(ctor) = self.ctors.get(name) {
            return ctor(paths);
        }
        Ok(Arc::new(HelperBackend::new(name, Arc::new(PathLocator))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_store_rejects_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(Arc::new(FileBackend::new(dir.path().join("creds.json"))));
        let err = store.get("", "tool").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidContext(_)));
        let err = store.get("   ", "tool").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidContext(_)));
    }

    #[test]
    fn registry_opens_file_backend_by_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths {
            root_dir: dir.path().to_path_buf(),
        };
        let backend = BackendRegistry::builtin()
            .open(crate::config::FILE_BACKEND, &paths)
            .unwrap();
        let store = ContextStore::new(backend);
        store
            .set("default", "tool", EnvMap::from([("K".into(), "v".into())]))
            .unwrap();
        let rec = store.get("default", "tool").unwrap().unwrap();
        assert_eq!(rec.env.get("K").map(String::as_str), Some("v"));
    }

    #[test]
    fn registry_falls_back_to_helper_for_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths {
            root_dir: dir.path().to_path_buf(),
        };
        // The backend constructs; actual use fails only when the helper
        // executable is absent from PATH.
        let backend = BackendRegistry::builtin()
            .open("no-such-store", &paths)
            .unwrap();
        let err = backend.get("default", "tool").unwrap_err();
        assert!(matches!(err, CredentialError::BackendUnavailable(_)));
    }

    #[test]
    fn env_var_names_are_sorted() {
        let rec = CredentialRecord::new(
            "default",
            "tool",
            EnvMap::from([
                ("ZED".to_string(), "1".to_string()),
                ("ALPHA".to_string(), "2".to_string()),
            ]),
        );
        assert_eq!(rec.env_var_names(), vec!["ALPHA", "ZED"]);
    }
}
