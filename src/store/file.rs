use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{CredentialBackend, CredentialRecord};
use crate::errors::{CredentialError, CredentialResult};

/// On-disk document: one JSON object mapping context -> toolName -> record.
///
/// BTreeMap keeps the serialized document stable across rewrites, which makes
/// diffs of `credentials.json` readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileStoreData {
    version: u32,
    #[serde(default)]
    contexts: BTreeMap<String, BTreeMap<String, CredentialRecord>>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            contexts: BTreeMap::new(),
        }
    }
}

/// Credential persistence in a single local JSON document.
///
/// The mutex serializes read-modify-write cycles so concurrent `set`s within
/// one process don't lose updates; the temp-file + rename keeps crashed
/// writes from truncating the document.
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> CredentialResult<FileStoreData> {
        if !self.path.exists() {
            return Ok(FileStoreData::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|err| {
            CredentialError::StoreCorrupt(format!("{}: {}", self.path.display(), err))
        })
    }

    fn save(&self, data: &FileStoreData) -> CredentialResult<()> {
        let raw = serde_json::to_string_pretty(data)
            .map_err(|err| CredentialError::Io(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_extension(format!("json.tmp-{}", std::process::id()));
        std::fs::write(&tmp, raw)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perm = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp, perm)?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialBackend for FileBackend {
    fn get(&self, context: &str, tool_name: &str) -> CredentialResult<Option<CredentialRecord>> {
        let data = self.load()?;
        Ok(data
            .contexts
            .get(context)
            .and_then(|tools| tools.get(tool_name))
            .cloned())
    }

    fn set(&self, record: &CredentialRecord) -> CredentialResult<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load()?;
        data.contexts
            .entry(record.context.clone())
            .or_default()
            .insert(record.tool_name.clone(), record.clone());
        self.save(&data)
    }

    fn delete(&self, context: &str, tool_name: &str) -> CredentialResult<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load()?;
        let removed = data
            .contexts
            .get_mut(context)
            .and_then(|tools| tools.remove(tool_name));
        if removed.is_none() {
            return Err(CredentialError::NotFound {
                context: context.to_string(),
                tool: tool_name.to_string(),
            });
        }
        if data
            .contexts
            .get(context)
            .is_some_and(|tools| tools.is_empty())
        {
            data.contexts.remove(context);
        }
        self.save(&data)
    }

    fn list(&self, context: Option<&str>) -> CredentialResult<Vec<CredentialRecord>> {
        let data = self.load()?;
        let mut records = Vec::new();
        for (ctx, tools) in &data.contexts {
            if context.is_some_and(|wanted| wanted != ctx) {
                continue;
            }
            records.extend(tools.values().cloned());
        }
        Ok(records)
    }
}
