use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::errors::{CredentialError, CredentialResult};
use crate::overrides::OverrideSet;
use crate::provider::ProviderRunner;
use crate::store::{ContextStore, EnvMap};

/// Where a tool definition came from. Credentials for tools loaded from
/// local files are never persisted; every new run re-invokes their
/// providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolProvenance {
    Registry,
    Local,
}

enum CellState {
    Pending,
    Ready(EnvMap),
    Failed(CredentialError),
}

/// Awaitable singleflight cell: one leader resolves, waiters block on the
/// condvar and observe the leader's result, success or failure alike.
struct CacheCell {
    state: Mutex<CellState>,
    ready: Condvar,
}

impl CacheCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: &CredentialResult<EnvMap>) {
        let mut state = self.state.lock().unwrap();
        *state = match result {
            Ok(env) => CellState::Ready(env.clone()),
            Err(err) => CellState::Failed(err.clone()),
        };
        self.ready.notify_all();
    }

    fn wait(&self) -> CredentialResult<EnvMap> {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                CellState::Pending => state = self.ready.wait(state).unwrap(),
                CellState::Ready(env) => return Ok(env.clone()),
                CellState::Failed(err) => return Err(err.clone()),
            }
        }
    }
}

type CacheKey = (String, String);

/// Orchestrates credential resolution with the precedence
/// override -> cache -> persisted store -> provider subprocess, with
/// singleflight per `(context, toolName)`. One manager per run; the cache
/// (including failed entries) lives for its lifetime.
pub struct CredentialManager {
    store: ContextStore,
    overrides: OverrideSet,
    runner: ProviderRunner,
    cancel: CancelToken,
    cache: Mutex<HashMap<CacheKey, Arc<CacheCell>>>,
}

impl CredentialManager {
    pub fn new(
        store: ContextStore,
        overrides: OverrideSet,
        runner: ProviderRunner,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            overrides,
            runner,
            cancel,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Resolve the environment mapping for one tool. An active override
    /// returns immediately and never touches cache, store, or providers.
    pub fn resolve(
        &self,
        context: &str,
        tool_name: &str,
        providers: &[String],
        provenance: ToolProvenance,
    ) -> CredentialResult<EnvMap> {
        if let Some(env) = self.overrides.resolve(tool_name)? {
            return Ok(env);
        }

        let (cell, leader) = {
            let mut cache = self.cache.lock().unwrap();
            match cache.entry((context.to_string(), tool_name.to_string())) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => (entry.insert(Arc::new(CacheCell::new())).clone(), true),
            }
        };
        if !leader {
            return cell.wait();
        }

        let result = self.resolve_uncached(context, tool_name, providers, provenance);
        cell.complete(&result);
        result
    }

    fn resolve_uncached(
        &self,
        context: &str,
        tool_name: &str,
        providers: &[String],
        provenance: ToolProvenance,
    ) -> CredentialResult<EnvMap> {
        if let Some(record) = self.store.get(context, tool_name)? {
            return Ok(record.env);
        }

        let env = self.runner.run_all(providers, &self.cancel)?;
        if self.cancel.is_cancelled() {
            return Err(CredentialError::Cancelled);
        }
        // Tools from local files never leave a persisted record; a tool with
        // no providers has nothing worth persisting either.
        if provenance == ToolProvenance::Registry && !providers.is_empty() {
            self.store.set(context, tool_name, env.clone())?;
        }
        Ok(env)
    }
}
