use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::cancel::{CancelToken, ChildSlot};
use crate::errors::{CredentialError, CredentialResult};
use crate::store::EnvMap;

/// Captured result of one subprocess run.
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Subprocess executor collaborator: given a command and extra environment,
/// run it and capture stdout/stderr and exit status. Abstracted so tests can
/// substitute canned outputs.
pub trait ToolExecutor: Send + Sync {
    fn execute(
        &self,
        command: &str,
        env: &EnvMap,
        cancel: &CancelToken,
    ) -> CredentialResult<ExecOutput>;
}

/// Runs the command directly via `std::process::Command`. The child is
/// registered with the cancel token so a run-level cancel kills it.
pub struct CommandExecutor;

impl ToolExecutor for CommandExecutor {
    fn execute(
        &self,
        command: &str,
        env: &EnvMap,
        cancel: &CancelToken,
    ) -> CredentialResult<ExecOutput> {
        let mut child = Command::new(command)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| CredentialError::ProviderExecutionFailed {
                tool: command.to_string(),
                reason: err.to_string(),
            })?;

        let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
            CredentialError::ProviderExecutionFailed {
                tool: command.to_string(),
                reason: "stdout unavailable".to_string(),
            }
        })?;
        let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
            CredentialError::ProviderExecutionFailed {
                tool: command.to_string(),
                reason: "stderr unavailable".to_string(),
            }
        })?;

        let slot: ChildSlot = Arc::new(Mutex::new(Some(child)));
        cancel.register(&slot)?;

        // Drain stderr on its own thread so a chatty provider can't fill the
        // pipe and deadlock against our stdout read.
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });
        let mut stdout = String::new();
        let _ = stdout_pipe.read_to_string(&mut stdout);
        let stderr = stderr_reader.join().unwrap_or_default();

        // Poll for exit instead of a blocking wait: the slot lock must stay
        // available so cancel() can take the child and kill it even when the
        // provider closed its pipes but kept running.
        let status = loop {
            let mut guard = slot.lock().unwrap();
            match guard.as_mut() {
                Some(child) => {
                    if let Some(status) = child.try_wait()? {
                        guard.take();
                        break status;
                    }
                }
                // cancel() reaped the child while we were waiting.
                None => return Err(CredentialError::Cancelled),
            }
            drop(guard);
            std::thread::sleep(std::time::Duration::from_millis(10));
        };
        if cancel.is_cancelled() {
            return Err(CredentialError::Cancelled);
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            success: status.success(),
        })
    }
}

/// Stdout contract for provider tools: exactly one JSON object of the shape
/// `{"env": {KEY: VALUE, ...}}` with string values. Anything else is
/// rejected wholesale, never partially parsed.
fn parse_provider_output(tool: &str, stdout: &str) -> CredentialResult<EnvMap> {
    let invalid = |reason: &str| CredentialError::ProviderOutputInvalid {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };

    let value: Value = serde_json::from_str(stdout.trim())
        .map_err(|err| invalid(&format!("unparsable JSON: {}", err)))?;
    let Value::Object(map) = value else {
        return Err(invalid("output is not a JSON object"));
    };
    if map.len() != 1 || !map.contains_key("env") {
        return Err(invalid("expected exactly one top-level key, 'env'"));
    }
    let Some(Value::Object(env_obj)) = map.get("env") else {
        return Err(invalid("'env' is not an object"));
    };

    let mut env = EnvMap::new();
    for (key, value) in env_obj {
        let Value::String(s) = value else {
            return Err(invalid(&format!("value for '{}' is not a string", key)));
        };
        env.insert(key.clone(), s.clone());
    }
    Ok(env)
}

/// Invokes provider tools and enforces their output contract.
#[derive(Clone)]
pub struct ProviderRunner {
    executor: Arc<dyn ToolExecutor>,
}

impl ProviderRunner {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }

    pub fn with_command_executor() -> Self {
        Self::new(Arc::new(CommandExecutor))
    }

    /// Run one provider tool; no arguments are passed to it.
    pub fn run(&self, provider: &str, cancel: &CancelToken) -> CredentialResult<EnvMap> {
        let output = self.executor.execute(provider, &EnvMap::new(), cancel)?;
        if !output.success {
            let stderr = output.stderr.trim();
            return Err(CredentialError::ProviderExecutionFailed {
                tool: provider.to_string(),
                reason: if stderr.is_empty() {
                    "non-zero exit status".to_string()
                } else {
                    stderr.to_string()
                },
            });
        }
        parse_provider_output(provider, &output.stdout)
    }

    /// Run every provider in declared order, merging outputs with later
    /// providers' keys overwriting earlier ones on collision.
    pub fn run_all(&self, providers: &[String], cancel: &CancelToken) -> CredentialResult<EnvMap> {
        let mut merged = EnvMap::new();
        for provider in providers {
            let env = self.run(provider, cancel)?;
            merged.extend(env);
        }
        Ok(merged)
    }
}
