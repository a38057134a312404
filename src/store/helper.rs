use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde_json::{json, Value};

use super::{CredentialBackend, CredentialRecord};
use crate::errors::{CredentialError, CredentialResult};

/// Name of the helper executable for a backend, including the platform
/// executable suffix (`.exe` on windows).
pub fn helper_program_name(backend: &str) -> String {
    format!(
        "toolvault-credential-{}{}",
        backend,
        std::env::consts::EXE_SUFFIX
    )
}

/// Finds helper executables. Abstracted so tests can point at a scripted
/// helper without touching the real search path.
pub trait HelperLocator: Send + Sync {
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Resolves helpers via the process `PATH`.
pub struct PathLocator;

impl HelperLocator for PathLocator {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        let path_var = std::env::var_os("PATH")?;
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

enum HelperResponse {
    Ok,
    NotFound,
    Payload(Value),
}

/// One line on stdout: a JSON payload, or the literal `ok` / `not-found`.
fn parse_response(stdout: &str) -> CredentialResult<HelperResponse> {
    let line = stdout.trim();
    match line {
        "ok" => Ok(HelperResponse::Ok),
        "not-found" => Ok(HelperResponse::NotFound),
        _ => {
            let value: Value = serde_json::from_str(line).map_err(|err| {
                CredentialError::HelperProtocol(format!("malformed helper response: {}", err))
            })?;
            Ok(HelperResponse::Payload(value))
        }
    }
}

/// Backend that delegates to an external secure-storage helper executable
/// speaking a line-oriented request/response protocol over stdin/stdout.
pub struct HelperBackend {
    backend_name: String,
    locator: Arc<dyn HelperLocator>,
}

impl HelperBackend {
    pub fn new(backend_name: &str, locator: Arc<dyn HelperLocator>) -> Self {
        Self {
            backend_name: backend_name.to_string(),
            locator,
        }
    }

    fn helper_path(&self) -> CredentialResult<PathBuf> {
        let program = helper_program_name(&self.backend_name);
        self.locator.locate(&program).ok_or_else(|| {
            CredentialError::BackendUnavailable(format!(
                "credential helper '{}' not found on PATH",
                program
            ))
        })
    }

    fn request(&self, op: &str, payload: &Value) -> CredentialResult<HelperResponse> {
        let path = self.helper_path()?;
        let mut child = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                CredentialError::BackendUnavailable(format!(
                    "failed to start credential helper '{}': {}",
                    path.display(),
                    err
                ))
            })?;

        // One request line, then close stdin so line-reading helpers see EOF.
        let write_result = match child.stdin.as_mut() {
            Some(stdin) => writeln!(stdin, "{} {}", op, payload),
            None => {
                return Err(CredentialError::HelperProtocol(
                    "helper stdin unavailable".to_string(),
                ))
            }
        };
        if let Err(err) = write_result {
            // Reap the helper; it went away without reading the request.
            let _ = child.wait_with_output();
            return Err(CredentialError::HelperProtocol(format!(
                "helper '{}' stopped reading the request: {}",
                self.backend_name, err
            )));
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::HelperProtocol(format!(
                "helper '{}' exited with {}: {}",
                self.backend_name,
                output.status,
                stderr.trim()
            )));
        }
        parse_response(&String::from_utf8_lossy(&output.stdout))
    }
}

impl CredentialBackend for HelperBackend {
    fn get(&self, context: &str, tool_name: &str) -> CredentialResult<Option<CredentialRecord>> {
        let payload = json!({ "context": context, "toolName": tool_name });
        match self.request("get", &payload)? {
            HelperResponse::NotFound => Ok(None),
            HelperResponse::Payload(value) => {
                let record: CredentialRecord = serde_json::from_value(value).map_err(|err| {
                    CredentialError::HelperProtocol(format!(
                        "helper returned malformed credential: {}",
                        err
                    ))
                })?;
                Ok(Some(record))
            }
            HelperResponse::Ok => Err(CredentialError::HelperProtocol(
                "helper answered 'ok' to a get request".to_string(),
            )),
        }
    }

    fn set(&self, record: &CredentialRecord) -> CredentialResult<()> {
        let payload = serde_json::to_value(record)
            .map_err(|err| CredentialError::Io(err.to_string()))?;
        match self.request("set", &payload)? {
            HelperResponse::Ok => Ok(()),
            _ => Err(CredentialError::HelperProtocol(
                "helper did not acknowledge set".to_string(),
            )),
        }
    }

    fn delete(&self, context: &str, tool_name: &str) -> CredentialResult<()> {
        let payload = json!({ "context": context, "toolName": tool_name });
        match self.request("delete", &payload)? {
            HelperResponse::Ok => Ok(()),
            HelperResponse::NotFound => Err(CredentialError::NotFound {
                context: context.to_string(),
                tool: tool_name.to_string(),
            }),
            HelperResponse::Payload(_) => Err(CredentialError::HelperProtocol(
                "helper returned a payload for delete".to_string(),
            )),
        }
    }

    fn list(&self, context: Option<&str>) -> CredentialResult<Vec<CredentialRecord>> {
        let payload = json!({ "context": context });
        match self.request("list", &payload)? {
            HelperResponse::Payload(value) => {
                serde_json::from_value(value).map_err(|err| {
                    CredentialError::HelperProtocol(format!(
                        "helper returned malformed credential list: {}",
                        err
                    ))
                })
            }
            HelperResponse::NotFound | HelperResponse::Ok => Err(
                CredentialError::HelperProtocol("helper did not return a list".to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLocator(Option<PathBuf>);

    impl HelperLocator for FixedLocator {
        fn locate(&self, _program: &str) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    #[test]
    fn program_name_follows_convention() {
        let name = helper_program_name("osxkeychain");
        assert!(name.starts_with("toolvault-credential-osxkeychain"));
        assert!(name.ends_with(std::env::consts::EXE_SUFFIX));
    }

    #[test]
    fn missing_helper_is_backend_unavailable() {
        let backend = HelperBackend::new("wincred", Arc::new(FixedLocator(None)));
        let err = backend.get("default", "tool").unwrap_err();
        assert!(matches!(err, CredentialError::BackendUnavailable(_)));
    }

    #[test]
    fn response_parsing_distinguishes_markers_and_payloads() {
        assert!(matches!(parse_response("ok\n"), Ok(HelperResponse::Ok)));
        assert!(matches!(
            parse_response("not-found\n"),
            Ok(HelperResponse::NotFound)
        ));
        assert!(matches!(
            parse_response("{\"context\":\"default\"}"),
            Ok(HelperResponse::Payload(_))
        ));
        assert!(matches!(
            parse_response("Segmentation fault"),
            Err(CredentialError::HelperProtocol(_))
        ));
    }

    #[cfg(unix)]
    fn scripted_helper(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(helper_program_name("scripted"));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn get_round_trips_through_a_scripted_helper() {
        let dir = tempfile::tempdir().unwrap();
        let script = scripted_helper(
            dir.path(),
            r#"read line
case "$line" in
  get*) echo '{"context":"default","toolName":"my-tool","env":{"X":"1"},"createdAtMs":7}' ;;
  *) echo 'not-found' ;;
esac"#,
        );
        let backend = HelperBackend::new("scripted", Arc::new(FixedLocator(Some(script))));
        let rec = backend.get("default", "my-tool").unwrap().unwrap();
        assert_eq!(rec.env.get("X").map(String::as_str), Some("1"));
        assert_eq!(rec.created_at_ms, 7);
    }

    #[cfg(unix)]
    #[test]
    fn not_found_marker_maps_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let script = scripted_helper(dir.path(), "read line\necho 'not-found'");
        let backend = HelperBackend::new("scripted", Arc::new(FixedLocator(Some(script))));
        assert!(backend.get("default", "absent").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = scripted_helper(
            dir.path(),
            "read line\necho 'keychain locked' >&2\nexit 1",
        );
        let backend = HelperBackend::new("scripted", Arc::new(FixedLocator(Some(script))));
        let err = backend.get("default", "tool").unwrap_err();
        match err {
            CredentialError::HelperProtocol(msg) => assert!(msg.contains("keychain locked")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn helper_that_stops_reading_is_a_protocol_error() {
        use crate::store::EnvMap;

        let dir = tempfile::tempdir().unwrap();
        let script = scripted_helper(dir.path(), "exec 0<&-\nsleep 1\necho ok");
        let backend = HelperBackend::new("scripted", Arc::new(FixedLocator(Some(script))));

        // Payload larger than any pipe buffer, so the request write cannot
        // complete before the helper closes its stdin.
        let record = CredentialRecord::new(
            "default",
            "tool",
            EnvMap::from([("K".to_string(), "x".repeat(1 << 22))]),
        );
        let err = backend.set(&record).unwrap_err();
        match err {
            CredentialError::HelperProtocol(msg) => {
                assert!(msg.contains("stopped reading"), "message was: {}", msg)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn garbage_response_is_a_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = scripted_helper(dir.path(), "read line\necho 'zzzzz'");
        let backend = HelperBackend::new("scripted", Arc::new(FixedLocator(Some(script))));
        let err = backend.get("default", "tool").unwrap_err();
        assert!(matches!(err, CredentialError::HelperProtocol(_)));
    }
}
