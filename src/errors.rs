/// Error taxonomy for credential resolution and storage.
///
/// The enum is `Clone` so a failed singleflight cell can hand the same error
/// to every waiter; io/serde causes therefore carry their rendered message
/// instead of the source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid credential override: {0}")]
    OverrideParse(String),
    #[error("override for tool '{tool}' references unset environment variable '{var}'")]
    OverrideEnvMissing { tool: String, var: String },
    #[error("credential backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("credential store corrupt: {0}")]
    StoreCorrupt(String),
    #[error("credential helper protocol error: {0}")]
    HelperProtocol(String),
    #[error("credential tool '{tool}' failed: {reason}")]
    ProviderExecutionFailed { tool: String, reason: String },
    #[error("credential tool '{tool}' printed invalid output: {reason}")]
    ProviderOutputInvalid { tool: String, reason: String },
    #[error("credential not found for context '{context}', tool '{tool}'")]
    NotFound { context: String, tool: String },
    #[error("credential resolution cancelled")]
    Cancelled,
    #[error("invalid context name: {0}")]
    InvalidContext(String),
    #[error("io error: {0}")]
    Io(String),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

impl From<std::io::Error> for CredentialError {
    fn from(err: std::io::Error) -> Self {
        CredentialError::Io(err.to_string())
    }
}

impl CredentialError {
    /// Soft errors are expected outcomes (an absent record), not failures of
    /// the subsystem itself.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CredentialError::NotFound { .. })
    }
}
