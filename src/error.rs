//! Error kinds for the question-answering pipeline.
//!
//! Only [`ConfigurationError`] is allowed to terminate the process. Every
//! other kind is caught at its stage boundary by the orchestrator and
//! converted into a user-visible partial result, so a failed chart never
//! blocks a summary and a failed summary never blocks follow-ups.

use thiserror::Error;

/// Fatal startup error: no usable credential/key configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source supplied a credential blob that is not valid JSON (or not a
    /// valid service-account key). This is terminal by design: a malformed
    /// credential must never silently fall through to a weaker source.
    #[error("invalid credential JSON from source '{source_name}': {detail}")]
    InvalidCredentialJson { source_name: String, detail: String },

    /// Every source was consulted and none produced a warehouse credential.
    #[error("no warehouse credential found (checked {sources_checked} sources); set GOOGLE_APPLICATION_CREDENTIALS_JSON or GOOGLE_APPLICATION_CREDENTIALS")]
    MissingWarehouseCredential { sources_checked: usize },

    /// Every source was consulted and none produced a model API key.
    #[error("no model API key found (checked {sources_checked} sources); set GEMINI_API_KEY")]
    MissingModelKey { sources_checked: usize },

    /// The warehouse project id is neither configured nor present in the
    /// service-account key.
    #[error("warehouse project id is not configured and the credential carries none")]
    MissingProjectId,

    /// Persisting an inline credential to its temp file failed.
    #[error("failed to persist credential to a temp file: {0}")]
    CredentialFile(#[from] std::io::Error),
}

impl ConfigurationError {
    /// Stable machine-readable reason code, independent of message wording.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentialJson { .. } => "invalid_credential_json",
            Self::MissingWarehouseCredential { .. } => "missing_warehouse_credential",
            Self::MissingModelKey { .. } => "missing_model_key",
            Self::MissingProjectId => "missing_project_id",
            Self::CredentialFile(_) => "credential_file",
        }
    }
}

/// A corpus bootstrap failure. Per-entry and non-fatal: one failing entry is
/// reported but already-inserted entries stay (no transactionality).
#[derive(Debug, Error)]
#[error("corpus error for {entry}: {detail}")]
pub struct CorpusError {
    /// Short description of the entry involved (kind + content key).
    pub entry: String,
    pub detail: String,
}

/// The model service failed (transport, HTTP status, or undecodable reply).
///
/// Distinct from the model *declining* to produce SQL, which is the
/// `Option::None` outcome of generation, not an error.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected model response: {0}")]
    Decode(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
}

/// Generated SQL failed the read-only safety policy. Carries the rejected
/// statement so the UI can surface it verbatim; execution is withheld.
#[derive(Debug, Error)]
#[error("statement rejected by read-only policy: {sql}")]
pub struct ValidationRejection {
    pub sql: String,
}

/// The warehouse call failed. Carries the upstream message plus a heuristic
/// hint when the failure text looks connection-related.
#[derive(Debug)]
pub struct ExecutionError {
    pub message: String,
    pub hint: Option<&'static str>,
}

impl std::error::Error for ExecutionError {}

impl ExecutionError {
    /// Build from an upstream error message, attaching a connectivity hint
    /// when the text suggests the warehouse was never reached.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let hint = connectivity_hint(&message);
        Self { message, hint }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "warehouse execution failed: {}", self.message)?;
        if let Some(hint) = self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

/// Substring heuristic for connection-shaped failures. Best-effort operator
/// guidance, not a classification.
fn connectivity_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    const MARKERS: &[&str] = &[
        "connect",
        "connection",
        "dns",
        "timed out",
        "timeout",
        "network",
        "unreachable",
        "tls",
    ];
    if MARKERS.iter().any(|m| lower.contains(m)) {
        Some("check network access and warehouse credentials; the query may never have reached the warehouse")
    } else {
        None
    }
}

/// Chart-code generation or sandboxed execution failed. Always degrades to
/// "no chart"; never propagates past the visualization stage.
#[derive(Debug, Error)]
#[error("visualization failed: {0}")]
pub struct VisualizationError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credential_reason_code() {
        let err = ConfigurationError::InvalidCredentialJson {
            source_name: "env".to_string(),
            detail: "expected value at line 1".to_string(),
        };
        assert_eq!(err.reason(), "invalid_credential_json");
    }

    #[test]
    fn test_execution_error_connection_hint() {
        let err = ExecutionError::from_message("error sending request: connection refused");
        assert!(err.hint.is_some());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("hint:"));
    }

    #[test]
    fn test_execution_error_no_hint_for_sql_errors() {
        let err = ExecutionError::from_message("Syntax error: Unexpected keyword FORM at [1:8]");
        assert!(err.hint.is_none());
    }
}
