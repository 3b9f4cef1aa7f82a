//! Operation error kinds and the JSON result envelope.
//!
//! Every operation surfaced by the CLI resolves to a JSON object with a
//! top-level `status` field. Success payloads are produced by the operation
//! itself; failures are rendered through [`error_response`], which attaches
//! the error kind and a one-line remediation hint.

use serde_json::{json, Value};
use thiserror::Error;

use crate::api::ApiError;

/// Failure categories surfaced from every operation.
#[derive(Debug, Error)]
pub enum OpError {
    /// A required file or dataset is not present.
    #[error("{0}")]
    InputMissing(String),

    /// A file exists but fails its schema check.
    #[error("{0}")]
    InputMalformed(String),

    /// A credential for the selected provider is missing.
    #[error("{0}")]
    Config(String),

    /// Rate limit, overload, timeout, or transport failure; retryable.
    #[error("{0}")]
    ApiTransient(String),

    /// Auth failure, quota exhaustion, or a 4xx argument error.
    #[error("{0}")]
    ApiPermanent(String),

    /// The LLM returned an unparseable reply.
    #[error("{0}")]
    Parse(String),

    /// Index sidecars are unreadable or inconsistent; rebuild required.
    #[error("{0}")]
    IndexCorrupt(String),

    /// Index was built with a different model or dimension; rebuild required.
    #[error("{0}")]
    IndexIncompatible(String),

    /// The operation was cancelled by an external signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Anything that does not fit the categories above.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OpError {
    /// Stable machine-readable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            OpError::InputMissing(_) => "input_missing",
            OpError::InputMalformed(_) => "input_malformed",
            OpError::Config(_) => "config_error",
            OpError::ApiTransient(_) => "api_transient",
            OpError::ApiPermanent(_) => "api_permanent",
            OpError::Parse(_) => "parse_error",
            OpError::IndexCorrupt(_) => "index_corrupt",
            OpError::IndexIncompatible(_) => "index_incompatible",
            OpError::Cancelled => "cancelled",
            OpError::Other(_) => "internal",
        }
    }

    /// One-line remediation hint shown next to the message.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            OpError::InputMissing(_) => Some("run `ilens fetch` to ingest the issue dataset first"),
            OpError::InputMalformed(_) => Some("regenerate the file; partial edits are not supported"),
            OpError::Config(_) => Some("export the named environment variable and retry"),
            OpError::ApiTransient(_) => Some("wait a moment and retry the operation"),
            OpError::ApiPermanent(_) => Some("check the provider account and request parameters"),
            OpError::Parse(_) => None,
            OpError::IndexCorrupt(_) | OpError::IndexIncompatible(_) => {
                Some("run `ilens index build` to rebuild the vector index")
            }
            OpError::Cancelled => None,
            OpError::Other(_) => None,
        }
    }
}

impl From<ApiError> for OpError {
    fn from(err: ApiError) -> Self {
        let msg = err.to_string();
        match err {
            ApiError::MissingKey { .. } => OpError::Config(msg),
            ApiError::Auth { .. } | ApiError::Quota { .. } | ApiError::InvalidArgument { .. } => {
                OpError::ApiPermanent(msg)
            }
            ApiError::RateLimit { .. }
            | ApiError::Overloaded { .. }
            | ApiError::Server { .. }
            | ApiError::Timeout { .. }
            | ApiError::Transport { .. } => OpError::ApiTransient(msg),
        }
    }
}

/// Render a failed operation as the standard JSON envelope.
pub fn error_response(err: &OpError) -> Value {
    let mut obj = json!({
        "status": "error",
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let Some(hint) = err.suggestion() {
        obj["suggestion"] = Value::String(hint.to_string());
    }
    obj
}
