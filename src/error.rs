//! Error types for the translation bridge.

use thiserror::Error;

/// Unclassified backend messages are surfaced verbatim, but capped so a
/// multi-kilobyte HTML error page cannot end up in the UI.
const MAX_SURFACED_LEN: usize = 300;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    // Fatal: the user must reconfigure before anything can work
    #[error("Backend credentials missing: {message}")]
    Configuration { message: String },

    // Fatal for this session; the user can retry after fixing the device
    #[error("Audio device acquisition failed: {message}")]
    Acquisition { message: String },

    // Transient: retried with model fallback
    #[error("Backend rate limit: {message}")]
    Quota { message: String },

    // Transient: retried on the same model
    #[error("Transient backend fault: {message}")]
    TransientBackend { message: String },

    // Configuration adaptation: switch to the fallback model once
    #[error("Model not available: {model}")]
    ModelNotFound { model: String },

    // Fatal: credentials rejected, the user must supply new ones
    #[error("Backend rejected credentials: {message}")]
    Forbidden { message: String },

    // Fatal for the current call only, not the session
    #[error("Malformed backend response: {message}")]
    Protocol { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Classes the call executor absorbs and retries internally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Quota { .. } | BridgeError::TransientBackend { .. }
        )
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::TransientBackend {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Map a backend error string onto the taxonomy. The backend reports plain
/// HTTP status codes on the REST surface and gRPC-style status names on the
/// live socket, so both spellings are matched.
pub fn classify_backend_message(model: &str, message: &str) -> BridgeError {
    if message.contains("429")
        || message.contains("RESOURCE_EXHAUSTED")
        || message.contains("rate limit")
    {
        BridgeError::Quota {
            message: message.to_string(),
        }
    } else if message.contains("401")
        || message.contains("403")
        || message.contains("PERMISSION_DENIED")
        || message.contains("API key not valid")
    {
        BridgeError::Forbidden {
            message: message.to_string(),
        }
    } else if message.contains("404") || message.contains("NOT_FOUND") {
        BridgeError::ModelNotFound {
            model: model.to_string(),
        }
    } else if message.contains("500")
        || message.contains("502")
        || message.contains("503")
        || message.contains("INTERNAL")
        || message.contains("UNAVAILABLE")
    {
        BridgeError::TransientBackend {
            message: message.to_string(),
        }
    } else {
        BridgeError::Other(truncated(message))
    }
}

/// Cap a message at [`MAX_SURFACED_LEN`] characters.
pub fn truncated(message: &str) -> String {
    if message.chars().count() <= MAX_SURFACED_LEN {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_SURFACED_LEN).collect();
    out.push('…');
    out
}
