//! Protocol error types.

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("frame has an empty event name")]
    EmptyEventName,
}

/// Errors produced while validating a domain event payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {event} payload: {reason}")]
    Invalid { event: &'static str, reason: String },
}

impl PayloadError {
    pub(crate) fn invalid(event: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            event,
            reason: reason.into(),
        }
    }
}
