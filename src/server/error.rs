use thiserror::Error;

/// Failures surfaced by the upstream client, the caches and the EPG writer.
///
/// Every variant carries owned strings so a single failed fetch can be cloned
/// out to every caller waiting on the same session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlutoError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed upstream response: {0}")]
    UpstreamMalformed(String),

    #[error("session payload carries no session token")]
    MissingSessionToken,

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("failed to persist {0}")]
    Persistence(String),

    #[error("failed to serialize schedule: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl PlutoError {
    /// Transport and status failures both count as the upstream being unavailable.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PlutoError::UpstreamMalformed(err.to_string())
        } else {
            PlutoError::UpstreamUnavailable(err.to_string())
        }
    }
}
