use thiserror::Error;

/// Failures at the HTTP boundary. The transport never interprets payloads,
/// so everything here is about getting a well-formed JSON body back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response was received (DNS, connection refused, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The vendor answered with a non-success status code.
    #[error("HTTP error (status {status}): {body}")]
    Http { status: u16, body: String },

    /// The body was not valid JSON.
    #[error("failed to decode response: {message}")]
    Decode { message: String, body: String },
}

impl TransportError {
    /// Whether the poller may try again after this error.
    ///
    /// Network failures, 5xx and 429 are transient. Other 4xx responses and
    /// malformed bodies will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            TransportError::Decode { .. } => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// A vendor payload that could not be mapped onto the shared state model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("unrecognized vendor response: {raw}")]
    UnrecognizedStatus { raw: serde_json::Value },

    #[error("missing field `{0}` in vendor response")]
    MissingField(&'static str),

    #[error("vendor rejected the job: {0}")]
    VendorRejected(String),
}

/// Errors returned by `submit`. These only occur before a job id exists,
/// so no polling ever starts for them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("job text must not be empty")]
    EmptyText,

    #[error("job creation failed: {0}")]
    Transport(#[from] TransportError),

    #[error("job creation response not understood: {0}")]
    Normalization(#[from] NormalizationError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("session `{0}` already has an active job")]
    AlreadyActive(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
