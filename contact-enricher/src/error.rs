use thiserror::Error;

/// Problems with the event itself. These are reported back to the caller in the response
/// body rather than failing the invocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("CASES_DOMAIN_ID environment variable is not set")]
    MissingDomainId,
    #[error("Could not extract a case id from the task reference of contact {0}")]
    MissingCaseId(String),
    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(String),
    #[error("No view ARNs given and no InstanceId to discover them from")]
    MissingInstanceId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("{operation} failed with {class}: {message}")]
    Call {
        operation: &'static str,
        class: String,
        message: String,
    },
    #[error("{operation} returned no {missing}")]
    MissingData {
        operation: &'static str,
        missing: &'static str,
    },
}

impl UpstreamError {
    /// A short, stable name for the kind of failure, suitable for logs and responses.
    pub fn class(&self) -> &str {
        match self {
            UpstreamError::Timeout { .. } => "Timeout",
            UpstreamError::Call { class, .. } => class,
            UpstreamError::MissingData { .. } => "MissingData",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("store call failed with {class}: {message}")]
pub struct StoreError {
    pub class: String,
    pub message: String,
}

impl StoreError {
    pub fn timeout(operation: &str) -> Self {
        Self {
            class: "Timeout".to_owned(),
            message: format!("{} timed out", operation),
        }
    }
}

#[derive(Debug, Error)]
pub enum UnhandledError {
    #[error("Config error: {0}")]
    Config(#[from] envconfig::Error),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// What a handler can fail with. Event errors become error responses, anything else
/// fails the invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Unhandled(#[from] UnhandledError),
}

impl From<UpstreamError> for HandlerError {
    fn from(e: UpstreamError) -> Self {
        HandlerError::Unhandled(e.into())
    }
}
