use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Service {service_id} has no category")]
    MissingCategory { service_id: String },

    #[error("Consumer processing error: {0}")]
    ConsumerProcessing(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid role '{0}', expected client, provider or admin")]
    InvalidRole(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NotifyError {
    /// Whether a retry with backoff may succeed. True only for broker failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::BrokerUnavailable(_))
    }

    pub fn broker(context: &str, err: impl std::fmt::Display) -> Self {
        NotifyError::BrokerUnavailable(format!("{}: {}", context, err))
    }
}

impl From<lapin::Error> for NotifyError {
    fn from(err: lapin::Error) -> Self {
        NotifyError::BrokerUnavailable(err.to_string())
    }
}

impl From<tokio_postgres::Error> for NotifyError {
    fn from(err: tokio_postgres::Error) -> Self {
        NotifyError::Directory(err.to_string())
    }
}
