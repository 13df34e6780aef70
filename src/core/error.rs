use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Session '{0}' is closed")]
    ClosedSession(String),

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Service exception: {0}")]
    ServiceException(String),

    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl ProxyError {
    /// Re-labels an error raised by a state machine as a `ServiceException`.
    ///
    /// Errors that already carry that label pass through unchanged.
    pub fn into_service_exception(self) -> Self {
        match self {
            Self::ServiceException(_) => self,
            other => Self::ServiceException(other.to_string()),
        }
    }

    pub fn is_closed_session(&self) -> bool {
        matches!(self, Self::ClosedSession(_))
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl<T> From<std::sync::PoisonError<T>> for ProxyError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
