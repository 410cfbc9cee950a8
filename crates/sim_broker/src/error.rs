//! Broker error taxonomy: configuration failures are fatal at setup,
//! protocol failures halt the run.

use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no broker entry in the module configuration")]
    MissingBroker,
    #[error("module {module} failed: {message}")]
    Module { module: String, message: String },
    #[error("http error talking to {module}: {message}")]
    Http { module: String, message: String },
    #[error("event targets unknown service {0}")]
    UnknownService(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("result sink failed: {0}")]
    Sink(String),
}
