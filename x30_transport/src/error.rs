use thiserror::Error;

use crate::event::EventError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame carried invalid sync bytes")]
    BadSyncBytes,
    #[error("operation attempted on a closed transport")]
    Closed,
    #[error(transparent)]
    Event(#[from] EventError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
