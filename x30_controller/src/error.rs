use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("navigation task already running")]
    AlreadyRunning,
    #[error("no active navigation procedure")]
    NoActiveProcedure,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Transport(#[from] x30_transport::TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
