use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),
    #[error("malformed xml body: {0}")]
    ParseError(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid integer in field `{field}`: {value:?}")]
    InvalidInt { field: &'static str, value: String },
    #[error("invalid float in field `{field}`: {value:?}")]
    InvalidFloat { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
