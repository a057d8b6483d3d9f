use liveline_transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("client has been destroyed")]
    Destroyed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
