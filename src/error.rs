use thiserror::Error;

use crate::Role;

#[derive(Debug, Error)]
pub enum Error {
    /// A datagram the classifier cannot place in any flight.
    #[error("Unclassifiable datagram: {0}")]
    Unclassifiable(String),

    #[error("Drop mask wider than 32 bits: {0:#x}")]
    MaskTooWide(u64),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// A scripted peer gave up on the handshake.
    #[error("Timeout: {0}")]
    Timeout(&'static str),

    /// Neither side made progress within the round limit.
    #[error("Stalled after {0} rounds")]
    Stalled(usize),

    #[error("Application data from {0} was lost")]
    DataLost(Role),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}
