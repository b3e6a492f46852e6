use std::io;

use crate::packet::Command;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u64),

    #[error("expected sequence {expected}, received {received}")]
    SequenceMismatch { expected: u8, received: u64 },

    #[error("sequence {0} does not fit in one byte")]
    StructuralInvalid(u64),

    #[error("overseer answered login with {0:?}")]
    LoginRejected(Command),

    #[error("first frame must be a login, got {0:?}")]
    HandshakeRejected(Command),

    #[error("login acknowledgement carried no cluster identity")]
    MissingIdentity,

    #[error("cannot request a vote before login assigns a cluster identity")]
    NotLoggedIn,

    #[error("peer closed the connection")]
    PeerDisconnected,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors a session answers with a NACK instead of dropping the connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedFrame(_)
                | Error::UnknownCommand(_)
                | Error::SequenceMismatch { .. }
                | Error::StructuralInvalid(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
