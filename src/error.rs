use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while replicating. All variants are fatal to
/// the run; the caller tears down both connections and reports the error.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream ended before a decode completed.
    #[error("unexpected end of snapshot stream")]
    Truncated,

    /// Missing `REDIS` magic or a version outside the supported range.
    #[error("invalid snapshot header")]
    InvalidHeader,

    #[error("unknown length encoding 0x{0:02x}")]
    UnknownLengthEncoding(u8),

    #[error("unknown string encoding {0}")]
    UnknownStringEncoding(u64),

    #[error("unknown object type {0}")]
    UnknownObjectType(u8),

    /// Module, module2 and stream values cannot be replayed as plain writes.
    #[error("unsupported object type {0}")]
    UnsupportedObjectType(u8),

    #[error("invalid ziplist entry header 0x{0:02x}")]
    InvalidZiplistHeader(u8),

    #[error("invalid zipmap item length")]
    InvalidZipmap,

    #[error("invalid intset element size {0}")]
    InvalidIntsetSize(u32),

    #[error("corrupt lzf stream")]
    InvalidLzf,

    #[error("invalid sorted set score {0:?}")]
    InvalidScore(String),

    /// The destination rejected a write or confirmed a different arity than
    /// the snapshot decoded.
    #[error("{command} rejected by destination: {detail}")]
    ForwardFailed { command: String, detail: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Transport(err)
        }
    }
}
