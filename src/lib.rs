//! Replicates a live Redis into another instance of the same protocol.
//!
//! The [`Listener`] runs the replication handshake against the source,
//! decodes the point-in-time snapshot that follows into logical write
//! commands, applies them to the destination through a [`Forwarder`], and
//! then relays the continuous command stream.
//!
//! The decoder itself is usable on its own: feed any snapshot byte stream to
//! [`rdb::parse`] through a [`reader::Reader`] and receive [`Event`]s on an
//! [`EventHandler`] of your choosing.
//!
//! [`Listener`]: listener::Listener
//! [`Forwarder`]: forward::Forwarder

pub mod config;
pub mod error;
pub mod forward;
pub mod listener;
pub mod rdb;
pub mod reader;

mod iter;
mod lzf;
mod slab;

pub use error::{Error, Result};

/// Everything the snapshot decoder reports, in stream order.
#[derive(Debug)]
pub enum Event<'a> {
    /// The snapshot switched to this database; affects all later records.
    SelectDb(u64),
    /// A lua script body carried in the snapshot's aux section.
    Script(&'a [u8]),
    /// Any other aux field; informational.
    Aux { key: &'a [u8], value: &'a [u8] },
    /// One write command recreating a stored value.
    Record(Record<'a>),
    /// The snapshot ended.
    Done,
}

/// A decoded write. `args` holds the command arguments after the key, laid
/// out the way the command expects them (`field value ...` for `HSET`,
/// `score member ...` for `ZADD`).
#[derive(Debug)]
pub struct Record<'a> {
    pub key: &'a [u8],
    pub op: Op,
    pub args: &'a [Vec<u8>],
    /// Absolute expiry in milliseconds, bound to this record by the
    /// preceding expire opcode.
    pub expire_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Set,
    RPush,
    SAdd,
    HSet,
    ZAdd,
}

impl Op {
    pub fn command(&self) -> &'static str {
        match self {
            Op::Set => "SET",
            Op::RPush => "RPUSH",
            Op::SAdd => "SADD",
            Op::HSet => "HSET",
            Op::ZAdd => "ZADD",
        }
    }
}

/// Receives decoder events. Handlers are fallible so a failing destination
/// aborts the decode in place.
pub trait EventHandler {
    fn handle(&mut self, event: Event) -> Result<()>;
}

/// Swallows every event. Useful for draining a snapshot without applying it.
pub struct NoOpEventHandler;

impl EventHandler for NoOpEventHandler {
    fn handle(&mut self, _: Event) -> Result<()> {
        Ok(())
    }
}
