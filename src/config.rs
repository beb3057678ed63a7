//! Settings for a replication run.

use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    /// Address of the instance to replicate from (`host:port`).
    pub source_addr: String,
    /// Address of the instance to replay into (`host:port`).
    pub dest_addr: String,
    /// Source password; empty when the source is unauthenticated.
    pub password: String,
    /// Issue `FLUSHALL` against the destination before loading the snapshot.
    pub is_flush_dest: bool,
    /// Keep forwarding the live command stream after the snapshot. When
    /// false the run stops once the snapshot has been applied.
    pub is_follow: bool,
    /// Read timeout for both connections; `None` blocks forever.
    pub read_timeout: Option<Duration>,
    /// Write timeout for both connections; `None` blocks forever.
    pub write_timeout: Option<Duration>,
}
