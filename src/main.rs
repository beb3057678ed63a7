use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::error;

use redis_psync::config::Config;
use redis_psync::listener;

/// Replicates a live Redis into a destination of the same protocol.
#[derive(Parser)]
#[command(name = "redis-psync", version, about)]
struct Args {
    /// Source address (host:port)
    source: String,
    /// Destination address (host:port)
    dest: String,
    /// Password for the source instance
    #[arg(short, long, default_value = "")]
    password: String,
    /// Leave existing destination keys in place instead of flushing
    #[arg(long)]
    skip_flush: bool,
    /// Stop after the snapshot instead of following the command stream
    #[arg(long)]
    snapshot_only: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config {
        source_addr: args.source,
        dest_addr: args.dest,
        password: args.password,
        is_flush_dest: !args.skip_flush,
        is_follow: !args.snapshot_only,
        read_timeout: None,
        write_timeout: None,
    };
    let running = Arc::new(AtomicBool::new(true));
    let mut listener = listener::new(config, running);
    if let Err(err) = listener.start() {
        error!("replication failed: {}", err);
        process::exit(1);
    }
}
