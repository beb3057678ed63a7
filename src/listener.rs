//! Drives one replication run: handshake with the source, snapshot decode
//! into the destination, then the live command stream.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::forward::{self, Forwarder, CR, LF, MINUS};
use crate::rdb;
use crate::reader::Reader;

pub struct Listener {
    pub config: Config,
    running: Arc<AtomicBool>,
}

/// Creates a listener. Clear `running` from another thread to stop the
/// command-stream phase in an orderly way.
pub fn new(config: Config, running: Arc<AtomicBool>) -> Listener {
    Listener { config, running }
}

impl Listener {
    pub fn start(&mut self) -> Result<()> {
        let mut source = TcpStream::connect(&self.config.source_addr).map_err(Error::Transport)?;
        source.set_read_timeout(self.config.read_timeout).map_err(Error::Transport)?;
        source.set_write_timeout(self.config.write_timeout).map_err(Error::Transport)?;
        info!("connected to source {}", self.config.source_addr);
        let mut input = BufReader::new(source.try_clone().map_err(Error::Transport)?);

        if !self.config.password.is_empty() {
            forward::send(&mut source, b"AUTH", &[self.config.password.as_bytes()])?;
            expect_line(&mut input, "AUTH")?;
        }

        let mut forwarder = Forwarder::connect(
            &self.config.dest_addr,
            self.config.read_timeout,
            self.config.write_timeout,
        )?;
        if self.config.is_flush_dest {
            info!("flushing destination before replication");
            forwarder.flush_all()?;
        }

        forward::send(&mut source, b"PING", &[])?;
        expect_line(&mut input, "PING")?;
        forward::send(&mut source, b"REPLCONF", &[&b"capa"[..], b"psync2"])?;
        expect_line(&mut input, "REPLCONF")?;
        forward::send(&mut source, b"SYNC", &[])?;

        let announced = read_snapshot_length(&mut input)?;
        info!("receiving {} byte snapshot", announced);
        let mut reader = Reader::new(input, announced);
        rdb::parse(&mut reader, &mut forwarder)?;
        debug!("consumed {} of {} announced snapshot bytes", reader.position(), announced);

        if !self.config.is_follow {
            return Ok(());
        }

        info!("forwarding replication stream");
        let drain = forwarder.spawn_reply_drain(self.running.clone())?;
        let mut input = reader.into_inner();
        let mut chunk = [0; 4096];
        while self.is_running() {
            match input.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => forwarder.write_raw(&chunk[..n])?,
                Err(ref err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
                Err(err) => return Err(Error::Transport(err)),
            }
        }
        self.running.store(false, Ordering::Relaxed);
        if drain.join().is_err() {
            error!("reply drain thread panicked");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

fn expect_line(input: &mut impl BufRead, stage: &str) -> Result<String> {
    let line = read_line(input)?;
    if line.as_bytes().first() == Some(&MINUS) {
        return Err(Error::Handshake(format!("{} rejected: {}", stage, &line[1..])));
    }
    Ok(line)
}

fn read_line(input: &mut impl BufRead) -> Result<String> {
    let mut bytes = Vec::new();
    input.read_until(LF, &mut bytes).map_err(Error::Transport)?;
    if bytes.is_empty() {
        return Err(Error::Handshake("source closed the connection".into()));
    }
    while matches!(bytes.last(), Some(&CR) | Some(&LF)) {
        bytes.pop();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads the `$<length>` announcement that precedes the snapshot bytes.
/// The source emits bare newlines while its dump is still being produced;
/// those are skipped.
fn read_snapshot_length(input: &mut impl BufRead) -> Result<i64> {
    loop {
        let line = read_line(input)?;
        if line.is_empty() {
            continue;
        }
        let Some(length) = line.strip_prefix('$') else {
            return Err(Error::Handshake(format!("expected snapshot announcement, got {:?}", line)));
        };
        return length
            .parse::<i64>()
            .map_err(|_| Error::Handshake(format!("bad snapshot length {:?}", length)));
    }
}
