//! The destination side: turns decoder events into write commands and
//! checks that the destination applied each one in full.

use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{Event, EventHandler, Op, Record};

// CR/LF terminate every protocol line; the other bytes mark the reply kinds.
pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';
pub(crate) const STAR: u8 = b'*';
pub(crate) const DOLLAR: u8 = b'$';
pub(crate) const PLUS: u8 = b'+';
pub(crate) const MINUS: u8 = b'-';
pub(crate) const COLON: u8 = b':';

pub struct Forwarder<S: Read + Write> {
    conn: S,
}

#[derive(Debug)]
pub(crate) enum Reply {
    Simple(String),
    Int(i64),
    Bulk(Vec<u8>),
    Error(String),
}

impl Forwarder<TcpStream> {
    pub fn connect(
        addr: &str,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<Forwarder<TcpStream>> {
        let stream = TcpStream::connect(addr).map_err(Error::Transport)?;
        stream.set_read_timeout(read_timeout).map_err(Error::Transport)?;
        stream.set_write_timeout(write_timeout).map_err(Error::Transport)?;
        info!("connected to destination {}", addr);
        Ok(Forwarder { conn: stream })
    }

    /// Discards destination replies in the background. Runs while the raw
    /// command stream is pumped, where no caller reads replies.
    pub fn spawn_reply_drain(&self, running: Arc<AtomicBool>) -> Result<thread::JoinHandle<()>> {
        let mut stream = self.conn.try_clone().map_err(Error::Transport)?;
        Ok(thread::spawn(move || {
            let mut sink = [0; 4096];
            info!("reply drain thread started");
            while running.load(Ordering::Relaxed) {
                match stream.read(&mut sink) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(ref err)
                        if err.kind() == ErrorKind::WouldBlock
                            || err.kind() == ErrorKind::TimedOut => {}
                    Err(err) => {
                        debug!("destination reply stream closed: {}", err);
                        break;
                    }
                }
            }
            info!("reply drain thread terminated");
        }))
    }
}

impl<S: Read + Write> Forwarder<S> {
    pub fn new(conn: S) -> Forwarder<S> {
        Forwarder { conn }
    }

    pub fn into_inner(self) -> S {
        self.conn
    }

    pub fn flush_all(&mut self) -> Result<()> {
        self.send(b"FLUSHALL", &[])?;
        self.expect_ok("FLUSHALL")
    }

    /// Relays already-framed protocol bytes untouched.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.conn.write_all(bytes).map_err(Error::Transport)?;
        self.conn.flush().map_err(Error::Transport)?;
        Ok(())
    }

    fn send(&mut self, command: &[u8], args: &[&[u8]]) -> Result<()> {
        send(&mut self.conn, command, args)
    }

    fn apply(&mut self, record: Record) -> Result<()> {
        let command = record.op.command();
        let mut args: Vec<&[u8]> = Vec::with_capacity(record.args.len() + 1);
        args.push(record.key);
        args.extend(record.args.iter().map(|arg| arg.as_slice()));
        self.send(command.as_bytes(), &args)?;
        match record.op {
            Op::Set => self.expect_ok(command)?,
            Op::RPush | Op::SAdd => self.expect_count(command, record.args.len() as i64)?,
            Op::HSet | Op::ZAdd => self.expect_count(command, (record.args.len() / 2) as i64)?,
        }
        if let Some(at) = record.expire_ms {
            self.send(b"PEXPIREAT", &[record.key, at.to_string().as_bytes()])?;
            if let Reply::Error(detail) = self.read_reply()? {
                return Err(Error::ForwardFailed { command: "PEXPIREAT".into(), detail });
            }
        }
        Ok(())
    }

    fn expect_ok(&mut self, command: &str) -> Result<()> {
        match self.read_reply()? {
            Reply::Simple(ref status) if status == "OK" => Ok(()),
            Reply::Error(detail) => Err(Error::ForwardFailed { command: command.into(), detail }),
            other => Err(Error::ForwardFailed {
                command: command.into(),
                detail: format!("unexpected reply {:?}", other),
            }),
        }
    }

    fn expect_count(&mut self, command: &str, expected: i64) -> Result<()> {
        match self.read_reply()? {
            Reply::Int(n) if n == expected => Ok(()),
            Reply::Int(n) => Err(Error::ForwardFailed {
                command: command.into(),
                detail: format!("inserted {} of {} values", n, expected),
            }),
            Reply::Error(detail) => Err(Error::ForwardFailed { command: command.into(), detail }),
            other => Err(Error::ForwardFailed {
                command: command.into(),
                detail: format!("unexpected reply {:?}", other),
            }),
        }
    }

    fn read_reply(&mut self) -> Result<Reply> {
        loop {
            match self.read_u8()? {
                PLUS => return Ok(Reply::Simple(self.read_line()?)),
                MINUS => return Ok(Reply::Error(self.read_line()?)),
                COLON => {
                    let line = self.read_line()?;
                    let n = line.parse::<i64>().map_err(|_| bad_reply(&line))?;
                    return Ok(Reply::Int(n));
                }
                DOLLAR => {
                    let line = self.read_line()?;
                    let len = line.parse::<i64>().map_err(|_| bad_reply(&line))?;
                    if len < 0 {
                        return Ok(Reply::Bulk(Vec::new()));
                    }
                    let mut bytes = vec![0; len as usize];
                    self.conn.read_exact(&mut bytes).map_err(Error::Transport)?;
                    let mut end = [0; 2];
                    self.conn.read_exact(&mut end).map_err(Error::Transport)?;
                    if end != [CR, LF] {
                        return Err(bad_reply("bulk reply missing CRLF"));
                    }
                    return Ok(Reply::Bulk(bytes));
                }
                LF => {}
                other => return Err(bad_reply(&format!("unexpected reply type {}", other))),
            }
        }
    }

    fn read_line(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == CR {
                break;
            }
            bytes.push(byte);
        }
        if self.read_u8()? != LF {
            return Err(bad_reply("expected LF after CR"));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.conn.read_exact(&mut buf).map_err(Error::Transport)?;
        Ok(buf[0])
    }
}

fn bad_reply(detail: &str) -> Error {
    Error::Transport(io::Error::new(ErrorKind::InvalidData, format!("bad reply: {}", detail)))
}

impl<S: Read + Write> EventHandler for Forwarder<S> {
    fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::SelectDb(index) => {
                info!("selecting destination db {}", index);
                self.send(b"SELECT", &[index.to_string().as_bytes()])?;
                self.expect_ok("SELECT")
            }
            Event::Script(body) => {
                self.send(b"SCRIPT", &[&b"LOAD"[..], body])?;
                match self.read_reply()? {
                    Reply::Bulk(sha) => {
                        debug!("script loaded as {}", String::from_utf8_lossy(&sha));
                        Ok(())
                    }
                    Reply::Error(detail) => {
                        warn!("destination refused script: {}", detail);
                        Ok(())
                    }
                    other => {
                        warn!("unexpected SCRIPT LOAD reply {:?}", other);
                        Ok(())
                    }
                }
            }
            Event::Aux { key, value } => {
                info!("{}: {}", String::from_utf8_lossy(key), String::from_utf8_lossy(value));
                Ok(())
            }
            Event::Record(record) => self.apply(record),
            Event::Done => {
                info!("snapshot applied");
                Ok(())
            }
        }
    }
}

/// Writes one command as a protocol array.
pub(crate) fn send<T: Write>(output: &mut T, command: &[u8], args: &[&[u8]]) -> Result<()> {
    let mut writer = BufWriter::new(output);
    writer.write_all(&[STAR])?;
    writer.write_all((args.len() + 1).to_string().as_bytes())?;
    writer.write_all(&[CR, LF, DOLLAR])?;
    writer.write_all(command.len().to_string().as_bytes())?;
    writer.write_all(&[CR, LF])?;
    writer.write_all(command)?;
    writer.write_all(&[CR, LF])?;
    for arg in args {
        writer.write_all(&[DOLLAR])?;
        writer.write_all(arg.len().to_string().as_bytes())?;
        writer.write_all(&[CR, LF])?;
        writer.write_all(arg)?;
        writer.write_all(&[CR, LF])?;
    }
    writer.flush()?;
    Ok(())
}
