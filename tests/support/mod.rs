#![allow(dead_code)]

use redis_psync::rdb;
use redis_psync::reader::Reader;
use redis_psync::{Event, EventHandler, Op, Result};

/// Owned copy of every event a decode produced, for asserting against.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    SelectDb(u64),
    Script(Vec<u8>),
    Aux { key: Vec<u8>, value: Vec<u8> },
    Record { key: Vec<u8>, op: Op, args: Vec<Vec<u8>>, expire_ms: Option<i64> },
    Done,
}

pub struct Recorder {
    pub events: Vec<Seen>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder { events: Vec::new() }
    }
}

impl EventHandler for Recorder {
    fn handle(&mut self, event: Event) -> Result<()> {
        self.events.push(match event {
            Event::SelectDb(index) => Seen::SelectDb(index),
            Event::Script(body) => Seen::Script(body.to_vec()),
            Event::Aux { key, value } => Seen::Aux { key: key.to_vec(), value: value.to_vec() },
            Event::Record(record) => Seen::Record {
                key: record.key.to_vec(),
                op: record.op,
                args: record.args.to_vec(),
                expire_ms: record.expire_ms,
            },
            Event::Done => Seen::Done,
        });
        Ok(())
    }
}

/// Runs the decoder over `snapshot`, announcing its exact length.
pub fn decode(snapshot: &[u8]) -> (Result<()>, Vec<Seen>, i64) {
    let mut reader = Reader::new(snapshot, snapshot.len() as i64);
    let mut recorder = Recorder::new();
    let result = rdb::parse(&mut reader, &mut recorder);
    (result, recorder.events, reader.position())
}

pub fn encode_length(n: u64) -> Vec<u8> {
    if n < 64 {
        vec![n as u8]
    } else if n < 16384 {
        vec![0x40 | (n >> 8) as u8, n as u8]
    } else if n <= u32::MAX as u64 {
        let mut out = vec![0x80];
        out.extend_from_slice(&(n as u32).to_be_bytes());
        out
    } else {
        let mut out = vec![0x81];
        out.extend_from_slice(&n.to_be_bytes());
        out
    }
}

pub fn encode_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = encode_length(bytes.len() as u64);
    out.extend_from_slice(bytes);
    out
}

/// One ziplist entry to encode, covering every sub-encoding the format has.
#[derive(Debug, Clone)]
pub enum ZlEntry {
    Str(Vec<u8>),
    Int8(i8),
    Int16(i16),
    Int24(i32),
    Int32(i32),
    Int64(i64),
    /// 4-bit immediate, value 0..=12.
    Imm(u8),
}

impl ZlEntry {
    /// The byte string the decoder is expected to yield for this entry.
    pub fn expected(&self) -> Vec<u8> {
        match self {
            ZlEntry::Str(s) => s.clone(),
            ZlEntry::Int8(v) => v.to_string().into_bytes(),
            ZlEntry::Int16(v) => v.to_string().into_bytes(),
            ZlEntry::Int24(v) => v.to_string().into_bytes(),
            ZlEntry::Int32(v) => v.to_string().into_bytes(),
            ZlEntry::Int64(v) => v.to_string().into_bytes(),
            ZlEntry::Imm(v) => v.to_string().into_bytes(),
        }
    }
}

pub fn ziplist(entries: &[ZlEntry]) -> Vec<u8> {
    let mut body = Vec::new();
    for entry in entries {
        body.push(0); // prev-len
        match entry {
            ZlEntry::Str(s) if s.len() < 64 => {
                body.push(s.len() as u8);
                body.extend_from_slice(s);
            }
            ZlEntry::Str(s) if s.len() < 16384 => {
                body.push(0x40 | (s.len() >> 8) as u8);
                body.push(s.len() as u8);
                body.extend_from_slice(s);
            }
            ZlEntry::Str(s) => {
                body.push(0x80);
                body.extend_from_slice(&(s.len() as u32).to_be_bytes());
                body.extend_from_slice(s);
            }
            ZlEntry::Int8(v) => {
                body.push(0xFE);
                body.push(*v as u8);
            }
            ZlEntry::Int16(v) => {
                body.push(0xC0);
                body.extend_from_slice(&v.to_le_bytes());
            }
            ZlEntry::Int24(v) => {
                body.push(0xF0);
                body.extend_from_slice(&v.to_le_bytes()[..3]);
            }
            ZlEntry::Int32(v) => {
                body.push(0xD0);
                body.extend_from_slice(&v.to_le_bytes());
            }
            ZlEntry::Int64(v) => {
                body.push(0xE0);
                body.extend_from_slice(&v.to_le_bytes());
            }
            ZlEntry::Imm(v) => {
                body.push(0xF0 | (v + 1));
            }
        }
    }
    let mut out = Vec::with_capacity(10 + body.len());
    out.extend_from_slice(&((10 + body.len()) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

pub fn intset(element_size: u32, values: &[i64]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&element_size.to_le_bytes());
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        match element_size {
            2 => out.extend_from_slice(&(*value as i16).to_le_bytes()),
            4 => out.extend_from_slice(&(*value as i32).to_le_bytes()),
            _ => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
    out
}

/// Builds a zipmap slab from `(field, value, free)` triples. `nominal` is
/// the leading count byte.
pub fn zipmap(nominal: u8, pairs: &[(&[u8], &[u8], u8)]) -> Vec<u8> {
    let mut out = vec![nominal];
    for (field, value, free) in pairs {
        out.push(field.len() as u8);
        out.extend_from_slice(field);
        out.push(value.len() as u8);
        out.push(*free);
        out.extend_from_slice(value);
        out.extend(std::iter::repeat(0xAA).take(*free as usize));
    }
    out.push(255);
    out
}

/// Byte-level snapshot assembler for the end-to-end scenarios.
pub struct SnapshotBuilder {
    bytes: Vec<u8>,
}

impl SnapshotBuilder {
    pub fn new() -> SnapshotBuilder {
        SnapshotBuilder::with_version(b"0009")
    }

    pub fn with_version(version: &[u8]) -> SnapshotBuilder {
        let mut bytes = b"REDIS".to_vec();
        bytes.extend_from_slice(version);
        SnapshotBuilder { bytes }
    }

    pub fn raw(mut self, bytes: &[u8]) -> SnapshotBuilder {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn length(self, n: u64) -> SnapshotBuilder {
        let encoded = encode_length(n);
        self.raw(&encoded)
    }

    pub fn string(self, bytes: &[u8]) -> SnapshotBuilder {
        let encoded = encode_string(bytes);
        self.raw(&encoded)
    }

    pub fn select_db(self, index: u64) -> SnapshotBuilder {
        self.raw(&[0xFE]).length(index)
    }

    pub fn expire_ms(self, at: u64) -> SnapshotBuilder {
        let mut out = self.raw(&[0xFC]);
        out.bytes.extend_from_slice(&at.to_le_bytes());
        out
    }

    pub fn expire_s(self, at: u32) -> SnapshotBuilder {
        let mut out = self.raw(&[0xFD]);
        out.bytes.extend_from_slice(&at.to_le_bytes());
        out
    }

    pub fn aux(self, key: &[u8], value: &[u8]) -> SnapshotBuilder {
        self.raw(&[0xFA]).string(key).string(value)
    }

    /// Starts a data record: the object type byte plus the key. The caller
    /// appends the value bytes.
    pub fn record(self, object_type: u8, key: &[u8]) -> SnapshotBuilder {
        self.raw(&[object_type]).string(key)
    }

    /// Appends the EOF opcode and an (unverified) zero checksum.
    pub fn finish(self) -> Vec<u8> {
        let mut bytes = self.raw(&[0xFF]).bytes;
        bytes.extend_from_slice(&[0; 8]);
        bytes
    }

    /// The assembled bytes without any EOF marker.
    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}
