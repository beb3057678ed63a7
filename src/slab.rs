//! Random-access cursor over an in-memory byte slab.
//!
//! The embedded formats (ziplist, zipmap, intset) arrive as one
//! length-prefixed string and are parsed out of band from the snapshot
//! stream. `Slab` gives those parsers cheap slicing plus the `Read`/`Seek`
//! surface that `byteorder` builds on.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{Error, Result};

pub(crate) struct Slab<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Slab<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Slab<'a> {
        Slab { data, index: 0 }
    }

    /// Borrows the next `n` bytes without copying.
    pub(crate) fn slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.index + n > self.data.len() {
            return Err(Error::Truncated);
        }
        let bytes = &self.data[self.index..self.index + n];
        self.index += n;
        Ok(bytes)
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        if self.index >= self.data.len() {
            return Err(Error::Truncated);
        }
        let byte = self.data[self.index];
        self.index += 1;
        Ok(byte)
    }

    pub(crate) fn position(&self) -> u64 {
        self.index as u64
    }
}

impl Read for Slab<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.index >= self.data.len() {
            return Ok(0);
        }
        let n = (&self.data[self.index..]).read(buf)?;
        self.index += n;
        Ok(n)
    }
}

impl Seek for Slab<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let abs = match pos {
            SeekFrom::Start(n) => i64::try_from(n)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position out of range"))?,
            SeekFrom::Current(delta) => self.index as i64 + delta,
            SeekFrom::End(delta) => self.data.len() as i64 + delta,
        };
        if abs < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"));
        }
        if abs >= 1 << 31 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "position out of range"));
        }
        self.index = abs as usize;
        Ok(abs as u64)
    }
}
