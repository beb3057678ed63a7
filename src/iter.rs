//! Value iterators over the collection encodings. They keep the record
//! engine's dispatch flat: every collection yields its members as byte
//! strings, whatever the underlying encoding was.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::rdb::read_ziplist_entry;
use crate::reader::Reader;
use crate::slab::Slab;

pub(crate) trait Iter {
    fn next(&mut self) -> Result<Vec<u8>>;
}

/// Length-prefixed strings read straight off the snapshot stream.
pub(crate) struct StrValIter<'a, R: Read> {
    pub(crate) count: u64,
    pub(crate) input: &'a mut Reader<R>,
}

impl<R: Read> Iter for StrValIter<'_, R> {
    fn next(&mut self) -> Result<Vec<u8>> {
        if self.count == 0 {
            return Err(Error::Truncated);
        }
        self.count -= 1;
        self.input.read_string()
    }
}

/// How a sorted set stores its scores. The legacy encoding spells them as
/// length-prefixed ASCII with sentinel bytes for the non-finite values; the
/// newer one stores raw IEEE-754 bits.
pub(crate) enum ScoreFormat {
    Ascii,
    Binary,
}

impl ScoreFormat {
    pub(crate) fn read<R: Read>(&self, input: &mut Reader<R>) -> Result<f64> {
        match self {
            ScoreFormat::Ascii => input.read_ascii_float(),
            ScoreFormat::Binary => input.read_binary_float(),
        }
    }
}

/// Alternates member and formatted score, in stream order.
pub(crate) struct SortedSetIter<'a, R: Read> {
    pub(crate) count: u64,
    pub(crate) format: ScoreFormat,
    pub(crate) read_score: bool,
    pub(crate) input: &'a mut Reader<R>,
}

impl<R: Read> Iter for SortedSetIter<'_, R> {
    fn next(&mut self) -> Result<Vec<u8>> {
        if self.count == 0 {
            return Err(Error::Truncated);
        }
        if self.read_score {
            self.read_score = false;
            self.count -= 1;
            let score = self.format.read(self.input)?;
            Ok(score.to_string().into_bytes())
        } else {
            self.read_score = true;
            self.input.read_string()
        }
    }
}

pub(crate) struct ZipListIter<'a, 'b> {
    pub(crate) count: u16,
    pub(crate) slab: &'a mut Slab<'b>,
}

impl Iter for ZipListIter<'_, '_> {
    fn next(&mut self) -> Result<Vec<u8>> {
        if self.count == 0 {
            return Err(Error::Truncated);
        }
        self.count -= 1;
        read_ziplist_entry(self.slab)
    }
}

/// Fixed-width signed integers, spelled out as decimal ASCII.
pub(crate) struct IntSetIter<'a, 'b> {
    pub(crate) element_size: u32,
    pub(crate) count: u32,
    pub(crate) slab: &'a mut Slab<'b>,
}

impl Iter for IntSetIter<'_, '_> {
    fn next(&mut self) -> Result<Vec<u8>> {
        if self.count == 0 {
            return Err(Error::Truncated);
        }
        self.count -= 1;
        let member = match self.element_size {
            2 => self.slab.read_i16::<LittleEndian>()? as i64,
            4 => self.slab.read_i32::<LittleEndian>()? as i64,
            8 => self.slab.read_i64::<LittleEndian>()?,
            other => return Err(Error::InvalidIntsetSize(other)),
        };
        Ok(member.to_string().into_bytes())
    }
}
