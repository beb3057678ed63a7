//! The snapshot record engine.
//!
//! Consumes the opcode stream, decodes every stored object into the write
//! command that recreates it, and hands the resulting events to an
//! [`EventHandler`]. The embedded slab formats (ziplist, zipmap, intset) are
//! read off the stream as one string each and parsed with a [`Slab`] cursor.
//!
//! [`EventHandler`]: crate::EventHandler

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use log::debug;

use crate::error::{Error, Result};
use crate::iter::{IntSetIter, Iter, ScoreFormat, SortedSetIter, StrValIter, ZipListIter};
use crate::reader::Reader;
use crate::slab::Slab;
use crate::{Event, EventHandler, Op, Record};

pub(crate) const TYPE_STRING: u8 = 0;
pub(crate) const TYPE_LIST: u8 = 1;
pub(crate) const TYPE_SET: u8 = 2;
pub(crate) const TYPE_ZSET: u8 = 3;
pub(crate) const TYPE_HASH: u8 = 4;
pub(crate) const TYPE_ZSET_2: u8 = 5;
pub(crate) const TYPE_MODULE: u8 = 6;
pub(crate) const TYPE_MODULE_2: u8 = 7;
// slot 8 is reserved and has never been assigned
pub(crate) const TYPE_HASH_ZIPMAP: u8 = 9;
pub(crate) const TYPE_LIST_ZIPLIST: u8 = 10;
pub(crate) const TYPE_SET_INTSET: u8 = 11;
pub(crate) const TYPE_ZSET_ZIPLIST: u8 = 12;
pub(crate) const TYPE_HASH_ZIPLIST: u8 = 13;
pub(crate) const TYPE_LIST_QUICKLIST: u8 = 14;
pub(crate) const TYPE_STREAM_LISTPACKS: u8 = 15;

pub(crate) const OPCODE_IDLE: u8 = 0xF8;
pub(crate) const OPCODE_FREQ: u8 = 0xF9;
pub(crate) const OPCODE_AUX: u8 = 0xFA;
pub(crate) const OPCODE_RESIZEDB: u8 = 0xFB;
pub(crate) const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
pub(crate) const OPCODE_EXPIRETIME: u8 = 0xFD;
pub(crate) const OPCODE_SELECTDB: u8 = 0xFE;
pub(crate) const OPCODE_EOF: u8 = 0xFF;

const ZIP_STR_06B: u8 = 0;
const ZIP_STR_14B: u8 = 1;
const ZIP_STR_32B: u8 = 2;
const ZIP_INT_16B: u8 = 0xC0;
const ZIP_INT_32B: u8 = 0xD0;
const ZIP_INT_64B: u8 = 0xE0;
const ZIP_INT_24B: u8 = 0xF0;
const ZIP_INT_8B: u8 = 0xFE;
const ZIP_BIG_PREV_LEN: u8 = 0xFE;

const ZIPMAP_LONG_LEN: u8 = 253;
const ZIPMAP_INVALID_LEN: u8 = 254;
const ZIPMAP_END: u8 = 255;

const MAGIC: &[u8] = b"REDIS";
const VERSION_MIN: u32 = 1;
const VERSION_MAX: u32 = 9;

/// Decodes one whole snapshot from `input`, emitting events in stream order.
/// Returns after the EOF opcode or once the announced byte count has been
/// consumed.
pub fn parse<R: Read>(input: &mut Reader<R>, handler: &mut dyn EventHandler) -> Result<()> {
    check_header(input)?;
    let mut expire: i64 = -1;
    let mut db_selected = false;
    while input.has_more() {
        let flag = input.read_u8()?;
        match flag {
            OPCODE_IDLE => {
                input.read_length()?;
            }
            OPCODE_FREQ => {
                input.read_u8()?;
            }
            OPCODE_AUX => {
                let key = input.read_string()?;
                let value = input.read_string()?;
                if key == b"lua" {
                    handler.handle(Event::Script(&value))?;
                } else {
                    handler.handle(Event::Aux { key: &key, value: &value })?;
                }
            }
            OPCODE_RESIZEDB => {
                let (db_size, _) = input.read_length()?;
                let (expires_size, _) = input.read_length()?;
                debug!("db holds {} keys, {} with an expiry", db_size, expires_size);
            }
            OPCODE_EXPIRETIME_MS => {
                expire = input.read_u64::<LittleEndian>()? as i64;
            }
            OPCODE_EXPIRETIME => {
                expire = input.read_u32::<LittleEndian>()? as i64 * 1000;
            }
            OPCODE_SELECTDB => {
                // the index is consumed either way to stay on the opcode
                // boundary; only the first selection is acted on
                let (index, _) = input.read_length()?;
                if !db_selected {
                    db_selected = true;
                    handler.handle(Event::SelectDb(index))?;
                }
            }
            OPCODE_EOF => {
                let mut checksum = [0; 8];
                input.read_exact(&mut checksum)?;
                debug!("snapshot checksum {:02x?}", checksum);
                break;
            }
            object_type => {
                let key = input.read_string()?;
                read_object(input, object_type, &key, expire, handler)?;
                expire = -1;
            }
        }
    }
    handler.handle(Event::Done)?;
    Ok(())
}

fn check_header<R: Read>(input: &mut Reader<R>) -> Result<()> {
    let mut header = [0; 9];
    input.read_exact(&mut header)?;
    if &header[..5] != MAGIC {
        return Err(Error::InvalidHeader);
    }
    let version = std::str::from_utf8(&header[5..])
        .ok()
        .and_then(|text| text.parse::<u32>().ok())
        .ok_or(Error::InvalidHeader)?;
    if !(VERSION_MIN..=VERSION_MAX).contains(&version) {
        return Err(Error::InvalidHeader);
    }
    debug!("snapshot version {}", version);
    Ok(())
}

/// Decodes the value that follows `key` and emits the record recreating it.
fn read_object<R: Read>(
    input: &mut Reader<R>,
    object_type: u8,
    key: &[u8],
    expire: i64,
    handler: &mut dyn EventHandler,
) -> Result<()> {
    let expire_ms = if expire > 0 { Some(expire) } else { None };
    match object_type {
        TYPE_STRING => {
            let value = input.read_string()?;
            emit(handler, key, Op::Set, vec![value], expire_ms)
        }
        TYPE_LIST | TYPE_SET => {
            let (count, _) = input.read_length()?;
            let mut args = Vec::with_capacity(count as usize);
            let mut iter = StrValIter { count, input };
            for _ in 0..count {
                args.push(iter.next()?);
            }
            let op = if object_type == TYPE_LIST { Op::RPush } else { Op::SAdd };
            emit(handler, key, op, args, expire_ms)
        }
        TYPE_ZSET | TYPE_ZSET_2 => {
            let (count, _) = input.read_length()?;
            let format = if object_type == TYPE_ZSET_2 { ScoreFormat::Binary } else { ScoreFormat::Ascii };
            let mut args = Vec::with_capacity(2 * count as usize);
            let mut iter = SortedSetIter { count, format, read_score: false, input };
            for _ in 0..count {
                let member = iter.next()?;
                let score = iter.next()?;
                args.push(score);
                args.push(member);
            }
            emit(handler, key, Op::ZAdd, args, expire_ms)
        }
        TYPE_HASH => {
            let (count, _) = input.read_length()?;
            let mut args = Vec::with_capacity(2 * count as usize);
            let mut iter = StrValIter { count: count * 2, input };
            for _ in 0..count {
                args.push(iter.next()?);
                args.push(iter.next()?);
            }
            emit(handler, key, Op::HSet, args, expire_ms)
        }
        TYPE_LIST_ZIPLIST => {
            let bytes = input.read_string()?;
            let mut slab = Slab::new(&bytes);
            let count = read_ziplist_length(&mut slab)?;
            let mut args = Vec::with_capacity(count as usize);
            let mut iter = ZipListIter { count, slab: &mut slab };
            for _ in 0..count {
                args.push(iter.next()?);
            }
            emit(handler, key, Op::RPush, args, expire_ms)
        }
        TYPE_HASH_ZIPLIST => {
            let bytes = input.read_string()?;
            let mut slab = Slab::new(&bytes);
            let count = read_ziplist_length(&mut slab)? / 2;
            let mut args = Vec::with_capacity(2 * count as usize);
            let mut iter = ZipListIter { count: count * 2, slab: &mut slab };
            for _ in 0..count {
                args.push(iter.next()?);
                args.push(iter.next()?);
            }
            emit(handler, key, Op::HSet, args, expire_ms)
        }
        TYPE_ZSET_ZIPLIST => {
            let bytes = input.read_string()?;
            let mut slab = Slab::new(&bytes);
            let count = read_ziplist_length(&mut slab)? / 2;
            let mut args = Vec::with_capacity(2 * count as usize);
            let mut iter = ZipListIter { count: count * 2, slab: &mut slab };
            for _ in 0..count {
                let member = iter.next()?;
                let score_text = iter.next()?;
                let text = String::from_utf8_lossy(&score_text).into_owned();
                let score = text.parse::<f64>().map_err(|_| Error::InvalidScore(text))?;
                args.push(score.to_string().into_bytes());
                args.push(member);
            }
            emit(handler, key, Op::ZAdd, args, expire_ms)
        }
        TYPE_LIST_QUICKLIST => {
            let (count, _) = input.read_length()?;
            for i in 0..count {
                let bytes = input.read_string()?;
                let mut slab = Slab::new(&bytes);
                let len = read_ziplist_length(&mut slab)?;
                let mut args = Vec::with_capacity(len as usize);
                let mut iter = ZipListIter { count: len, slab: &mut slab };
                for _ in 0..len {
                    args.push(iter.next()?);
                }
                // the key expires once, after its last node is pushed
                let expire_ms = if i + 1 == count { expire_ms } else { None };
                emit(handler, key, Op::RPush, args, expire_ms)?;
            }
            Ok(())
        }
        TYPE_HASH_ZIPMAP => {
            let bytes = input.read_string()?;
            let mut slab = Slab::new(&bytes);
            let nominal = slab.read_byte()?;
            let count = if nominal <= 254 {
                nominal as usize
            } else {
                count_zipmap_items(&mut slab)? / 2
            };
            let mut args = Vec::with_capacity(2 * count);
            for _ in 0..count {
                let field = match read_zipmap_item(&mut slab, false)? {
                    Some(field) => field,
                    None => break,
                };
                let value = read_zipmap_item(&mut slab, true)?.ok_or(Error::InvalidZipmap)?;
                args.push(field);
                args.push(value);
            }
            emit(handler, key, Op::HSet, args, expire_ms)
        }
        TYPE_SET_INTSET => {
            let bytes = input.read_string()?;
            let mut slab = Slab::new(&bytes);
            let element_size = slab.read_u32::<LittleEndian>()?;
            if element_size != 2 && element_size != 4 && element_size != 8 {
                return Err(Error::InvalidIntsetSize(element_size));
            }
            let count = slab.read_u32::<LittleEndian>()?;
            let mut args = Vec::with_capacity(count as usize);
            let mut iter = IntSetIter { element_size, count, slab: &mut slab };
            for _ in 0..count {
                args.push(iter.next()?);
            }
            emit(handler, key, Op::SAdd, args, expire_ms)
        }
        TYPE_MODULE | TYPE_MODULE_2 | TYPE_STREAM_LISTPACKS => {
            Err(Error::UnsupportedObjectType(object_type))
        }
        _ => Err(Error::UnknownObjectType(object_type)),
    }
}

fn emit(
    handler: &mut dyn EventHandler,
    key: &[u8],
    op: Op,
    args: Vec<Vec<u8>>,
    expire_ms: Option<i64>,
) -> Result<()> {
    // zero-argument writes are rejected by the destination
    if args.is_empty() {
        return Ok(());
    }
    handler.handle(Event::Record(Record { key, op, args: &args, expire_ms }))
}

/// Reads the entry count from a ziplist header, leaving the cursor on the
/// first entry. Total-bytes and tail-offset words are not used.
pub(crate) fn read_ziplist_length(slab: &mut Slab) -> Result<u16> {
    slab.seek(SeekFrom::Start(8))?;
    Ok(slab.read_u16::<LittleEndian>()?)
}

/// Decodes one ziplist entry: a prev-length header, then either a string of
/// one of three widths or a packed integer, spelled back out as decimal.
pub(crate) fn read_ziplist_entry(slab: &mut Slab) -> Result<Vec<u8>> {
    if slab.read_byte()? == ZIP_BIG_PREV_LEN {
        slab.seek(SeekFrom::Current(4))?;
    }
    let header = slab.read_byte()?;
    match header >> 6 {
        ZIP_STR_06B => Ok(slab.slice((header & 0x3F) as usize)?.to_vec()),
        ZIP_STR_14B => {
            let next = slab.read_byte()?;
            Ok(slab.slice(((header as usize & 0x3F) << 8) | next as usize)?.to_vec())
        }
        ZIP_STR_32B => {
            let len = slab.read_u32::<BigEndian>()?;
            Ok(slab.slice(len as usize)?.to_vec())
        }
        _ => match header {
            ZIP_INT_16B => Ok(slab.read_i16::<LittleEndian>()?.to_string().into_bytes()),
            ZIP_INT_32B => Ok(slab.read_i32::<LittleEndian>()?.to_string().into_bytes()),
            ZIP_INT_64B => Ok(slab.read_i64::<LittleEndian>()?.to_string().into_bytes()),
            ZIP_INT_24B => Ok(slab.read_i24::<LittleEndian>()?.to_string().into_bytes()),
            ZIP_INT_8B => Ok(slab.read_i8()?.to_string().into_bytes()),
            // 4-bit immediate, selectors 0x1 through 0xD encode 0..=12
            0xF1..=0xFD => Ok(((header & 0x0F) as i64 - 1).to_string().into_bytes()),
            _ => Err(Error::InvalidZiplistHeader(header)),
        },
    }
}

/// Reads one zipmap item length. Returns the payload length and the free
/// padding that follows it, or `None` at the terminator. The free byte is
/// only present on value items, except in the 5-byte long form which always
/// carries it.
fn read_zipmap_item_length(slab: &mut Slab, read_free: bool) -> Result<Option<(usize, usize)>> {
    let byte = slab.read_byte()?;
    match byte {
        ZIPMAP_LONG_LEN => {
            let bytes = slab.slice(5)?;
            Ok(Some((BigEndian::read_u32(&bytes[..4]) as usize, bytes[4] as usize)))
        }
        ZIPMAP_INVALID_LEN => Err(Error::InvalidZipmap),
        ZIPMAP_END => Ok(None),
        _ => {
            let free = if read_free { slab.read_byte()? as usize } else { 0 };
            Ok(Some((byte as usize, free)))
        }
    }
}

/// Reads one zipmap item and skips its free padding. `None` at the
/// terminator.
pub(crate) fn read_zipmap_item(slab: &mut Slab, read_free: bool) -> Result<Option<Vec<u8>>> {
    let (len, free) = match read_zipmap_item_length(slab, read_free)? {
        Some(item) => item,
        None => return Ok(None),
    };
    let value = slab.slice(len)?.to_vec();
    slab.seek(SeekFrom::Current(free as i64))?;
    Ok(Some(value))
}

/// Walks the zipmap to its terminator and counts items (keys plus values),
/// restoring the cursor to where the walk began.
pub(crate) fn count_zipmap_items(slab: &mut Slab) -> Result<usize> {
    let start = slab.position();
    let mut count = 0;
    loop {
        match read_zipmap_item_length(slab, count % 2 != 0)? {
            Some((len, free)) => {
                slab.seek(SeekFrom::Current((len + free) as i64))?;
                count += 1;
            }
            None => break,
        }
    }
    slab.seek(SeekFrom::Start(start))?;
    Ok(count)
}
