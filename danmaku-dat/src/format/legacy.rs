//! The oldest container family. No magic string: the earliest layout is a
//! bare entry-header table, its successor adds a small archive header whose
//! key drives a feedback ladder over the table. Bodies are run-length
//! encoded when that shrinks them and XORed with a per-entry key.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Mutex;

use danmaku_types::Version;

use crate::archive::{append_raw, read_raw, Entry, Inner, Placement, Stream};
use crate::crypt::{feedback_decrypt, feedback_encrypt};
use crate::rle::{rle, unrle};
use crate::wire::{put_u16, put_u32, read_vec, u16_at, u32_at};
use crate::DatError;

/// Entry header size, shared by both layouts.
const ENTRY_HEADER_SIZE: usize = 32;
/// Archive header size of the keyed layout.
const ARCHIVE_HEADER_SIZE: usize = 16;

const ARCHIVE_KEY: u8 = 0x12;
const ENTRY_KEY: u8 = 0x34;

/// Magic word of an uncompressed body.
const MAGIC_RAW: u16 = 0xf388;
/// Magic word of a run-length encoded body.
const MAGIC_RLE: u16 = 0x9595;

fn oldest(version: Version) -> bool {
    version == Version::Th02
}

/// Body XOR key for freshly written entries.
fn body_key(version: Version) -> u8 {
    if oldest(version) {
        ARCHIVE_KEY
    } else {
        ENTRY_KEY
    }
}

fn parse_name(raw: &[u8], complemented: bool) -> String {
    let mut name = Vec::new();
    for &b in raw {
        if b == 0 {
            break;
        }
        name.push(if complemented { b ^ 0xff } else { b });
    }
    String::from_utf8_lossy(&name).into_owned()
}

fn parse_entry(version: Version, raw: &[u8]) -> Result<Entry, DatError> {
    // magic u16, key u8, name[13], then sizes and the offset. The oldest
    // layout stores 32-bit sizes and complemented names; the keyed layout
    // stores 16-bit sizes.
    let key = raw[2];
    let name = parse_name(&raw[3..16], oldest(version));
    let (zsize, size, offset) = if oldest(version) {
        (u32_at(raw, 16)?, u32_at(raw, 20)?, u32_at(raw, 24)?)
    } else {
        (
            u32::from(u16_at(raw, 16)?),
            u32::from(u16_at(raw, 18)?),
            u32_at(raw, 20)?,
        )
    };

    Ok(Entry {
        name,
        offset: u64::from(offset),
        size,
        zsize,
        extra: u32::from(if oldest(version) { ARCHIVE_KEY } else { key }),
    })
}

pub(crate) fn open<S: Stream>(version: Version, io: &mut S) -> Result<Vec<Entry>, DatError> {
    let entry_count;
    let mut table;

    if oldest(version) {
        // No archive header: the offset of the first entry reveals how many
        // entry headers precede the bodies.
        let first = read_vec(io, ENTRY_HEADER_SIZE)?;
        let first_offset = u32_at(&first, 24)? as usize;
        if first_offset == 0 || first_offset % ENTRY_HEADER_SIZE != 0 {
            return Err(DatError::EntryTableCorrupt("first entry offset invalid".into()));
        }
        entry_count = first_offset / ENTRY_HEADER_SIZE - 1;

        io.seek(SeekFrom::Start(0))?;
        table = read_vec(io, entry_count * ENTRY_HEADER_SIZE)?;
    } else {
        let header = read_vec(io, ARCHIVE_HEADER_SIZE)?;
        entry_count = usize::from(u16_at(&header, 4)?);
        let key = header[6];

        table = read_vec(io, entry_count * ENTRY_HEADER_SIZE)?;
        feedback_decrypt(&mut table, key);
    }

    table
        .chunks(ENTRY_HEADER_SIZE)
        .map(|raw| parse_entry(version, raw))
        .collect()
}

pub(crate) fn create(version: Version, entry_count: usize) -> Result<u64, DatError> {
    let table = (entry_count + 1) * ENTRY_HEADER_SIZE;
    Ok(if oldest(version) {
        table as u64
    } else {
        (ARCHIVE_HEADER_SIZE + table) as u64
    })
}

pub(crate) fn read_entry<S: Stream>(
    inner: &Mutex<Inner<S>>,
    entry: &Entry,
) -> Result<Vec<u8>, DatError> {
    let mut data = read_raw(inner, entry.offset, entry.zsize as usize)?;

    let key = entry.extra as u8;
    for b in data.iter_mut() {
        *b ^= key;
    }

    if entry.size == entry.zsize {
        Ok(data)
    } else {
        let out = unrle(&data);
        if out.len() != entry.size as usize {
            return Err(DatError::CompressionUnderrun {
                wanted: entry.size as usize,
                got: out.len(),
            });
        }
        Ok(out)
    }
}

pub(crate) fn write_entry<S: Stream>(
    version: Version,
    inner: &Mutex<Inner<S>>,
    _name: &str,
    data: &[u8],
) -> Result<Placement, DatError> {
    let mut body = rle(data);
    if body.len() >= data.len() {
        body = data.to_vec();
    }

    let key = body_key(version);
    for b in body.iter_mut() {
        *b ^= key;
    }

    let offset = append_raw(inner, &body)?;
    Ok(Placement {
        offset,
        size: data.len() as u32,
        zsize: body.len() as u32,
        extra: u32::from(key),
    })
}

fn push_entry_header(version: Version, out: &mut Vec<u8>, entry: &Entry) {
    let magic = if entry.zsize == entry.size { MAGIC_RAW } else { MAGIC_RLE };
    put_u16(out, magic);
    out.push(if oldest(version) { 3 } else { ENTRY_KEY });

    let mut name = [0u8; 13];
    for (dst, b) in name.iter_mut().zip(entry.name.bytes()) {
        *dst = if oldest(version) { b ^ 0xff } else { b };
    }
    out.extend_from_slice(&name);

    if oldest(version) {
        put_u32(out, entry.zsize);
        put_u32(out, entry.size);
        put_u32(out, entry.offset as u32);
        put_u32(out, 0);
    } else {
        put_u16(out, entry.zsize as u16);
        put_u16(out, entry.size as u16);
        put_u32(out, entry.offset as u32);
        put_u32(out, 0);
        put_u32(out, 0);
    }
}

pub(crate) fn close<S: Stream>(
    version: Version,
    io: &mut S,
    entries: &[Entry],
) -> Result<(), DatError> {
    io.seek(SeekFrom::Start(0))?;

    let table_size = (entries.len() + 1) * ENTRY_HEADER_SIZE;

    if !oldest(version) {
        let mut header = Vec::with_capacity(ARCHIVE_HEADER_SIZE);
        put_u16(&mut header, table_size as u16);
        put_u16(&mut header, 2);
        put_u16(&mut header, entries.len() as u16);
        header.push(ARCHIVE_KEY);
        header.resize(ARCHIVE_HEADER_SIZE, 0);
        io.write_all(&header)?;
    }

    let mut table = Vec::with_capacity(table_size);
    for entry in entries {
        push_entry_header(version, &mut table, entry);
    }
    table.resize(table_size, 0);

    if !oldest(version) {
        feedback_encrypt(&mut table, ARCHIVE_KEY);
    }

    io.write_all(&table)?;
    Ok(())
}
