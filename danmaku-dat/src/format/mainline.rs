//! The `THA1` family used from release 9.5 on. Bodies are LZSS-compressed
//! unless compression would not shrink them, then scrambled by one of
//! eight ladder schedules picked by a hash of the entry name. The entry
//! table follows the bodies, LZSS-compressed and ladder-scrambled; the
//! fixed header is scrambled with the interleaved ladder and its fields
//! carry additive masks.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use danmaku_types::Version;

use crate::archive::{append_raw, read_raw, Entry, Inner, Placement, Stream};
use crate::crypt::{
    decrypt, decrypt_interleaved, encrypt, encrypt_interleaved, mainline_body_params,
    HEADER_PARAMS, TABLE_PARAMS,
};
use crate::lzss::{compress, decompress};
use crate::wire::{cstr_at, put_u32, read_vec, stream_len, u32_at};
use crate::DatError;

const MAGIC: &[u8; 4] = b"THA1";
const HEADER_SIZE: u64 = 16;

const SIZE_MASK: u32 = 123_456_789;
const ZSIZE_MASK: u32 = 987_654_321;
const COUNT_MASK: u32 = 135_792_468;

/// Entry names are padded with one to four NULs up to the next 4-byte
/// boundary.
fn padded_name_len(name: &str) -> usize {
    name.len() + (4 - name.len() % 4)
}

pub(crate) fn open<S: Stream>(version: Version, io: &mut S) -> Result<Vec<Entry>, DatError> {
    let _ = version;
    let mut header = [0u8; HEADER_SIZE as usize];
    io.read_exact(&mut header)?;
    decrypt_interleaved(&mut header, HEADER_PARAMS);

    if &header[..4] != MAGIC {
        return Err(DatError::InvalidMagic([header[0], header[1], header[2], header[3]]));
    }

    let table_size = u32_at(&header, 4)?.wrapping_sub(SIZE_MASK) as usize;
    let table_zsize = u32_at(&header, 8)?.wrapping_sub(ZSIZE_MASK) as u64;
    let entry_count = u32_at(&header, 12)?.wrapping_sub(COUNT_MASK);

    let file_size = stream_len(io)?;
    let table_offset = file_size
        .checked_sub(table_zsize)
        .ok_or_else(|| DatError::EntryTableCorrupt("table larger than file".into()))?;

    io.seek(SeekFrom::Start(table_offset))?;
    let mut ztable = read_vec(io, table_zsize as usize)?;
    decrypt(&mut ztable, TABLE_PARAMS);
    let table = decompress(&ztable, table_size)?;

    let mut entries = Vec::with_capacity(entry_count as usize);
    let mut at = 0;
    for _ in 0..entry_count {
        let (name, _) = cstr_at(&table, at)?;
        at += padded_name_len(&name);
        let offset = u32_at(&table, at)?;
        let size = u32_at(&table, at + 4)?;
        let extra = u32_at(&table, at + 8)?;
        at += 12;
        entries.push(Entry {
            name,
            offset: u64::from(offset),
            size,
            zsize: 0,
            extra,
        });
    }

    entries.sort_by_key(|e| e.offset);
    let mut next = table_offset;
    for entry in entries.iter_mut().rev() {
        entry.zsize = (next - entry.offset) as u32;
        next = entry.offset;
    }

    Ok(entries)
}

pub(crate) fn create() -> Result<u64, DatError> {
    Ok(HEADER_SIZE)
}

pub(crate) fn read_entry<S: Stream>(
    version: Version,
    inner: &Mutex<Inner<S>>,
    entry: &Entry,
) -> Result<Vec<u8>, DatError> {
    let mut zdata = read_raw(inner, entry.offset, entry.zsize as usize)?;
    decrypt(&mut zdata, mainline_body_params(version, &entry.name));

    if entry.zsize == entry.size {
        return Ok(zdata);
    }

    let data = decompress(&zdata, entry.size as usize)?;
    if data.len() != entry.size as usize {
        return Err(DatError::CompressionUnderrun {
            wanted: entry.size as usize,
            got: data.len(),
        });
    }
    Ok(data)
}

pub(crate) fn write_entry<S: Stream>(
    version: Version,
    inner: &Mutex<Inner<S>>,
    name: &str,
    data: &[u8],
) -> Result<Placement, DatError> {
    let mut body = compress(data)?;
    // Store raw when compression does not shrink the body.
    if body.len() >= data.len() {
        body = data.to_vec();
    }

    encrypt(&mut body, mainline_body_params(version, name));

    let offset = append_raw(inner, &body)?;
    Ok(Placement {
        offset,
        size: data.len() as u32,
        zsize: body.len() as u32,
        extra: 0,
    })
}

pub(crate) fn close<S: Stream>(
    io: &mut S,
    entries: &[Entry],
    end_offset: u64,
) -> Result<(), DatError> {
    if entries.is_empty() {
        return Err(DatError::NoEntries);
    }

    let mut table = Vec::new();
    for entry in entries {
        let padded = padded_name_len(&entry.name);
        table.extend_from_slice(entry.name.as_bytes());
        table.resize(table.len() + padded - entry.name.len(), 0);
        put_u32(&mut table, entry.offset as u32);
        put_u32(&mut table, entry.size);
        put_u32(&mut table, 0);
    }

    let mut ztable = compress(&table)?;
    encrypt(&mut ztable, TABLE_PARAMS);
    io.seek(SeekFrom::Start(end_offset))?;
    io.write_all(&ztable)?;

    let mut header = Vec::with_capacity(HEADER_SIZE as usize);
    header.extend_from_slice(MAGIC);
    put_u32(&mut header, (table.len() as u32).wrapping_add(SIZE_MASK));
    put_u32(&mut header, (ztable.len() as u32).wrapping_add(ZSIZE_MASK));
    put_u32(&mut header, (entries.len() as u32).wrapping_add(COUNT_MASK));
    encrypt_interleaved(&mut header, HEADER_PARAMS);

    io.seek(SeekFrom::Start(0))?;
    io.write_all(&header)?;
    Ok(())
}
