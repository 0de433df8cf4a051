//! The `PBGZ` family. Each body carries a four-byte `edz` marker naming the
//! crypt schedule it was scrambled with (selected by filename extension at
//! write time), the scrambled body is then LZSS-compressed. The entry table
//! is LZSS-compressed and ladder-scrambled; three header fields hide behind
//! additive masks.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use danmaku_types::Version;

use crate::archive::{append_raw, read_raw, Entry, Inner, Placement, Stream};
use crate::crypt::{
    decrypt, encrypt, ExtParams, MARKED_HEADER_PARAMS, MARKED_TABLE_PARAMS, TH08_EXT_PARAMS,
    TH09_EXT_PARAMS,
};
use crate::lzss::{compress, decompress};
use crate::wire::{cstr_at, put_u32, read_vec, stream_len, u32_at};
use crate::DatError;

const MAGIC: &[u8; 4] = b"PBGZ";
const HEADER_SIZE: u64 = 16;
const MARKER: &[u8; 3] = b"edz";

const COUNT_MASK: u32 = 123456;
const OFFSET_MASK: u32 = 345678;
const SIZE_MASK: u32 = 567891;

fn ext_params(version: Version) -> &'static [ExtParams; 7] {
    if version == Version::Th08 {
        &TH08_EXT_PARAMS
    } else {
        &TH09_EXT_PARAMS
    }
}

fn params_by_type(version: Version, type_char: u8) -> Result<ExtParams, DatError> {
    ext_params(version)
        .iter()
        .find(|p| p.type_char == type_char)
        .copied()
        .ok_or(DatError::CryptParameterMissing(char::from(type_char)))
}

fn params_by_name(version: Version, name: &str) -> ExtParams {
    let table = ext_params(version);
    let lower = name.to_ascii_lowercase();
    table
        .iter()
        .skip(1)
        .find(|p| lower.ends_with(p.ext))
        .copied()
        .unwrap_or(table[0])
}

pub(crate) fn open<S: Stream>(version: Version, io: &mut S) -> Result<Vec<Entry>, DatError> {
    let _ = version;
    let file_size = stream_len(io)?;
    io.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_SIZE as usize];
    io.read_exact(&mut header)?;
    if &header[..4] != MAGIC {
        return Err(DatError::InvalidMagic([header[0], header[1], header[2], header[3]]));
    }

    decrypt(&mut header[4..], MARKED_HEADER_PARAMS);
    let entry_count = u32_at(&header, 4)?.wrapping_sub(COUNT_MASK);
    let table_offset = u64::from(u32_at(&header, 8)?.wrapping_sub(OFFSET_MASK));
    let table_size = u32_at(&header, 12)?.wrapping_sub(SIZE_MASK) as usize;

    io.seek(SeekFrom::Start(table_offset))?;
    let mut ztable = read_vec(io, (file_size - table_offset) as usize)?;
    decrypt(&mut ztable, MARKED_TABLE_PARAMS);
    let table = decompress(&ztable, table_size)?;

    let mut entries = Vec::with_capacity(entry_count as usize);
    let mut at = 0;
    for _ in 0..entry_count {
        let (name, consumed) = cstr_at(&table, at)?;
        at += consumed;
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
    let zdata = read_raw(inner, entry.offset, entry.zsize as usize)?;
    let mut data = decompress(&zdata, entry.size as usize)?;
    if data.len() != entry.size as usize {
        return Err(DatError::CompressionUnderrun {
            wanted: entry.size as usize,
            got: data.len(),
        });
    }

    if data.len() < 4 || &data[..3] != MARKER {
        return Err(DatError::EntryTableCorrupt(format!(
            "entry {}: incorrect body marker",
            entry.name
        )));
    }

    let params = params_by_type(version, data[3])?;
    decrypt(&mut data[4..], params.params);
    data.drain(..4);
    Ok(data)
}

pub(crate) fn write_entry<S: Stream>(
    version: Version,
    inner: &Mutex<Inner<S>>,
    name: &str,
    data: &[u8],
) -> Result<Placement, DatError> {
    let params = params_by_name(version, name);

    let mut body = Vec::with_capacity(data.len() + 4);
    body.extend_from_slice(MARKER);
    body.push(params.type_char);
    body.extend_from_slice(data);
    encrypt(&mut body[4..], params.params);

    let zdata = compress(&body)?;
    let offset = append_raw(inner, &zdata)?;
    Ok(Placement {
        offset,
        size: body.len() as u32,
        zsize: zdata.len() as u32,
        extra: 0,
    })
}

pub(crate) fn close<S: Stream>(
    io: &mut S,
    entries: &[Entry],
    end_offset: u64,
) -> Result<(), DatError> {
    let mut table = Vec::new();
    for entry in entries {
        table.extend_from_slice(entry.name.as_bytes());
        table.push(0);
        put_u32(&mut table, entry.offset as u32);
        put_u32(&mut table, entry.size);
        put_u32(&mut table, 0);
    }
    put_u32(&mut table, 0);

    let mut ztable = compress(&table)?;
    encrypt(&mut ztable, MARKED_TABLE_PARAMS);
    io.seek(SeekFrom::Start(end_offset))?;
    io.write_all(&ztable)?;

    let mut header = Vec::with_capacity(HEADER_SIZE as usize);
    header.extend_from_slice(MAGIC);
    put_u32(&mut header, (entries.len() as u32).wrapping_add(COUNT_MASK));
    put_u32(&mut header, (end_offset as u32).wrapping_add(OFFSET_MASK));
    put_u32(&mut header, (table.len() as u32).wrapping_add(SIZE_MASK));
    encrypt(&mut header[4..], MARKED_HEADER_PARAMS);

    io.seek(SeekFrom::Start(0))?;
    io.write_all(&header)?;
    Ok(())
}
