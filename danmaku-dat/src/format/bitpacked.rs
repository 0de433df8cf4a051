//! The `PBG3`/`PBG4` family. Bodies are always LZSS-compressed and never
//! crypted. The older layout stores its counts, offsets and the entry
//! table as bit-packed integers (a 2-bit byte-count prefix followed by
//! that many bytes); the newer layout LZSS-compresses a flat table.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use danmaku_types::{BitReader, BitWriter, Version};

use crate::archive::{append_raw, read_raw, Entry, Inner, Placement, Stream};
use crate::lzss::{compress, decompress};
use crate::wire::{cstr_at, put_u32, read_vec, stream_len, u32_at};
use crate::DatError;

const MAGIC_PACKED: &[u8; 4] = b"PBG3";
const MAGIC_FLAT: &[u8; 4] = b"PBG4";

/// Largest possible bit-packed header: magic plus two 4-byte integers with
/// their 2-bit prefixes, rounded up. Creation reserves this much.
const PACKED_HEADER_RESERVE: u64 = 13;
const FLAT_HEADER_SIZE: u64 = 16;

fn packed(version: Version) -> bool {
    version == Version::Th06
}

/// Read a bit-packed u32: 2 bits of (byte count - 1), then the bytes.
fn read_packed_u32<R: Read>(bits: &mut BitReader<R>) -> Result<u32, DatError> {
    let size = bits.read(2)?;
    Ok(bits.read((size + 1) * 8)?)
}

/// Write a bit-packed u32 in the fewest bytes that hold it.
fn write_packed_u32<W: Write>(bits: &mut BitWriter<W>, value: u32) -> Result<(), DatError> {
    let size = match value {
        0..=0xff => 1u32,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    bits.write(2, size - 1)?;
    bits.write(size * 8, value)?;
    Ok(())
}

fn read_packed_name<R: Read>(bits: &mut BitReader<R>) -> Result<String, DatError> {
    let mut name = Vec::new();
    loop {
        let b = bits.read(8)? as u8;
        if b == 0 {
            break;
        }
        name.push(b);
        if name.len() >= 255 {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&name).into_owned())
}

pub(crate) fn open<S: Stream>(version: Version, io: &mut S) -> Result<Vec<Entry>, DatError> {
    let mut magic = [0u8; 4];
    io.read_exact(&mut magic)?;

    let mut entries = Vec::new();
    let table_offset;

    if &magic == MAGIC_PACKED {
        let mut bits = BitReader::new(&mut *io);
        let entry_count = read_packed_u32(&mut bits)?;
        table_offset = u64::from(read_packed_u32(&mut bits)?);

        io.seek(SeekFrom::Start(table_offset))?;
        let mut bits = BitReader::new(&mut *io);
        for _ in 0..entry_count {
            // Two fields of unknown meaning precede the checksum.
            let _ = read_packed_u32(&mut bits)?;
            let _ = read_packed_u32(&mut bits)?;
            let extra = read_packed_u32(&mut bits)?;
            let offset = read_packed_u32(&mut bits)?;
            let size = read_packed_u32(&mut bits)?;
            let name = read_packed_name(&mut bits)?;
            entries.push(Entry {
                name,
                offset: u64::from(offset),
                size,
                zsize: 0,
                extra,
            });
        }
    } else if &magic == MAGIC_FLAT {
        let header = read_vec(io, 12)?;
        let entry_count = u32_at(&header, 0)?;
        table_offset = u64::from(u32_at(&header, 4)?);
        let table_size = u32_at(&header, 8)? as usize;

        let end = stream_len(io)?;
        io.seek(SeekFrom::Start(table_offset))?;
        let ztable = read_vec(io, (end - table_offset) as usize)?;
        let table = decompress(&ztable, table_size)?;

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
    } else {
        return Err(DatError::InvalidMagic(magic));
    }

    // Stored sizes are implicit: each entry runs to its neighbour's offset,
    // the last to the start of the entry table.
    entries.sort_by_key(|e| e.offset);
    let mut next = table_offset;
    for entry in entries.iter_mut().rev() {
        entry.zsize = (next - entry.offset) as u32;
        next = entry.offset;
    }

    Ok(entries)
}

pub(crate) fn create(version: Version) -> Result<u64, DatError> {
    Ok(if packed(version) {
        PACKED_HEADER_RESERVE
    } else {
        FLAT_HEADER_SIZE
    })
}

pub(crate) fn read_entry<S: Stream>(
    inner: &Mutex<Inner<S>>,
    entry: &Entry,
) -> Result<Vec<u8>, DatError> {
    let zdata = read_raw(inner, entry.offset, entry.zsize as usize)?;
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
    data: &[u8],
) -> Result<Placement, DatError> {
    let zdata = compress(data)?;

    // The bit-packed layout checksums the compressed body.
    let extra = if packed(version) {
        zdata.iter().fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
    } else {
        0
    };

    let offset = append_raw(inner, &zdata)?;
    Ok(Placement {
        offset,
        size: data.len() as u32,
        zsize: zdata.len() as u32,
        extra,
    })
}

pub(crate) fn close<S: Stream>(
    version: Version,
    io: &mut S,
    entries: &[Entry],
    end_offset: u64,
) -> Result<(), DatError> {
    if packed(version) {
        io.seek(SeekFrom::Start(end_offset))?;
        let mut bits = BitWriter::new(&mut *io);
        for entry in entries {
            write_packed_u32(&mut bits, 0)?;
            write_packed_u32(&mut bits, 0)?;
            write_packed_u32(&mut bits, entry.extra)?;
            write_packed_u32(&mut bits, entry.offset as u32)?;
            write_packed_u32(&mut bits, entry.size)?;
            for b in entry.name.bytes() {
                bits.write(8, u32::from(b))?;
            }
            bits.write(8, 0)?;
        }
        bits.finish()?;

        io.seek(SeekFrom::Start(0))?;
        io.write_all(MAGIC_PACKED)?;
        let mut bits = BitWriter::new(&mut *io);
        write_packed_u32(&mut bits, entries.len() as u32)?;
        write_packed_u32(&mut bits, end_offset as u32)?;
        bits.finish()?;
    } else {
        let mut table = Vec::new();
        for entry in entries {
            table.extend_from_slice(entry.name.as_bytes());
            table.push(0);
            put_u32(&mut table, entry.offset as u32);
            put_u32(&mut table, entry.size);
            put_u32(&mut table, 0);
        }
        put_u32(&mut table, 0);

        let ztable = compress(&table)?;
        io.seek(SeekFrom::Start(end_offset))?;
        io.write_all(&ztable)?;

        io.seek(SeekFrom::Start(0))?;
        io.write_all(MAGIC_FLAT)?;
        let mut header = Vec::with_capacity(12);
        put_u32(&mut header, entries.len() as u32);
        put_u32(&mut header, end_offset as u32);
        put_u32(&mut header, table.len() as u32);
        io.write_all(&header)?;
    }

    Ok(())
}
