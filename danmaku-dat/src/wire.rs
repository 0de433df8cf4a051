//! Little-endian slice and stream helpers shared by the format modules.

use std::io::{Read, Seek, SeekFrom};

use crate::DatError;

pub(crate) fn u16_at(data: &[u8], off: usize) -> Result<u16, DatError> {
    let bytes = data
        .get(off..off + 2)
        .ok_or(DatError::ShortRead { wanted: off + 2, got: data.len() })?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn u32_at(data: &[u8], off: usize) -> Result<u32, DatError> {
    let bytes = data
        .get(off..off + 4)
        .ok_or(DatError::ShortRead { wanted: off + 4, got: data.len() })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// NUL-terminated string at `off`; returns the text and the bytes consumed
/// including the terminator.
pub(crate) fn cstr_at(data: &[u8], off: usize) -> Result<(String, usize), DatError> {
    let tail = data
        .get(off..)
        .ok_or(DatError::ShortRead { wanted: off, got: data.len() })?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DatError::EntryTableCorrupt("unterminated name".into()))?;
    Ok((String::from_utf8_lossy(&tail[..end]).into_owned(), end + 1))
}

pub(crate) fn read_vec<S: Read>(io: &mut S, len: usize) -> Result<Vec<u8>, DatError> {
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn stream_len<S: Seek>(io: &mut S) -> Result<u64, DatError> {
    Ok(io.seek(SeekFrom::End(0))?)
}
