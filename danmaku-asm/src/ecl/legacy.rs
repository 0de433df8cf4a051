//! Binary layout of the legacy stage-event scripts (releases 6 through 9).
//!
//! No container magic: a pair of 16-bit counts, an offset table whose
//! leading slots point at opaque extra blobs, then anonymous sub-programs
//! of 12-byte-header instructions ended by a sentinel.

use danmaku_types::Value;

use crate::ecl::{insert_labels, instr_size, read_params, write_param, EclProgram};
use crate::ir::{Instr, Node, Sub};
use crate::tables::ecl_format;
use crate::AsmError;

const INSTR_HEADER_SIZE: usize = 12;
const SENTINEL_OPCODE: u16 = 0xffff;

fn u16_at(data: &[u8], at: usize) -> Result<u16, AsmError> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| AsmError::Corrupt(format!("truncated image at {at}")))
}

fn u32_at(data: &[u8], at: usize) -> Result<u32, AsmError> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| AsmError::Corrupt(format!("truncated image at {at}")))
}

/// Offset-table slots reserved ahead of the sub offsets.
fn extra_slots(version: u32, extra_count: usize) -> usize {
    match version {
        6 => 3,
        9 => extra_count,
        _ => 16,
    }
}

fn has_magic_word(version: u32) -> bool {
    version >= 8
}

fn read_sub(version: u32, data: &[u8], index: usize, start: usize, end: usize) -> Result<Sub, AsmError> {
    let mut sub = Sub::named(format!("Sub{index}"));
    sub.offset = start as u32;

    let end = end.min(data.len());
    let mut time = 0i32;
    let mut rank = 0xffu8;
    let mut pos = start;
    let mut end_of_instrs = pos;

    while pos + INSTR_HEADER_SIZE <= end {
        let instr_time = u32_at(data, pos)? as i32;
        let opcode = u16_at(data, pos + 4)?;
        let size = u16_at(data, pos + 6)? as usize;
        let raw_rank = u16_at(data, pos + 8)?;
        let stack_mask = u16_at(data, pos + 10)?;

        if (instr_time == -1 && opcode == SENTINEL_OPCODE) || size == 0 {
            pos += size.max(INSTR_HEADER_SIZE);
            break;
        }
        if size < INSTR_HEADER_SIZE || pos + size > end {
            return Err(AsmError::Corrupt(format!(
                "{}: instruction size {size} at {pos} escapes the sub",
                sub.name
            )));
        }

        // The wire keeps the rank in the high byte; the oldest release only
        // has the four difficulty bits, its auxiliary bits read as set.
        let mut instr_rank = (raw_rank >> 8) as u8;
        if version == 6 {
            instr_rank |= 0xf0;
        }

        if instr_time != time {
            sub.nodes.push(Node::Time(instr_time));
            time = instr_time;
        }
        if instr_rank != rank {
            sub.nodes.push(Node::Rank(instr_rank));
            rank = instr_rank;
        }

        let body = &data[pos + INSTR_HEADER_SIZE..pos + size];
        let params = match ecl_format(version, opcode) {
            Some(format) => read_params(body, format, u32::from(stack_mask))?,
            None => {
                tracing::warn!(opcode, version, "opcode not in the format table, keeping raw");
                vec![crate::ir::Param::new(crate::ecl::RAW_TAG, Value::Blob(body.to_vec()))]
            }
        };

        sub.nodes.push(Node::Instr(Instr {
            opcode,
            time: instr_time,
            rank: instr_rank,
            params,
            offset: (pos - start) as u32,
        }));

        pos += size;
        end_of_instrs = pos;
    }

    insert_labels(&mut sub, (end_of_instrs - start) as u32);
    Ok(sub)
}

pub(crate) fn read(version: u32, data: &[u8]) -> Result<EclProgram, AsmError> {
    let base = if has_magic_word(version) { 4 } else { 0 };

    let sub_count = u16_at(data, base)? as usize;
    let extra_count = u16_at(data, base + 2)? as usize;
    let slots = extra_slots(version, extra_count);

    let offsets_at = base + 4;
    let mut offsets = Vec::with_capacity(slots + sub_count);
    for i in 0..slots + sub_count {
        offsets.push(u32_at(data, offsets_at + i * 4)? as usize);
    }

    let mut subs = Vec::with_capacity(sub_count);
    for i in 0..sub_count {
        let start = offsets[slots + i];
        let end = offsets.get(slots + i + 1).copied().unwrap_or(data.len());
        // The last sub runs to the first extra blob, or to end of file.
        let end = if i + 1 == sub_count {
            offsets[..slots].iter().copied().filter(|&o| o != 0).min().unwrap_or(data.len())
        } else {
            end
        };
        subs.push(read_sub(version, data, i + 1, start, end)?);
    }

    // Extra blobs span from their offset to the next used slot.
    let mut extras = Vec::new();
    let used: Vec<usize> = offsets[..slots].iter().copied().filter(|&o| o != 0).collect();
    for (i, &start) in used.iter().enumerate() {
        let end = used.get(i + 1).copied().unwrap_or(data.len());
        let blob = data
            .get(start..end)
            .ok_or_else(|| AsmError::Corrupt("extra blob out of range".into()))?;
        extras.push(blob.to_vec());
    }

    Ok(EclProgram {
        version,
        anim_refs: Vec::new(),
        ecli_refs: Vec::new(),
        subs,
        extras,
    })
}

pub(crate) fn bind_offsets(version: u32, sub: &mut Sub) {
    sub.labels.clear();
    let mut offset = 0u32;
    let mut time = 0i32;
    let mut labels = Vec::new();
    for node in sub.nodes.iter_mut() {
        match node {
            Node::Instr(instr) => {
                instr.offset = offset;
                offset += instr_size(version, instr) as u32;
                time = instr.time;
            }
            Node::Time(t) => time = *t,
            Node::Label(name) => labels.push(crate::ir::Label { name: name.clone(), offset, time }),
            Node::Rank(_) => {}
        }
    }
    sub.labels = labels;
}

fn serialize_instr(version: u32, sub: &Sub, instr: &Instr, out: &mut Vec<u8>) -> Result<(), AsmError> {
    let size = instr_size(version, instr);
    let mut raw_rank = u16::from(instr.rank) << 8;
    if version == 6 {
        raw_rank &= 0x0f00;
    }

    out.extend_from_slice(&instr.time.to_le_bytes());
    out.extend_from_slice(&instr.opcode.to_le_bytes());
    out.extend_from_slice(&(size as u16).to_le_bytes());
    out.extend_from_slice(&raw_rank.to_le_bytes());
    out.extend_from_slice(&instr.stack_ref_mask().to_le_bytes());
    for param in &instr.params {
        if param.tag == crate::ecl::RAW_TAG {
            param.value.to_data(out);
        } else {
            write_param(out, sub, instr, param)?;
        }
    }
    Ok(())
}

fn push_sentinel(out: &mut Vec<u8>) {
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&SENTINEL_OPCODE.to_le_bytes());
    out.extend_from_slice(&(INSTR_HEADER_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&0xff00u16.to_le_bytes());
    out.extend_from_slice(&0x00ffu16.to_le_bytes());
}

pub(crate) fn write(program: &EclProgram) -> Result<Vec<u8>, AsmError> {
    let version = program.version;
    let slots = extra_slots(version, program.extras.len());
    let base = if has_magic_word(version) { 4 } else { 0 };
    let header_size = base + 4 + (slots + program.subs.len()) * 4;

    let mut out = vec![0u8; header_size];
    let mut offsets = vec![0u32; slots + program.subs.len()];

    let mut subs = program.subs.clone();
    for (i, sub) in subs.iter_mut().enumerate() {
        bind_offsets(version, sub);
        offsets[slots + i] = out.len() as u32;
        for node in &sub.nodes {
            if let Node::Instr(instr) = node {
                serialize_instr(version, sub, instr, &mut out)?;
            }
        }
        push_sentinel(&mut out);
    }

    for (i, extra) in program.extras.iter().enumerate() {
        if i < slots {
            offsets[i] = out.len() as u32;
        }
        out.extend_from_slice(extra);
    }

    if has_magic_word(version) {
        let magic: u32 = if version == 9 { 0x0900 } else { 0x0800 };
        out[0..4].copy_from_slice(&magic.to_le_bytes());
    }
    let extra_count = if version == 6 { 0 } else { program.extras.len() as u16 };
    out[base..base + 2].copy_from_slice(&(subs.len() as u16).to_le_bytes());
    out[base + 2..base + 4].copy_from_slice(&extra_count.to_le_bytes());
    for (i, offset) in offsets.iter().enumerate() {
        let at = base + 4 + i * 4;
        out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    }

    Ok(out)
}
