//! Binary layout of the mainline stage-event scripts (`SCPT`).

use danmaku_types::Value;

use crate::ecl::{insert_labels, instr_size, read_params, write_param, EclProgram};
use crate::ir::{Instr, Node, Sub};
use crate::tables::ecl_format;
use crate::AsmError;

const HEADER_SIZE: usize = 36;
const SUB_HEADER_SIZE: usize = 16;
const INSTR_HEADER_SIZE: usize = 16;
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

fn cstr_at(data: &[u8], at: usize) -> Result<(String, usize), AsmError> {
    let tail = data.get(at..).ok_or_else(|| AsmError::Corrupt("name out of range".into()))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| AsmError::Corrupt("unterminated name".into()))?;
    Ok((String::from_utf8_lossy(&tail[..end]).into_owned(), at + end + 1))
}

fn align4(at: usize) -> usize {
    (at + 3) & !3
}

/// Parse a `"XXXX" count names...` include list; returns the names and the
/// 4-aligned offset past them.
fn read_list(data: &[u8], at: usize, magic: &'static str) -> Result<(Vec<String>, usize), AsmError> {
    if data.get(at..at + 4) != Some(magic.as_bytes()) {
        return Err(AsmError::InvalidMagic(match magic {
            "ANIM" => "ANIM",
            _ => "ECLI",
        }));
    }
    let count = u32_at(data, at + 4)?;
    let mut names = Vec::with_capacity(count as usize);
    let mut pos = at + 8;
    for _ in 0..count {
        let (name, next) = cstr_at(data, pos)?;
        names.push(name);
        pos = next;
    }
    Ok((names, align4(pos)))
}

fn read_sub(version: u32, data: &[u8], name: String, start: usize, end: usize) -> Result<Sub, AsmError> {
    if data.get(start..start + 4) != Some(b"ECLH") {
        return Err(AsmError::InvalidMagic("ECLH"));
    }

    let mut sub = Sub::named(name);
    sub.offset = start as u32;

    let end = end.min(data.len());
    let mut time = 0i32;
    let mut rank = 0xffu8;
    let mut pos = start + SUB_HEADER_SIZE;
    let mut end_of_instrs = pos;

    while pos + INSTR_HEADER_SIZE <= end {
        let instr_time = u32_at(data, pos)? as i32;
        let opcode = u16_at(data, pos + 4)?;
        let size = u16_at(data, pos + 6)? as usize;
        let stack_mask = u16_at(data, pos + 8)?;
        let instr_rank = data[pos + 10];

        if opcode == SENTINEL_OPCODE {
            pos += size.max(INSTR_HEADER_SIZE);
            break;
        }
        if size < INSTR_HEADER_SIZE || pos + size > end {
            return Err(AsmError::Corrupt(format!(
                "{}: instruction size {size} at {pos} escapes the sub",
                sub.name
            )));
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

    // The stack-allocation instruction reveals the local frame size.
    let stack_size = sub
        .instrs()
        .find(|i| i.opcode == STACK_ALLOC_OPCODE)
        .and_then(|i| i.params.first())
        .and_then(|p| p.value.as_int());
    if let Some(size) = stack_size {
        sub.stack = size as u32;
    }

    insert_labels(&mut sub, (end_of_instrs - start) as u32);
    Ok(sub)
}

/// Call-like instructions name a sub and push its arguments; the callee's
/// arity falls out of the argument count. Disagreeing call sites are
/// diagnosed, not fatal.
fn note_arities(program: &mut EclProgram) {
    let mut observed: Vec<(String, u32)> = Vec::new();
    for sub in &program.subs {
        for instr in sub.instrs() {
            if !matches!(instr.opcode, CALL_OPCODE | CALL_ASYNC_OPCODE) {
                continue;
            }
            let Some(name) = instr.params.first().and_then(|p| p.value.as_str()) else {
                continue;
            };
            let arity = (instr.params.len() - 1) as u32;
            observed.push((name.to_owned(), arity));
        }
    }

    for (name, arity) in observed {
        let Some(sub) = program.subs.iter_mut().find(|s| s.name == name) else {
            continue;
        };
        match sub.arity {
            None => sub.arity = Some(arity),
            Some(previous) if previous != arity => {
                tracing::warn!(sub = %name, previous, arity, "arity mismatch between call sites");
            }
            Some(_) => {}
        }
    }
}

/// Opcode that reserves the sub-program's local stack.
const STACK_ALLOC_OPCODE: u16 = 40;
/// Opcodes that call a named sub with arguments.
const CALL_OPCODE: u16 = 11;
const CALL_ASYNC_OPCODE: u16 = 15;

pub(crate) fn read(version: u32, data: &[u8]) -> Result<EclProgram, AsmError> {
    if data.get(..4) != Some(b"SCPT") {
        return Err(AsmError::InvalidMagic("SCPT"));
    }

    let include_offset = u32_at(data, 8)? as usize;
    let sub_count = u32_at(data, 16)? as usize;

    let (anim_refs, pos) = read_list(data, include_offset, "ANIM")?;
    let (ecli_refs, pos) = read_list(data, pos, "ECLI")?;

    let mut sub_offsets = Vec::with_capacity(sub_count);
    for i in 0..sub_count {
        sub_offsets.push(u32_at(data, pos + i * 4)? as usize);
    }

    let mut name_pos = pos + sub_count * 4;
    let mut sub_names = Vec::with_capacity(sub_count);
    for _ in 0..sub_count {
        let (name, next) = cstr_at(data, name_pos)?;
        sub_names.push(name);
        name_pos = next;
    }

    let mut subs = Vec::with_capacity(sub_count);
    for (i, (offset, name)) in sub_offsets.iter().zip(sub_names).enumerate() {
        let end = sub_offsets.get(i + 1).copied().unwrap_or(data.len());
        subs.push(read_sub(version, data, name, *offset, end)?);
    }

    let mut program = EclProgram {
        version,
        anim_refs,
        ecli_refs,
        subs,
        extras: Vec::new(),
    };
    note_arities(&mut program);
    Ok(program)
}

/// Recompute instruction offsets and label bindings for one sub-program.
/// This is the first assembly pass; it also runs before serialising an
/// edited program so that offsets stay truthful.
pub(crate) fn bind_offsets(version: u32, sub: &mut Sub, base: u32) {
    sub.labels.clear();
    let mut offset = base;
    let mut time = 0i32;

    // Borrow dance: collect label bindings while walking mutably.
    let mut labels = Vec::new();
    for node in sub.nodes.iter_mut() {
        match node {
            Node::Instr(instr) => {
                instr.offset = offset;
                offset += instr_size(version, instr) as u32;
                time = instr.time;
                if instr.opcode == STACK_ALLOC_OPCODE {
                    if let Some(size) = instr.params.first().and_then(|p| p.value.as_int()) {
                        sub.stack = size as u32;
                    }
                }
            }
            Node::Time(t) => time = *t,
            Node::Label(name) => {
                labels.push(crate::ir::Label { name: name.clone(), offset, time });
            }
            Node::Rank(_) => {}
        }
    }
    sub.labels = labels;
}

fn serialize_instr(version: u32, sub: &Sub, instr: &Instr, out: &mut Vec<u8>) -> Result<(), AsmError> {
    let size = instr_size(version, instr);
    out.extend_from_slice(&instr.time.to_le_bytes());
    out.extend_from_slice(&instr.opcode.to_le_bytes());
    out.extend_from_slice(&(size as u16).to_le_bytes());
    out.extend_from_slice(&instr.stack_ref_mask().to_le_bytes());
    out.push(instr.rank);
    out.push(instr.params.len() as u8);
    out.extend_from_slice(&0u32.to_le_bytes());
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
    out.extend_from_slice(&0u16.to_le_bytes());
    out.push(0xff);
    out.push(0);
    out.extend_from_slice(&0u32.to_le_bytes());
}

pub(crate) fn write(program: &EclProgram) -> Result<Vec<u8>, AsmError> {
    let mut out = vec![0u8; HEADER_SIZE];

    // Include lists, 4-aligned.
    out.extend_from_slice(b"ANIM");
    out.extend_from_slice(&(program.anim_refs.len() as u32).to_le_bytes());
    for name in &program.anim_refs {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out.resize(align4(out.len()), 0);

    out.extend_from_slice(b"ECLI");
    out.extend_from_slice(&(program.ecli_refs.len() as u32).to_le_bytes());
    for name in &program.ecli_refs {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out.resize(align4(out.len()), 0);

    let include_length = (out.len() - HEADER_SIZE) as u16;
    let offsets_at = out.len();
    out.resize(out.len() + program.subs.len() * 4, 0);

    for sub in &program.subs {
        out.extend_from_slice(sub.name.as_bytes());
        out.push(0);
    }
    out.resize(align4(out.len()), 0);

    let mut subs = program.subs.clone();
    let mut sub_offsets = Vec::with_capacity(subs.len());
    for sub in subs.iter_mut() {
        bind_offsets(program.version, sub, SUB_HEADER_SIZE as u32);
        sub_offsets.push(out.len() as u32);

        out.extend_from_slice(b"ECLH");
        out.extend_from_slice(&(SUB_HEADER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());

        for node in &sub.nodes {
            if let Node::Instr(instr) = node {
                serialize_instr(program.version, sub, instr, &mut out)?;
            }
        }
        push_sentinel(&mut out);
    }

    // Finalise the header and the sub offset table.
    out[0..4].copy_from_slice(b"SCPT");
    out[4..6].copy_from_slice(&1u16.to_le_bytes());
    out[6..8].copy_from_slice(&include_length.to_le_bytes());
    out[8..12].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    out[16..20].copy_from_slice(&(program.subs.len() as u32).to_le_bytes());
    for (i, offset) in sub_offsets.iter().enumerate() {
        let at = offsets_at + i * 4;
        out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    }

    Ok(out)
}

