//! The stage-event script language.
//!
//! Two on-disk layouts exist: the legacy one (releases 6 through 9,
//! 12-byte instruction headers, anonymous sub-programs reached through an
//! offset table) and the mainline one (release 10 on, `SCPT` container
//! with include lists and named subs, 16-byte instruction headers).

mod legacy;
mod mainline;
pub(crate) mod parse;
pub(crate) mod print;

use danmaku_types::{Value, ValueError, Version};

use crate::ir::{Instr, Label, Node, Param, Sub};
use crate::tables::{ecl_format, ecl_is_mainline};
use crate::{AsmError, MnemonicMap};

/// A parsed or disassembled stage-event program.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EclProgram {
    /// Game version number.
    pub version: u32,
    /// Animation files the script pulls in.
    pub anim_refs: Vec<String>,
    /// Other scripts the script pulls in.
    pub ecli_refs: Vec<String>,
    /// Sub-programs in file order.
    pub subs: Vec<Sub>,
    /// Opaque trailing blobs of the legacy layout.
    pub extras: Vec<Vec<u8>>,
}

impl EclProgram {
    /// Disassemble a program byte image.
    pub fn read(version: Version, data: &[u8]) -> Result<EclProgram, AsmError> {
        let version = version.number();
        if ecl_is_mainline(version) {
            mainline::read(version, data)
        } else {
            legacy::read(version, data)
        }
    }

    /// Serialise back to the version's byte layout.
    pub fn write(&self) -> Result<Vec<u8>, AsmError> {
        if ecl_is_mainline(self.version) {
            mainline::write(self)
        } else {
            legacy::write(self)
        }
    }

    /// Render as textual source.
    pub fn dump(&self, map: Option<&MnemonicMap>) -> String {
        print::dump(self, map)
    }

    /// Compile textual source.
    pub fn parse(
        version: Version,
        source: &str,
        map: Option<&MnemonicMap>,
    ) -> Result<EclProgram, AsmError> {
        parse::parse(version.number(), source, map)
    }
}

/// Instruction header size for a version.
pub(crate) fn header_size(version: u32) -> usize {
    if ecl_is_mainline(version) {
        16
    } else {
        12
    }
}

/// The scramble applied to `x`-tagged strings on the wire.
pub(crate) fn xor_string(data: &mut [u8]) {
    let (mut key, mut step, step2) = (0x77u8, 7u8, 16u8);
    for b in data.iter_mut() {
        *b ^= key;
        key = key.wrapping_add(step);
        step = step.wrapping_add(step2);
    }
}

/// Raw parameter tag: bytes carried verbatim when no format is known.
pub(crate) const RAW_TAG: char = '@';

fn padded_string_len(len: usize) -> usize {
    len + (4 - len % 4)
}

/// Byte width of one parameter on the wire.
pub(crate) fn param_size(param: &Param) -> usize {
    match param.tag {
        'o' | 't' | 'n' | 'N' => 4,
        'D' => 8,
        'm' | 'x' => {
            let len = param.value.as_str().map(str::len).unwrap_or(0);
            4 + padded_string_len(len)
        }
        _ => param.value.wire_size(),
    }
}

/// Full encoded size of one instruction.
pub(crate) fn instr_size(version: u32, instr: &Instr) -> usize {
    header_size(version) + instr.params.iter().map(param_size).sum::<usize>()
}

/// Decode one parameter value at the front of `data`.
///
/// Wraps the plain value codec with the bytecode-only tags: `o`, `t`, `n`
/// and `N` ride as 32-bit words, `D` is a typed word pair, `m`/`x` are
/// length-prefixed NUL-padded strings (`x` scrambled on the wire).
pub(crate) fn read_value(data: &[u8], tag: char) -> Result<(Value, usize), ValueError> {
    match tag {
        'o' | 't' | 'n' | 'N' => Value::from_data(data, 'S'),
        'D' => {
            if data.len() < 8 {
                return Err(ValueError::ShortRead { tag, wanted: 8, remaining: data.len() });
            }
            Ok((Value::Blob(data[..8].to_vec()), 8))
        }
        'm' | 'x' => {
            if data.len() < 4 {
                return Err(ValueError::ShortRead { tag, wanted: 4, remaining: data.len() });
            }
            let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            let body = data.get(4..4 + len).ok_or(ValueError::ShortRead {
                tag,
                wanted: 4 + len,
                remaining: data.len(),
            })?;
            let mut body = body.to_vec();
            if tag == 'x' {
                xor_string(&mut body);
            }
            let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
            let text = String::from_utf8_lossy(&body[..end]).into_owned();
            Ok((Value::Str(text), 4 + len))
        }
        _ => Value::from_data(data, tag),
    }
}

/// Decode an instruction body against its format string, pairing each
/// value with its stack-reference bit.
pub(crate) fn read_params(
    data: &[u8],
    format: &str,
    mut stack_mask: u32,
) -> Result<Vec<Param>, AsmError> {
    let values = Value::list_from_data(read_value, data, format)?;

    // Re-expand the format so every value knows its tag.
    let tags = expand_format(format, values.len());

    Ok(values
        .into_iter()
        .zip(tags)
        .map(|(value, tag)| {
            let stack = stack_mask & 1 != 0;
            stack_mask >>= 1;
            Param { tag, value, stack }
        })
        .collect())
}

/// Append one parameter's wire encoding, resolving label references
/// against the sub-program's bound labels.
pub(crate) fn write_param(
    out: &mut Vec<u8>,
    sub: &Sub,
    instr: &Instr,
    param: &Param,
) -> Result<(), AsmError> {
    match param.tag {
        'o' => {
            let delta = match &param.value {
                Value::Str(name) => {
                    let label = sub.find_label(name).ok_or_else(|| AsmError::UnresolvedLabel {
                        sub: sub.name.clone(),
                        label: name.clone(),
                    })?;
                    label.offset as i32 - instr.offset as i32
                }
                other => other.as_int().unwrap_or(0),
            };
            out.extend_from_slice(&delta.to_le_bytes());
        }
        't' => {
            let time = match &param.value {
                Value::Str(name) => {
                    let label = sub.find_label(name).ok_or_else(|| AsmError::UnresolvedLabel {
                        sub: sub.name.clone(),
                        label: name.clone(),
                    })?;
                    label.time
                }
                other => other.as_int().unwrap_or(0),
            };
            out.extend_from_slice(&time.to_le_bytes());
        }
        'n' | 'N' => {
            let id = param.value.as_int().unwrap_or(0);
            out.extend_from_slice(&id.to_le_bytes());
        }
        'm' | 'x' => {
            let text = param.value.as_str().unwrap_or("");
            let padded = padded_string_len(text.len());
            out.extend_from_slice(&(padded as u32).to_le_bytes());
            let mut body = vec![0u8; padded];
            body[..text.len()].copy_from_slice(text.as_bytes());
            if param.tag == 'x' {
                xor_string(&mut body);
            }
            out.extend_from_slice(&body);
        }
        _ => param.value.to_data(out),
    }
    Ok(())
}

/// Look an opcode's format up, or fail the way assembly must.
pub(crate) fn require_format(version: u32, opcode: u16) -> Result<&'static str, AsmError> {
    ecl_format(version, opcode).ok_or(AsmError::UnknownOpcode { opcode, version })
}

/// Expand a format string against an argument count: `*X` repeats for the
/// remaining arguments, `?X` is included only when an argument is there
/// for it. The caller compares lengths for the arity check.
pub(crate) fn expand_format(format: &str, argc: usize) -> Vec<char> {
    let mut expected = Vec::new();
    let mut repeat_tag = None;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => repeat_tag = chars.next(),
            '?' => {
                if let Some(tag) = chars.next() {
                    if expected.len() < argc {
                        expected.push(tag);
                    }
                }
            }
            tag => expected.push(tag),
        }
    }
    if let Some(tag) = repeat_tag {
        while expected.len() < argc {
            expected.push(tag);
        }
    }
    expected
}

/// Insert a label node in front of every jump target of the sub-program
/// and rewrite `o` parameters to name them.
///
/// A target equal to `end_offset` binds to a label appended after the
/// last instruction.
pub(crate) fn insert_labels(sub: &mut Sub, end_offset: u32) {
    use std::collections::BTreeSet;

    let mut targets: BTreeSet<u32> = BTreeSet::new();
    for instr in sub.instrs() {
        for param in &instr.params {
            if param.tag == 'o' {
                if let Some(delta) = param.value.as_int() {
                    targets.insert(instr.offset.wrapping_add_signed(delta));
                }
            }
        }
    }
    if targets.is_empty() {
        return;
    }

    let label_name = |offset: u32| format!("{}_{}", sub.name, offset);

    let mut nodes = Vec::with_capacity(sub.nodes.len() + targets.len());
    let mut time = 0i32;
    for node in sub.nodes.drain(..) {
        if let Node::Instr(instr) = &node {
            if targets.remove(&instr.offset) {
                sub.labels.push(Label {
                    name: label_name(instr.offset),
                    offset: instr.offset,
                    time: instr.time,
                });
                nodes.push(Node::Label(label_name(instr.offset)));
            }
        }
        if let Node::Time(t) = &node {
            time = *t;
        }
        nodes.push(node);
    }
    if targets.remove(&end_offset) {
        sub.labels.push(Label { name: label_name(end_offset), offset: end_offset, time });
        nodes.push(Node::Label(label_name(end_offset)));
    }
    for stray in targets {
        tracing::warn!(sub = %sub.name, offset = stray, "jump target inside no instruction");
    }
    sub.nodes = nodes;

    // Jump parameters now name their labels instead of raw deltas.
    for node in sub.nodes.iter_mut() {
        if let Node::Instr(instr) = node {
            let base = instr.offset;
            for param in instr.params.iter_mut() {
                if param.tag == 'o' {
                    if let Some(delta) = param.value.as_int() {
                        param.value = Value::Str(format!("{}_{}", sub.name, base.wrapping_add_signed(delta)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_sizes_follow_the_value_table() {
        let instr = Instr {
            opcode: 12,
            time: 0,
            rank: 0xff,
            params: vec![
                Param::new('o', Value::Str("x".into())),
                Param::new('S', Value::I32(3)),
            ],
            offset: 0,
        };
        assert_eq!(instr_size(10, &instr), 16 + 8);
        assert_eq!(instr_size(6, &instr), 12 + 8);
    }

    #[test]
    fn string_params_carry_a_padded_length_prefix() {
        let mut out = Vec::new();
        let sub = Sub::named("s");
        let instr = Instr { opcode: 0, time: 0, rank: 0xff, params: vec![], offset: 0 };
        let param = Param::new('m', Value::Str("abcd".into()));
        write_param(&mut out, &sub, &instr, &param).unwrap();
        // Length rounds 4 up to 8: the terminator always fits.
        assert_eq!(&out[..4], &8u32.to_le_bytes());
        assert_eq!(out.len(), 12);

        let (value, consumed) = read_value(&out, 'm').unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(value, Value::Str("abcd".into()));
    }

    #[test]
    fn scrambled_strings_round_trip() {
        let mut out = Vec::new();
        let sub = Sub::named("s");
        let instr = Instr { opcode: 0, time: 0, rank: 0xff, params: vec![], offset: 0 };
        let param = Param::new('x', Value::Str("secret".into()));
        write_param(&mut out, &sub, &instr, &param).unwrap();
        // Not stored in the clear.
        assert!(!out.windows(6).any(|w| w == b"secret"));

        let (value, _) = read_value(&out, 'x').unwrap();
        assert_eq!(value, Value::Str("secret".into()));
    }

    #[test]
    fn labels_bind_to_jump_targets() {
        let mut sub = Sub::named("Main");
        sub.nodes = vec![
            Node::Instr(Instr {
                opcode: 12,
                time: 0,
                rank: 0xff,
                params: vec![Param::new('o', Value::I32(24)), Param::new('S', Value::I32(0))],
                offset: 16,
            }),
            Node::Instr(Instr { opcode: 0, time: 0, rank: 0xff, params: vec![], offset: 40 }),
        ];
        insert_labels(&mut sub, 56);

        assert_eq!(sub.labels.len(), 1);
        assert_eq!(sub.labels[0].offset, 40);
        assert!(matches!(&sub.nodes[1], Node::Label(name) if name == "Main_40"));
        let jump = sub.instrs().next().unwrap();
        assert_eq!(jump.params[0].value, Value::Str("Main_40".into()));
    }
}
