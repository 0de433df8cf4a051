//! Textual rendering of stage-event programs.

use std::fmt::Write;

use danmaku_types::Value;

use crate::ecl::{EclProgram, RAW_TAG};
use crate::ir::{rank_to_text, Node, Param};
use crate::text::quote;
use crate::MnemonicMap;

/// Render a register-reference parameter. Named registers come from the
/// mnemonic map; non-negative multiples of four map onto the letter
/// variables; anything else keeps the bracket form.
pub(crate) fn stack_to_text(param: &Param, map: Option<&MnemonicMap>) -> String {
    let (id, sigil) = match &param.value {
        Value::F32(v) => (*v as i32, '%'),
        other => (other.as_int().unwrap_or(0), '$'),
    };

    if let Some(name) = map.and_then(|m| m.gvar_name(id)) {
        return format!("{sigil}{name}");
    }
    if id >= 0 && id % 4 == 0 && id / 4 < 26 {
        let letter = char::from(b'A' + (id / 4) as u8);
        return format!("{sigil}{letter}");
    }
    format!("[{}]", param.value.to_text())
}

/// Decode a typed word pair into its cast form and payload text.
pub(crate) fn d_to_text(blob: &[u8]) -> String {
    if blob.len() == 8 {
        let kind = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
        let word = [blob[4], blob[5], blob[6], blob[7]];
        match kind {
            0x6969 => return format!("_SS {}", i32::from_le_bytes(word)),
            0x6669 => return format!("_Sf {}", i32::from_le_bytes(word)),
            0x6966 => return format!("_fS {}", Value::F32(f32::from_le_bytes(word)).to_text()),
            0x6666 => return format!("_ff {}", Value::F32(f32::from_le_bytes(word)).to_text()),
            _ => {}
        }
    }
    format!("@{}", quote(&hex::encode(blob)))
}

pub(crate) fn param_to_text(param: &Param, map: Option<&MnemonicMap>) -> String {
    if param.stack && param.tag != 'D' {
        return stack_to_text(param, map);
    }
    match (param.tag, &param.value) {
        ('o' | 't' | 'n' | 'N', Value::Str(name)) => name.clone(),
        ('m' | 'x' | 'z', Value::Str(text)) => quote(text),
        ('D', Value::Blob(blob)) => d_to_text(blob),
        (RAW_TAG, Value::Blob(blob)) => format!("@{}", quote(&hex::encode(blob))),
        _ => param.value.to_text(),
    }
}

pub(crate) fn instr_name(opcode: u16, map: Option<&MnemonicMap>) -> String {
    map.and_then(|m| m.ins_name(u32::from(opcode)))
        .map(str::to_owned)
        .unwrap_or_else(|| format!("ins_{opcode}"))
}

/// Time markers print absolute first, then cumulative `+N:` deltas; a
/// negative marker prints absolute and pins the printer in absolute mode.
pub(crate) struct TimePrinter {
    prev: i32,
    seen: bool,
    absolute: bool,
}

impl TimePrinter {
    pub(crate) fn new() -> TimePrinter {
        TimePrinter { prev: 0, seen: false, absolute: false }
    }

    pub(crate) fn render(&mut self, time: i32) -> String {
        let text = if !self.seen || self.absolute || time < 0 {
            format!("{time}:")
        } else {
            format!("+{}:", time - self.prev)
        };
        if time < 0 {
            self.absolute = true;
        }
        self.seen = true;
        self.prev = time;
        text
    }
}

pub(crate) fn dump(program: &EclProgram, map: Option<&MnemonicMap>) -> String {
    let mut out = String::new();

    if !program.anim_refs.is_empty() {
        out.push_str("anim { ");
        for name in &program.anim_refs {
            let _ = write!(out, "{}; ", quote(name));
        }
        out.push_str("}\n");
    }
    if !program.ecli_refs.is_empty() {
        out.push_str("ecli { ");
        for name in &program.ecli_refs {
            let _ = write!(out, "{}; ", quote(name));
        }
        out.push_str("}\n");
    }

    for sub in &program.subs {
        let _ = write!(out, "\nsub {}()\n{{\n", sub.name);
        let mut times = TimePrinter::new();

        for node in &sub.nodes {
            match node {
                Node::Time(t) => {
                    let _ = writeln!(out, "{}", times.render(*t));
                }
                Node::Rank(mask) => {
                    let _ = writeln!(out, "{}", rank_to_text(*mask));
                }
                Node::Label(name) => {
                    let _ = writeln!(out, "{name}:");
                }
                Node::Instr(instr) => {
                    let args: Vec<String> =
                        instr.params.iter().map(|p| param_to_text(p, map)).collect();
                    let _ = writeln!(
                        out,
                        "    {}({});",
                        instr_name(instr.opcode, map),
                        args.join(", ")
                    );
                }
            }
        }

        out.push_str("}\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_markers_relativise_after_the_first() {
        let mut t = TimePrinter::new();
        assert_eq!(t.render(10), "10:");
        assert_eq!(t.render(30), "+20:");
        assert_eq!(t.render(30 + 5), "+5:");
    }

    #[test]
    fn negative_time_pins_absolute_mode() {
        let mut t = TimePrinter::new();
        assert_eq!(t.render(10), "10:");
        assert_eq!(t.render(-1), "-1:");
        // Still absolute afterwards.
        assert_eq!(t.render(60), "60:");
        assert_eq!(t.render(70), "70:");
    }

    #[test]
    fn stack_params_prefer_letters() {
        let p = Param::stack_ref('S', Value::I32(4));
        assert_eq!(param_to_text(&p, None), "$B");
        let p = Param::stack_ref('f', Value::F32(0.0));
        assert_eq!(param_to_text(&p, None), "%A");
        let p = Param::stack_ref('S', Value::I32(-3));
        assert_eq!(param_to_text(&p, None), "[-3]");
    }

    #[test]
    fn d_params_show_their_cast() {
        let mut blob = 0x6969u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&17i32.to_le_bytes());
        assert_eq!(d_to_text(&blob), "_SS 17");

        let mut blob = 0x6666u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&1.5f32.to_le_bytes());
        assert_eq!(d_to_text(&blob), "_ff 1.5f");
    }
}
