//! Textual rendering of animation files.

use std::fmt::Write;

use danmaku_types::Value;

use crate::anm::{AnmFile, Entry};
use crate::ecl::print::{instr_name, param_to_text, TimePrinter};
use crate::ir::{Instr, Node, Param};
use crate::text::quote;
use crate::MnemonicMap;

/// Sprite and script references print by name when the entry declares the
/// id, by number otherwise.
fn ref_to_text(entry: &Entry, param: &Param) -> Option<String> {
    let id = param.value.as_int()?;
    match param.tag {
        'n' if entry.sprites.iter().any(|s| s.id == id as u32) => Some(format!("sprite{id}")),
        'N' if entry.scripts.iter().any(|s| s.id == id) => Some(format!("script{id}")),
        _ => None,
    }
}

fn anm_param_to_text(entry: &Entry, param: &Param, map: Option<&MnemonicMap>) -> String {
    if let Value::Str(name) = &param.value {
        if matches!(param.tag, 'n' | 'N') {
            return name.clone();
        }
    }
    ref_to_text(entry, param).unwrap_or_else(|| param_to_text(param, map))
}

fn same_register(a: &Param, b: &Param) -> bool {
    a.stack && b.stack && a.value == b.value
}

/// Collapse an operator instruction back into an infix statement, but
/// only when re-lowering the statement reproduces the instruction
/// byte-for-byte: short forms stay raw (lowering would spill through a
/// temporary), as do all-immediate operands (lowering would fold them)
/// and operands aliasing the destination.
fn collapse_expr(version: u32, instr: &Instr, map: Option<&MnemonicMap>) -> Option<String> {
    use crate::anm::expr::{op_by_opcode, OpKind, OpSym};

    let (op, _tag, short) = op_by_opcode(version, instr.opcode)?;
    if short {
        return None;
    }

    let dest = instr.params.first().filter(|p| p.stack)?;
    let dest_text = param_to_text(dest, map);
    let operands = &instr.params[1..];
    if operands.iter().any(|p| same_register(p, dest)) {
        return None;
    }
    let texts: Vec<String> = operands.iter().map(|p| param_to_text(p, map)).collect();

    match (op.kind, operands) {
        (OpKind::Assign, [_]) => Some(format!("{dest_text} = {};", texts[0])),
        (OpKind::Unary, [a]) => {
            // Constant folding would swallow a literal operand of the
            // evaluable functions.
            if !a.stack && op.sym != OpSym::Rand {
                return None;
            }
            let func = match op.sym {
                OpSym::Rand => "rand",
                OpSym::Sin => "sin",
                OpSym::Cos => "cos",
                OpSym::Tan => "tan",
                OpSym::Acos => "acos",
                OpSym::Atan => "atan",
                _ => return None,
            };
            Some(format!("{dest_text} = {func}({});", texts[0]))
        }
        (OpKind::BinaryCommut | OpKind::BinaryNoncommut, [a, b]) => {
            if !a.stack && !b.stack {
                return None;
            }
            let sign = match op.sym {
                OpSym::Add => "+",
                OpSym::Sub => "-",
                OpSym::Mul => "*",
                OpSym::Div => "/",
                OpSym::Mod => "%",
                _ => return None,
            };
            Some(format!("{dest_text} = {} {sign} {};", texts[0], texts[1]))
        }
        _ => None,
    }
}

pub(crate) fn dump(file: &AnmFile, map: Option<&MnemonicMap>, pretty: bool) -> String {
    let mut out = String::new();

    for (index, entry) in file.entries.iter().enumerate() {
        let _ = writeln!(out, "entry entry{index} {{");
        let _ = writeln!(out, "    version: {},", entry.version);
        let _ = writeln!(out, "    name: {},", quote(&entry.name));
        if let Some(name2) = &entry.name2 {
            let _ = writeln!(out, "    name2: {},", quote(name2));
        }
        let _ = writeln!(out, "    format: {},", entry.format);
        let _ = writeln!(out, "    width: {},", entry.width);
        let _ = writeln!(out, "    height: {},", entry.height);
        let _ = writeln!(out, "    x: {},", entry.x);
        let _ = writeln!(out, "    y: {},", entry.y);
        let _ = writeln!(out, "    unknown1: {},", entry.unknown1);

        for sprite in &entry.sprites {
            let _ = writeln!(
                out,
                "    sprite sprite{} {{ id: {}, x: {}, y: {}, w: {}, h: {} }};",
                sprite.id,
                sprite.id,
                Value::F32(sprite.x).to_text(),
                Value::F32(sprite.y).to_text(),
                Value::F32(sprite.w).to_text(),
                Value::F32(sprite.h).to_text(),
            );
        }

        for script in &entry.scripts {
            let _ = writeln!(out, "    script {} script{} {{", script.id, script.id);
            let mut times = TimePrinter::new();
            for node in &script.body.nodes {
                match node {
                    Node::Time(t) => {
                        let _ = writeln!(out, "    {}", times.render(*t));
                    }
                    Node::Rank(_) => {}
                    Node::Label(name) => {
                        let _ = writeln!(out, "    {name}:");
                    }
                    Node::Instr(instr) => {
                        if pretty {
                            if let Some(stmt) = collapse_expr(entry.version, instr, map) {
                                let _ = writeln!(out, "        {stmt}");
                                continue;
                            }
                        }
                        let args: Vec<String> = instr
                            .params
                            .iter()
                            .map(|p| anm_param_to_text(entry, p, map))
                            .collect();
                        let _ = writeln!(
                            out,
                            "        {}({});",
                            instr_name(instr.opcode, map),
                            args.join(", ")
                        );
                    }
                }
            }
            let _ = writeln!(out, "    }}");
        }

        if let Some(thtx) = &entry.thtx {
            let _ = writeln!(out, "    thtx {{");
            let _ = writeln!(out, "        format: {},", thtx.format);
            let _ = writeln!(out, "        width: {},", thtx.width);
            let _ = writeln!(out, "        height: {},", thtx.height);
            let _ = writeln!(out, "        size: {},", thtx.size);
            let _ = writeln!(out, "        data: @{},", quote(&hex::encode(&thtx.data)));
            let _ = writeln!(out, "    }}");
        }

        let _ = writeln!(out, "}}");
    }

    out
}
