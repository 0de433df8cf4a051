//! Textual front-end of the sprite-animation assembler.
//!
//! Entries are `entry <name> { ... }` blocks holding `key: value`
//! properties, `sprite` and `thtx` blocks, and `script <id> <name> { ... }`
//! blocks. Script bodies take the shared statement syntax plus arithmetic
//! expression statements, which lower through the expression compiler.

use danmaku_types::Value;

use crate::anm::expr::{op_get, Expr, Lowerer, Operand, OpSym};
use crate::anm::reg::{Lock, RegFile};
use crate::anm::{bind_offsets, AnmFile, Entry, Script, Sprite, Thtx};
use crate::ecl::parse::{arg_to_param, parse_arg, resolve_opcode, Arg};
use crate::ecl::{expand_format, RAW_TAG};
use crate::ir::{Instr, Node, Param, Sub};
use crate::tables::anm_format;
use crate::text::{Lexer, Tok};
use crate::{AsmError, MnemonicMap};

struct EntryCtx {
    entry: Entry,
    sprite_names: Vec<(String, u32)>,
    script_names: Vec<(String, i32)>,
}

/// Register file shared across the whole compilation; the table is built
/// for the first script version seen and reset between scripts, keeping
/// user-declared registers alive.
#[derive(Default)]
struct Regs {
    file: RegFile,
    version: Option<u32>,
}

impl Regs {
    fn for_script(&mut self, version: u32) -> &mut RegFile {
        if self.version != Some(version) {
            self.file = RegFile::for_version(version);
            self.version = Some(version);
        } else {
            self.file.reset();
        }
        &mut self.file
    }
}

fn expect_int(lx: &mut Lexer) -> Result<i64, AsmError> {
    let negate = lx.eat_punct('-');
    match lx.next() {
        Some(Tok::Int(v)) => Ok(if negate { -v } else { v }),
        _ => Err(lx.error("expected an integer")),
    }
}

fn expect_float(lx: &mut Lexer) -> Result<f32, AsmError> {
    let negate = lx.eat_punct('-');
    match lx.next() {
        Some(Tok::Float(v)) => Ok(if negate { -v } else { v }),
        Some(Tok::Int(v)) => Ok(if negate { -(v as f32) } else { v as f32 }),
        _ => Err(lx.error("expected a number")),
    }
}

fn expect_str(lx: &mut Lexer) -> Result<String, AsmError> {
    match lx.next() {
        Some(Tok::Str(s)) => Ok(s),
        _ => Err(lx.error("expected a quoted string")),
    }
}

fn expect_raw(lx: &mut Lexer) -> Result<Vec<u8>, AsmError> {
    match lx.next() {
        Some(Tok::Raw(bytes)) => Ok(bytes),
        _ => Err(lx.error("expected a @\"hex\" blob")),
    }
}

fn parse_sprite(lx: &mut Lexer, index: usize) -> Result<(String, Sprite), AsmError> {
    let name = lx.expect_ident()?;
    lx.expect_punct('{')?;

    let mut sprite = Sprite { id: index as u32, x: 0.0, y: 0.0, w: 0.0, h: 0.0 };
    while !lx.eat_punct('}') {
        let key = lx.expect_ident()?;
        lx.expect_punct(':')?;
        match key.as_str() {
            "id" => sprite.id = expect_int(lx)? as u32,
            "x" => sprite.x = expect_float(lx)?,
            "y" => sprite.y = expect_float(lx)?,
            "w" => sprite.w = expect_float(lx)?,
            "h" => sprite.h = expect_float(lx)?,
            other => return Err(lx.error(format!("unknown sprite field '{other}'"))),
        }
        if !lx.eat_punct(',') {
            lx.expect_punct('}')?;
            break;
        }
    }
    lx.expect_punct(';')?;
    Ok((name, sprite))
}

fn parse_thtx(lx: &mut Lexer) -> Result<Thtx, AsmError> {
    lx.expect_punct('{')?;
    let mut thtx = Thtx { format: 0, width: 0, height: 0, size: 0, data: Vec::new() };
    while !lx.eat_punct('}') {
        let key = lx.expect_ident()?;
        lx.expect_punct(':')?;
        match key.as_str() {
            "format" => thtx.format = expect_int(lx)? as u16,
            "width" => thtx.width = expect_int(lx)? as u16,
            "height" => thtx.height = expect_int(lx)? as u16,
            "size" => thtx.size = expect_int(lx)? as u32,
            "data" => thtx.data = expect_raw(lx)?,
            other => return Err(lx.error(format!("unknown thtx field '{other}'"))),
        }
        let _ = lx.eat_punct(',');
    }
    Ok(thtx)
}

/// An operand of the expression sublanguage: a literal, or a register
/// named by sigil, mnemonic map or raw id.
fn parse_operand(
    lx: &mut Lexer,
    regs: &mut RegFile,
    map: Option<&MnemonicMap>,
) -> Result<Operand, AsmError> {
    match lx.next() {
        Some(Tok::Int(v)) => Ok(Operand { param: Param::new('S', Value::I32(v as i32)), reg: None }),
        Some(Tok::Float(v)) => Ok(Operand { param: Param::new('f', Value::F32(v)), reg: None }),
        Some(Tok::Punct(sigil @ ('$' | '%'))) => {
            let name = lx.expect_ident()?;
            let id = map
                .and_then(|m| m.gvar_id(&name))
                .ok_or(AsmError::UnresolvedSymbol(name))?;
            let tag = if sigil == '%' { 'f' } else { 'S' };
            let handle = regs.by_id(id).unwrap_or_else(|| regs.add_user(id, tag));
            // A named register is a user variable: it persists across
            // statements and must not be grabbed as scratch.
            let _ = regs.lock(handle, Lock::UserVar);
            Ok(Operand { param: regs.to_param(handle), reg: Some(handle) })
        }
        Some(Tok::Punct('[')) => {
            let (id, tag) = match lx.next() {
                Some(Tok::Int(v)) => (v as i32, 'S'),
                Some(Tok::Float(v)) => (v as i32, 'f'),
                _ => return Err(lx.error("expected a register number")),
            };
            lx.expect_punct(']')?;
            let handle = regs.by_id(id).unwrap_or_else(|| regs.add_user(id, tag));
            // Addressed by raw id: off limits for the allocator.
            let _ = regs.lock(handle, Lock::External);
            Ok(Operand { param: regs.to_param(handle), reg: Some(handle) })
        }
        _ => Err(lx.error("expected an expression operand")),
    }
}

fn func_sym(name: &str) -> Option<OpSym> {
    Some(match name {
        "sin" => OpSym::Sin,
        "cos" => OpSym::Cos,
        "tan" => OpSym::Tan,
        "acos" => OpSym::Acos,
        "atan" => OpSym::Atan,
        "rand" => OpSym::Rand,
        _ => return None,
    })
}

fn binary_expr(version: u32, sym: OpSym, lhs: Expr, rhs: Expr, lx: &Lexer) -> Result<Expr, AsmError> {
    let op = op_get(sym, version)
        .ok_or_else(|| lx.error("this script version has no operators"))?;
    Ok(Expr::Op { op, children: vec![lhs, rhs] })
}

fn parse_factor(
    lx: &mut Lexer,
    version: u32,
    regs: &mut RegFile,
    map: Option<&MnemonicMap>,
) -> Result<Expr, AsmError> {
    if lx.eat_punct('(') {
        let inner = parse_expr(lx, version, regs, map)?;
        lx.expect_punct(')')?;
        return Ok(inner);
    }

    if lx.eat_punct('-') {
        // Only literals negate; registers would need a multiply.
        return match lx.next() {
            Some(Tok::Int(v)) => {
                Ok(Expr::Val(Operand { param: Param::new('S', Value::I32(-v as i32)), reg: None }))
            }
            Some(Tok::Float(v)) => {
                Ok(Expr::Val(Operand { param: Param::new('f', Value::F32(-v)), reg: None }))
            }
            _ => Err(lx.error("expected a number after '-'")),
        };
    }

    if let Some(Tok::Ident(name)) = lx.peek() {
        if let Some(sym) = func_sym(name) {
            lx.next();
            lx.expect_punct('(')?;
            let inner = parse_expr(lx, version, regs, map)?;
            lx.expect_punct(')')?;
            let op = op_get(sym, version)
                .ok_or_else(|| lx.error("this script version has no operators"))?;
            return Ok(Expr::Op { op, children: vec![inner] });
        }
    }

    Ok(Expr::Val(parse_operand(lx, regs, map)?))
}

fn parse_term(
    lx: &mut Lexer,
    version: u32,
    regs: &mut RegFile,
    map: Option<&MnemonicMap>,
) -> Result<Expr, AsmError> {
    let mut lhs = parse_factor(lx, version, regs, map)?;
    loop {
        // In infix position `%` is always the modulus; the register sigil
        // only occurs in operand position.
        let sym = match lx.peek() {
            Some(Tok::Punct('*')) => OpSym::Mul,
            Some(Tok::Punct('/')) => OpSym::Div,
            Some(Tok::Punct('%')) => OpSym::Mod,
            _ => break,
        };
        lx.next();
        let rhs = parse_factor(lx, version, regs, map)?;
        lhs = binary_expr(version, sym, lhs, rhs, lx)?;
    }
    Ok(lhs)
}

fn parse_expr(
    lx: &mut Lexer,
    version: u32,
    regs: &mut RegFile,
    map: Option<&MnemonicMap>,
) -> Result<Expr, AsmError> {
    let mut lhs = parse_term(lx, version, regs, map)?;
    loop {
        let sym = match lx.peek() {
            Some(Tok::Punct('+')) => OpSym::Add,
            Some(Tok::Punct('-')) => OpSym::Sub,
            _ => break,
        };
        lx.next();
        let rhs = parse_term(lx, version, regs, map)?;
        lhs = binary_expr(version, sym, lhs, rhs, lx)?;
    }
    Ok(lhs)
}

fn parse_script_body(
    lx: &mut Lexer,
    version: u32,
    sub: &mut Sub,
    regs: &mut RegFile,
    map: Option<&MnemonicMap>,
    errors: &mut Vec<AsmError>,
) -> Result<(), AsmError> {
    let mut time = 0i32;

    while !lx.eat_punct('}') {
        if lx.at_end() {
            return Err(lx.error("unexpected end of input in script body"));
        }

        let result = (|| -> Result<(), AsmError> {
            let relative = lx.eat_punct('+');
            if relative
                || matches!(lx.peek(), Some(Tok::Int(_) | Tok::Punct('-')) if matches!(lx.peek2(), Some(Tok::Int(_) | Tok::Punct(':'))))
            {
                let negate = lx.eat_punct('-');
                let value = match lx.next() {
                    Some(Tok::Int(v)) => v as i32,
                    _ => return Err(lx.error("expected a time value")),
                };
                lx.expect_punct(':')?;
                let value = if negate { -value } else { value };
                time = if relative { time + value } else { value };
                sub.nodes.push(Node::Time(time));
                return Ok(());
            }

            // Expression statements start at an lvalue register.
            if matches!(lx.peek(), Some(Tok::Punct('$' | '%' | '['))) {
                let target = parse_operand(lx, regs, map)?;
                lx.expect_punct('=')?;
                let rhs = parse_expr(lx, version, regs, map)?;
                lx.expect_punct(';')?;

                let expr = Expr::Assign { target, rhs: Box::new(rhs) };
                let mut lowerer = Lowerer {
                    regs: &mut *regs,
                    version,
                    time,
                    nodes: &mut sub.nodes,
                    in_script: true,
                };
                lowerer.lower_statement(expr).map_err(AsmError::Expr)?;
                return Ok(());
            }

            let name = lx.expect_ident()?;
            if lx.eat_punct(':') {
                sub.nodes.push(Node::Label(name));
                return Ok(());
            }

            let opcode = resolve_opcode(&name, map)
                .ok_or_else(|| lx.error(format!("unknown instruction '{name}'")))?;

            lx.expect_punct('(')?;
            let mut args = Vec::new();
            if !lx.eat_punct(')') {
                loop {
                    args.push(parse_arg(lx)?);
                    if lx.eat_punct(')') {
                        break;
                    }
                    lx.expect_punct(',')?;
                }
            }
            lx.expect_punct(';')?;

            let params = if !args.is_empty() && args.iter().all(|a| matches!(a, Arg::Raw(_))) {
                args.iter()
                    .enumerate()
                    .map(|(i, a)| arg_to_param(a, RAW_TAG, map, &sub.name, opcode, i))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                let format = anm_format(version, opcode)
                    .ok_or(AsmError::UnknownOpcode { opcode, version })?;
                let tags = expand_format(format, args.len());
                if tags.len() != args.len() {
                    return Err(AsmError::ArityMismatch {
                        sub: sub.name.clone(),
                        opcode,
                        expected: tags.len(),
                        got: args.len(),
                    });
                }
                args.iter()
                    .zip(&tags)
                    .enumerate()
                    .map(|(i, (a, &t))| arg_to_param(a, t, map, &sub.name, opcode, i))
                    .collect::<Result<Vec<_>, _>>()?
            };

            sub.nodes.push(Node::Instr(Instr { opcode, time, rank: 0xff, params, offset: 0 }));
            Ok(())
        })();

        if let Err(err) = result {
            errors.push(err);
            // Resynchronise on the next statement.
            loop {
                match lx.peek() {
                    None | Some(Tok::Punct('}')) => break,
                    Some(Tok::Punct(';')) => {
                        lx.next();
                        break;
                    }
                    _ => {
                        lx.next();
                    }
                }
            }
        }
    }

    Ok(())
}

/// Replace sprite/script names in `n`/`N` parameters by their declared
/// ids (assembly pass two).
fn resolve_refs(ctx: &mut EntryCtx) -> Result<(), AsmError> {
    for script in ctx.entry.scripts.iter_mut() {
        for node in script.body.nodes.iter_mut() {
            let Node::Instr(instr) = node else { continue };
            for param in instr.params.iter_mut() {
                let Value::Str(name) = &param.value else { continue };
                let id = match param.tag {
                    'n' => ctx
                        .sprite_names
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, id)| *id as i32),
                    'N' => ctx
                        .script_names
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, id)| *id),
                    _ => continue,
                };
                match id {
                    Some(id) => param.value = Value::I32(id),
                    None => return Err(AsmError::UnresolvedSymbol(name.clone())),
                }
            }
        }
    }
    Ok(())
}

fn parse_entry(
    lx: &mut Lexer,
    regs: &mut Regs,
    map: Option<&MnemonicMap>,
    errors: &mut Vec<AsmError>,
) -> Result<Entry, AsmError> {
    let _entry_name = lx.expect_ident()?;
    lx.expect_punct('{')?;

    let mut ctx = EntryCtx {
        entry: Entry::default(),
        sprite_names: Vec::new(),
        script_names: Vec::new(),
    };

    while !lx.eat_punct('}') {
        let key = lx.expect_ident()?;
        match key.as_str() {
            "sprite" => {
                let (name, sprite) = parse_sprite(lx, ctx.entry.sprites.len())?;
                ctx.sprite_names.push((name, sprite.id));
                ctx.entry.sprites.push(sprite);
            }
            "script" => {
                // The id is optional; scripts without one number upward.
                let id = if matches!(lx.peek(), Some(Tok::Int(_))) {
                    expect_int(lx)? as i32
                } else {
                    ctx.entry.scripts.len() as i32
                };
                let name = lx.expect_ident()?;
                lx.expect_punct('{')?;

                let mut body = Sub::named(name.clone());
                let file = regs.for_script(ctx.entry.version);
                parse_script_body(lx, ctx.entry.version, &mut body, file, map, errors)?;
                bind_offsets(ctx.entry.version, &mut body);

                ctx.script_names.push((name, id));
                ctx.entry.scripts.push(Script { id, body });
            }
            "thtx" => ctx.entry.thtx = Some(parse_thtx(lx)?),
            field => {
                lx.expect_punct(':')?;
                match field {
                    "version" => ctx.entry.version = expect_int(lx)? as u32,
                    "name" => ctx.entry.name = expect_str(lx)?,
                    "name2" => ctx.entry.name2 = Some(expect_str(lx)?),
                    "format" => ctx.entry.format = expect_int(lx)? as u32,
                    "width" => ctx.entry.width = expect_int(lx)? as u32,
                    "height" => ctx.entry.height = expect_int(lx)? as u32,
                    "x" => ctx.entry.x = expect_int(lx)? as u32,
                    "y" => ctx.entry.y = expect_int(lx)? as u32,
                    "unknown1" => ctx.entry.unknown1 = expect_int(lx)? as u32,
                    other => return Err(lx.error(format!("unknown entry field '{other}'"))),
                }
                let _ = lx.eat_punct(',');
            }
        }
    }

    resolve_refs(&mut ctx)?;
    Ok(ctx.entry)
}

pub(crate) fn parse(source: &str, map: Option<&MnemonicMap>) -> Result<AnmFile, AsmError> {
    let mut lx = Lexer::new(source)?;
    let mut file = AnmFile::default();
    let mut errors: Vec<AsmError> = Vec::new();
    let mut regs = Regs::default();

    while !lx.at_end() {
        let keyword = lx.expect_ident()?;
        if keyword != "entry" {
            return Err(lx.error(format!("expected 'entry', found '{keyword}'")));
        }
        let entry = parse_entry(&mut lx, &mut regs, map, &mut errors)?;
        file.entries.push(entry);
    }

    match errors.len() {
        0 => Ok(file),
        1 => Err(errors.remove(0)),
        _ => Err(AsmError::Many(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anm::expr::ExprError;

    const MAP: &str = "\
!gvar_names
10000 i0
10008 a
10009 b
10004 f0
!gvar_types
10000 $
10008 $
10009 $
10004 %
";

    fn gvars() -> MnemonicMap {
        MnemonicMap::load(MAP, "test.anmm").unwrap()
    }

    fn entry_with_script(body: &str) -> String {
        format!(
            "entry e0 {{ version: 8, name: \"x.png\", format: 1, width: 16, height: 16,\n\
             script 0 script0 {{ {body} }}\n}}"
        )
    }

    #[test]
    fn expression_statement_lowers_to_instructions() {
        let map = gvars();
        let file = AnmFile::parse(&entry_with_script("$a = $b + 1;"), Some(&map)).unwrap();
        let script = &file.entries[0].scripts[0];
        let instrs: Vec<_> = script.body.instrs().collect();
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].opcode, 112);
        assert_eq!(instrs[0].params.len(), 3);
        assert_eq!(instrs[0].params[0].value, Value::I32(10008));
        assert!(instrs[0].params[0].stack);
        assert_eq!(instrs[0].params[1].value, Value::I32(10009));
        assert_eq!(instrs[0].params[2].value, Value::I32(1));
    }

    #[test]
    fn self_assignment_spills_through_a_temporary() {
        let map = gvars();
        let file = AnmFile::parse(&entry_with_script("$a = $a + $b;"), Some(&map)).unwrap();
        let script = &file.entries[0].scripts[0];
        let opcodes: Vec<u16> = script.body.instrs().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![112, 100]);
    }

    #[test]
    fn mixed_types_are_rejected() {
        let map = gvars();
        let err = AnmFile::parse(&entry_with_script("$a = $b + 1.5f;"), Some(&map)).unwrap_err();
        assert!(matches!(err, AsmError::Expr(ExprError::BadTypes)));
    }

    #[test]
    fn float_trigonometry_lowers() {
        let map = gvars();
        let file = AnmFile::parse(&entry_with_script("%f0 = sin(%f0);"), Some(&map)).unwrap();
        let script = &file.entries[0].scripts[0];
        let instrs: Vec<_> = script.body.instrs().collect();
        // sin writes a fresh destination, then the store runs.
        assert_eq!(instrs[0].opcode, 124);
        assert_eq!(instrs[1].opcode, 101);
    }

    #[test]
    fn sprite_references_resolve_by_name() {
        let source = "entry e0 { version: 8, name: \"x.png\", format: 1, width: 16, height: 16,\n\
             sprite spriteA { id: 3, x: 0.0f, y: 0.0f, w: 8.0f, h: 8.0f };\n\
             script 0 script0 { ins_300(spriteA); }\n}";
        let file = AnmFile::parse(source, None).unwrap();
        let instr = file.entries[0].scripts[0].body.instrs().next().unwrap();
        assert_eq!(instr.params[0].value, Value::I32(3));
    }

    #[test]
    fn unknown_sprite_names_are_reported() {
        let source = "entry e0 { version: 8, name: \"x.png\", format: 1, width: 16, height: 16,\n\
             script 0 script0 { ins_300(nosuch); }\n}";
        let err = AnmFile::parse(source, None).unwrap_err();
        assert!(matches!(err, AsmError::UnresolvedSymbol(name) if name == "nosuch"));
    }
}
