//! Textual front-end of the stage-event assembler: pass one of the
//! two-pass compile. Statements parse into IR with symbolic labels; byte
//! offsets are bound immediately afterwards, and jump deltas resolve at
//! serialisation time.

use danmaku_types::Value;

use crate::ecl::{expand_format, legacy, mainline, require_format, EclProgram, RAW_TAG};
use crate::ir::{rank_from_text, Instr, Node, Param, Sub};
use crate::tables::ecl_is_mainline;
use crate::text::{Lexer, Tok};
use crate::{AsmError, MnemonicMap};

/// Errors tolerated inside one sub-program before it is abandoned.
const ERROR_CAP: usize = 5;

/// An argument as it reads off the token stream, before the opcode's
/// format string assigns it a type.
pub(crate) enum Arg {
    Int(i64),
    Float(f32),
    Str(String),
    Raw(Vec<u8>),
    Ident(String),
    /// `$name`: an integer register reference.
    Dollar(String),
    /// `%name`: a float register reference.
    Percent(String),
    /// `[value]`: a raw register number.
    Bracket(Box<Arg>),
    /// `_SS`-style typed word pair.
    Cast(String, Box<Arg>),
}

pub(crate) fn parse_arg(lx: &mut Lexer) -> Result<Arg, AsmError> {
    let negate = lx.eat_punct('-');
    let arg = match lx.next() {
        Some(Tok::Int(v)) => Arg::Int(if negate { -v } else { v }),
        Some(Tok::Float(v)) => Arg::Float(if negate { -v } else { v }),
        Some(_) if negate => return Err(lx.error("expected a number after '-'")),
        Some(Tok::Str(s)) => Arg::Str(s),
        Some(Tok::Raw(bytes)) => Arg::Raw(bytes),
        Some(Tok::Ident(name)) => {
            if matches!(name.as_str(), "_SS" | "_Sf" | "_fS" | "_ff") {
                Arg::Cast(name, Box::new(parse_arg(lx)?))
            } else {
                Arg::Ident(name)
            }
        }
        Some(Tok::Punct('$')) => Arg::Dollar(lx.expect_ident()?),
        Some(Tok::Punct('%')) => Arg::Percent(lx.expect_ident()?),
        Some(Tok::Punct('[')) => {
            let inner = parse_arg(lx)?;
            lx.expect_punct(']')?;
            Arg::Bracket(Box::new(inner))
        }
        _ => return Err(lx.error("expected an argument")),
    };
    Ok(arg)
}

/// Resolve `$name` / `%name` to a register id: the mnemonic map first,
/// then the single-letter locals (`A` is slot 0, each slot 4 bytes wide).
fn resolve_var(name: &str, map: Option<&MnemonicMap>) -> Result<i32, AsmError> {
    if let Some(id) = map.and_then(|m| m.gvar_id(name)) {
        return Ok(id);
    }
    let mut chars = name.chars();
    if let (Some(c @ 'A'..='Z'), None) = (chars.next(), chars.next()) {
        return Ok((c as i32 - 'A' as i32) * 4);
    }
    Err(AsmError::UnresolvedSymbol(name.to_owned()))
}

fn d_blob(kind: &str, inner: &Arg) -> Option<Value> {
    let (from, to) = match kind {
        "_SS" => (b'i', b'i'),
        "_Sf" => (b'i', b'f'),
        "_fS" => (b'f', b'i'),
        "_ff" => (b'f', b'f'),
        _ => return None,
    };
    let mut blob = Vec::with_capacity(8);
    let kind = u32::from(from) | (u32::from(to) << 8);
    blob.extend_from_slice(&kind.to_le_bytes());
    match (from, inner) {
        (b'i', Arg::Int(v)) => blob.extend_from_slice(&(*v as i32).to_le_bytes()),
        (b'f', Arg::Float(v)) => blob.extend_from_slice(&v.to_le_bytes()),
        (b'f', Arg::Int(v)) => blob.extend_from_slice(&(*v as f32).to_le_bytes()),
        _ => return None,
    }
    Some(Value::Blob(blob))
}

fn int_value(tag: char, v: i64) -> Value {
    match tag {
        'b' => Value::U8(v as u8),
        'c' => Value::I8(v as i8),
        'u' => Value::U16(v as u16),
        's' => Value::I16(v as i16),
        'U' => Value::U32(v as u32),
        _ => Value::I32(v as i32),
    }
}

/// Give an argument the type its format tag demands.
pub(crate) fn arg_to_param(
    arg: &Arg,
    tag: char,
    map: Option<&MnemonicMap>,
    sub: &str,
    opcode: u16,
    index: usize,
) -> Result<Param, AsmError> {
    let mismatch = || AsmError::TypeMismatch { sub: sub.to_owned(), opcode, index, expected: tag };

    if let Arg::Raw(bytes) = arg {
        return Ok(Param::new(RAW_TAG, Value::Blob(bytes.clone())));
    }

    Ok(match tag {
        'o' | 't' => match arg {
            Arg::Ident(name) => Param::new(tag, Value::Str(name.clone())),
            Arg::Int(v) => Param::new(tag, Value::I32(*v as i32)),
            _ => return Err(mismatch()),
        },
        'n' | 'N' => match arg {
            Arg::Ident(name) => Param::new(tag, Value::Str(name.clone())),
            Arg::Int(v) => Param::new(tag, Value::I32(*v as i32)),
            _ => return Err(mismatch()),
        },
        'm' | 'x' | 'z' => match arg {
            Arg::Str(text) => Param::new(tag, Value::Str(text.clone())),
            _ => return Err(mismatch()),
        },
        'D' => match arg {
            Arg::Cast(kind, inner) => {
                Param::new('D', d_blob(kind, inner).ok_or_else(mismatch)?)
            }
            _ => return Err(mismatch()),
        },
        'f' => match arg {
            Arg::Float(v) => Param::new('f', Value::F32(*v)),
            Arg::Int(v) => Param::new('f', Value::F32(*v as f32)),
            Arg::Percent(name) => {
                Param::stack_ref('f', Value::F32(resolve_var(name, map)? as f32))
            }
            Arg::Bracket(inner) => match inner.as_ref() {
                Arg::Float(v) => Param::stack_ref('f', Value::F32(*v)),
                Arg::Int(v) => Param::stack_ref('f', Value::F32(*v as f32)),
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        },
        'd' => match arg {
            Arg::Float(v) => Param::new('d', Value::F64(f64::from(*v))),
            Arg::Int(v) => Param::new('d', Value::F64(*v as f64)),
            _ => return Err(mismatch()),
        },
        _ => match arg {
            Arg::Int(v) => Param::new(tag, int_value(tag, *v)),
            Arg::Dollar(name) => Param::stack_ref(tag, int_value(tag, i64::from(resolve_var(name, map)?))),
            Arg::Bracket(inner) => match inner.as_ref() {
                Arg::Int(v) => Param::stack_ref(tag, int_value(tag, *v)),
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        },
    })
}

/// Resolve an instruction name: `ins_<n>` or a mapped mnemonic.
pub(crate) fn resolve_opcode(name: &str, map: Option<&MnemonicMap>) -> Option<u16> {
    if let Some(num) = name.strip_prefix("ins_") {
        return num.parse().ok();
    }
    map.and_then(|m| m.ins_id(name)).map(|id| id as u16)
}

/// Skip to just past the next `;`, or stop before `}`.
fn recover(lx: &mut Lexer) {
    loop {
        match lx.peek() {
            None | Some(Tok::Punct('}')) => return,
            Some(Tok::Punct(';')) => {
                lx.next();
                return;
            }
            _ => {
                lx.next();
            }
        }
    }
}

fn parse_name_block(lx: &mut Lexer) -> Result<Vec<String>, AsmError> {
    let mut names = Vec::new();
    lx.expect_punct('{')?;
    while !lx.eat_punct('}') {
        match lx.next() {
            Some(Tok::Str(name)) => {
                names.push(name);
                lx.expect_punct(';')?;
            }
            _ => return Err(lx.error("expected a quoted name")),
        }
    }
    Ok(names)
}

/// Statement parser for one sub-program body. Errors are collected up to
/// a small cap so one bad line does not hide the rest.
fn parse_sub_body(
    lx: &mut Lexer,
    sub: &mut Sub,
    version: u32,
    map: Option<&MnemonicMap>,
    errors: &mut Vec<AsmError>,
) -> Result<(), AsmError> {
    let mut time = 0i32;
    let mut rank = 0xffu8;

    while !lx.eat_punct('}') {
        if lx.at_end() {
            return Err(lx.error("unexpected end of input in sub body"));
        }

        let result = (|| -> Result<(), AsmError> {
            // Time markers: `N:` absolute, `+N:` cumulative.
            let relative = lx.eat_punct('+');
            if relative || matches!(lx.peek(), Some(Tok::Int(_) | Tok::Punct('-')) if matches!(lx.peek2(), Some(Tok::Int(_) | Tok::Punct(':'))))
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

            if lx.eat_punct('!') {
                let letters = lx.expect_ident()?;
                rank = rank_from_text(&letters)
                    .ok_or_else(|| lx.error(format!("bad rank letters '{letters}'")))?;
                sub.nodes.push(Node::Rank(rank));
                return Ok(());
            }

            let name = lx.expect_ident()?;

            if lx.eat_punct(':') {
                sub.nodes.push(Node::Label(name));
                return Ok(());
            }

            // An instruction statement.
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
                let format = require_format(version, opcode)?;
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

            sub.nodes.push(Node::Instr(Instr {
                opcode,
                time,
                rank,
                params,
                offset: 0,
            }));
            Ok(())
        })();

        if let Err(err) = result {
            errors.push(err);
            if errors.len() >= ERROR_CAP {
                // Abandon this sub but keep compiling the rest.
                errors.push(AsmError::Parse {
                    line: lx.line(),
                    message: format!("too many errors, skipping the rest of sub {}", sub.name),
                });
                loop {
                    match lx.next() {
                        None | Some(Tok::Punct('}')) => return Ok(()),
                        _ => {}
                    }
                }
            }
            recover(lx);
        }
    }

    Ok(())
}

pub(crate) fn parse(
    version: u32,
    source: &str,
    map: Option<&MnemonicMap>,
) -> Result<EclProgram, AsmError> {
    let mut lx = Lexer::new(source)?;
    let mut program = EclProgram { version, ..EclProgram::default() };
    let mut errors: Vec<AsmError> = Vec::new();

    while !lx.at_end() {
        let keyword = lx.expect_ident()?;
        match keyword.as_str() {
            "anim" => program.anim_refs = parse_name_block(&mut lx)?,
            "ecli" => program.ecli_refs = parse_name_block(&mut lx)?,
            "sub" => {
                let name = lx.expect_ident()?;
                lx.expect_punct('(')?;
                while !lx.eat_punct(')') {
                    // Parameter names are decorative; skip them.
                    if lx.next().is_none() {
                        return Err(lx.error("unexpected end of sub parameter list"));
                    }
                }
                lx.expect_punct('{')?;

                let mut sub = Sub::named(name);
                let mut sub_errors = Vec::new();
                let fatal = parse_sub_body(&mut lx, &mut sub, version, map, &mut sub_errors);
                errors.extend(sub_errors);
                fatal?;

                if ecl_is_mainline(version) {
                    mainline::bind_offsets(version, &mut sub, 16);
                } else {
                    legacy::bind_offsets(version, &mut sub);
                }
                program.subs.push(sub);
            }
            other => {
                return Err(lx.error(format!("expected 'anim', 'ecli' or 'sub', found '{other}'")))
            }
        }
    }

    match errors.len() {
        0 => Ok(program),
        1 => Err(errors.remove(0)),
        _ => Err(AsmError::Many(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku_types::Version;

    #[test]
    fn parses_the_minimal_program() {
        let program = EclProgram::parse(
            Version::Th10,
            "sub Sub1() { 0: ins_40(16); 0: ins_0(); }",
            None,
        )
        .unwrap();
        assert_eq!(program.subs.len(), 1);
        let sub = &program.subs[0];
        let instrs: Vec<_> = sub.instrs().collect();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].opcode, 40);
        assert_eq!(instrs[0].params[0].value, Value::I32(16));
        assert_eq!(instrs[0].offset, 16);
        // ins_40 is 16 header + 4 payload.
        assert_eq!(instrs[1].offset, 36);
    }

    #[test]
    fn relative_time_accumulates() {
        let program =
            EclProgram::parse(Version::Th10, "sub S() { 10: ins_0(); +5: ins_0(); }", None).unwrap();
        let times: Vec<i32> = program.subs[0].instrs().map(|i| i.time).collect();
        assert_eq!(times, vec![10, 15]);
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let err =
            EclProgram::parse(Version::Th10, "sub S() { ins_40(1, 2); }", None).unwrap_err();
        assert!(matches!(err, AsmError::ArityMismatch { opcode: 40, expected: 1, got: 2, .. }));
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let err = EclProgram::parse(Version::Th10, "sub S() { ins_9999(); }", None).unwrap_err();
        assert!(matches!(err, AsmError::UnknownOpcode { opcode: 9999, .. }));
    }

    #[test]
    fn stack_reference_letters_resolve() {
        let program =
            EclProgram::parse(Version::Th10, "sub S() { ins_43($B); ins_45(%A); }", None).unwrap();
        let instrs: Vec<_> = program.subs[0].instrs().collect();
        assert!(instrs[0].params[0].stack);
        assert_eq!(instrs[0].params[0].value, Value::I32(4));
        assert!(instrs[1].params[0].stack);
        assert_eq!(instrs[1].params[0].value, Value::F32(0.0));
    }
}
