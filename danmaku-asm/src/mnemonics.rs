//! Optional per-version mnemonic files.
//!
//! A plain-text format with section headers and one `number identifier`
//! pair per line:
//!
//! ```text
//! !ins_names
//! 12 jump
//! 13 jumpEq
//! !gvar_names
//! 10000 i0
//! !gvar_types
//! 10000 $
//! ```
//!
//! Identifiers rename instructions and registers in both print and parse
//! direction. Invalid lines are diagnosed and skipped, not fatal.

use std::collections::HashMap;

use crate::AsmError;

const KEYWORDS: &[&str] = &[
    "script", "entry", "global", "sub", "anim", "ecli", "var",
    "timeof", "offsetof", "scriptof", "spriteof",
];

/// Loaded mnemonic map.
#[derive(Debug, Clone, Default)]
pub struct MnemonicMap {
    ins_names: HashMap<u32, String>,
    ins_ids: HashMap<String, u32>,
    gvar_names: HashMap<i32, String>,
    gvar_ids: HashMap<String, i32>,
    gvar_types: HashMap<i32, char>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    InsNames,
    GvarNames,
    GvarTypes,
}

fn valid_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    !value.starts_with("ins_") && !KEYWORDS.contains(&value)
}

impl MnemonicMap {
    /// Parse a mnemonic file. Malformed lines are logged and skipped.
    pub fn load(source: &str, filename: &str) -> Result<MnemonicMap, AsmError> {
        let mut map = MnemonicMap::default();
        let mut section = Section::InsNames;

        for (lineno, raw) in source.lines().enumerate() {
            let lineno = lineno + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if let Some(control) = line.strip_prefix('!') {
                section = match control {
                    "ins_names" => Section::InsNames,
                    "gvar_names" => Section::GvarNames,
                    "gvar_types" => Section::GvarTypes,
                    other => {
                        return Err(AsmError::Parse {
                            line: lineno,
                            message: format!("{filename}: unknown control line '!{other}'"),
                        })
                    }
                };
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(number), Some(value), None) = (fields.next(), fields.next(), fields.next())
            else {
                tracing::warn!("{filename}:{lineno}: expected 'number identifier'");
                continue;
            };
            let Ok(number) = number.parse::<i64>() else {
                tracing::warn!("{filename}:{lineno}: '{number}' is not a number");
                continue;
            };

            match section {
                Section::InsNames => {
                    if !valid_ident(value) {
                        tracing::warn!("{filename}:{lineno}: '{value}' isn't a valid identifier");
                        continue;
                    }
                    map.ins_names.insert(number as u32, value.to_owned());
                    map.ins_ids.insert(value.to_owned(), number as u32);
                }
                Section::GvarNames => {
                    if !valid_ident(value) {
                        tracing::warn!("{filename}:{lineno}: '{value}' isn't a valid identifier");
                        continue;
                    }
                    map.gvar_names.insert(number as i32, value.to_owned());
                    map.gvar_ids.insert(value.to_owned(), number as i32);
                }
                Section::GvarTypes => {
                    let tag = match value {
                        "$" => 'S',
                        "%" => 'f',
                        other => {
                            tracing::warn!("{filename}:{lineno}: unknown type '{other}'");
                            continue;
                        }
                    };
                    map.gvar_types.insert(number as i32, tag);
                }
            }
        }

        Ok(map)
    }

    /// Mnemonic for an opcode, if one was declared.
    pub fn ins_name(&self, opcode: u32) -> Option<&str> {
        self.ins_names.get(&opcode).map(String::as_str)
    }

    /// Opcode for a mnemonic.
    pub fn ins_id(&self, name: &str) -> Option<u32> {
        self.ins_ids.get(name).copied()
    }

    /// Name for a global register id.
    pub fn gvar_name(&self, id: i32) -> Option<&str> {
        self.gvar_names.get(&id).map(String::as_str)
    }

    /// Register id for a global name.
    pub fn gvar_id(&self, name: &str) -> Option<i32> {
        self.gvar_ids.get(name).copied()
    }

    /// Declared type tag (`S` or `f`) for a global register id.
    pub fn gvar_type(&self, id: i32) -> Option<char> {
        self.gvar_types.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
!ins_names
12 jump
0 nop
!gvar_names
10000 i0
10004 f0
!gvar_types
10000 $
10004 %
";

    #[test]
    fn sections_load_both_directions() {
        let map = MnemonicMap::load(SAMPLE, "sample.anmm").unwrap();
        assert_eq!(map.ins_name(12), Some("jump"));
        assert_eq!(map.ins_id("jump"), Some(12));
        assert_eq!(map.gvar_id("f0"), Some(10004));
        assert_eq!(map.gvar_type(10000), Some('S'));
        assert_eq!(map.gvar_type(10004), Some('f'));
    }

    #[test]
    fn invalid_identifiers_are_skipped() {
        let map = MnemonicMap::load("!ins_names\n1 9bad\n2 ins_x\n3 entry\n4 good\n", "m").unwrap();
        assert_eq!(map.ins_name(1), None);
        assert_eq!(map.ins_name(2), None);
        assert_eq!(map.ins_name(3), None);
        assert_eq!(map.ins_name(4), Some("good"));
    }

    #[test]
    fn unknown_control_lines_are_fatal() {
        assert!(MnemonicMap::load("!bogus\n", "m").is_err());
    }
}
