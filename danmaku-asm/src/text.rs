//! Token stream shared by the ECL and ANM source parsers.

use crate::AsmError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Int(i64),
    Float(f32),
    Str(String),
    /// `@"<hex>"`: raw bytes carried through opcode-table-free.
    Raw(Vec<u8>),
    Punct(char),
}

pub(crate) struct Lexer {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

fn parse_err(line: usize, message: impl Into<String>) -> AsmError {
    AsmError::Parse { line, message: message.into() }
}

fn lex_string(chars: &mut std::iter::Peekable<std::str::Chars>, line: usize) -> Result<String, AsmError> {
    let mut out = String::new();
    loop {
        match chars.next() {
            Some('"') => return Ok(out),
            Some('\\') => match chars.next() {
                Some(c @ ('"' | '\\')) => out.push(c),
                Some(c) => {
                    out.push('\\');
                    out.push(c);
                }
                None => return Err(parse_err(line, "unterminated string")),
            },
            Some(c) => out.push(c),
            None => return Err(parse_err(line, "unterminated string")),
        }
    }
}

impl Lexer {
    pub(crate) fn new(source: &str) -> Result<Lexer, AsmError> {
        let mut toks = Vec::new();

        for (lineno, line) in source.lines().enumerate() {
            let line_no = lineno + 1;
            let mut chars = line.chars().peekable();

            while let Some(&c) = chars.peek() {
                match c {
                    ' ' | '\t' | '\r' => {
                        chars.next();
                    }
                    '/' => {
                        chars.next();
                        if chars.peek() == Some(&'/') {
                            break; // comment to end of line
                        }
                        toks.push((Tok::Punct('/'), line_no));
                    }
                    '"' => {
                        chars.next();
                        let s = lex_string(&mut chars, line_no)?;
                        toks.push((Tok::Str(s), line_no));
                    }
                    '@' => {
                        chars.next();
                        if chars.next() != Some('"') {
                            return Err(parse_err(line_no, "expected '\"' after '@'"));
                        }
                        let s = lex_string(&mut chars, line_no)?;
                        let bytes = hex::decode(&s)
                            .map_err(|e| parse_err(line_no, format!("bad hex blob: {e}")))?;
                        toks.push((Tok::Raw(bytes), line_no));
                    }
                    '0'..='9' | '.' => {
                        let mut text = String::new();
                        let mut float = c == '.';
                        while let Some(&d) = chars.peek() {
                            match d {
                                '0'..='9' => text.push(d),
                                '.' => {
                                    float = true;
                                    text.push(d);
                                }
                                _ => break,
                            }
                            chars.next();
                        }
                        if chars.peek() == Some(&'f') {
                            chars.next();
                            float = true;
                        }
                        if float {
                            let v: f32 = text
                                .parse()
                                .map_err(|_| parse_err(line_no, format!("bad float '{text}'")))?;
                            toks.push((Tok::Float(v), line_no));
                        } else {
                            let v: i64 = text
                                .parse()
                                .map_err(|_| parse_err(line_no, format!("bad integer '{text}'")))?;
                            toks.push((Tok::Int(v), line_no));
                        }
                    }
                    'a'..='z' | 'A'..='Z' | '_' => {
                        let mut text = String::new();
                        while let Some(&d) = chars.peek() {
                            if d.is_ascii_alphanumeric() || d == '_' {
                                text.push(d);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        toks.push((Tok::Ident(text), line_no));
                    }
                    _ => {
                        chars.next();
                        toks.push((Tok::Punct(c), line_no));
                    }
                }
            }
        }

        Ok(Lexer { toks, pos: 0 })
    }

    pub(crate) fn line(&self) -> usize {
        self.toks
            .get(self.pos.min(self.toks.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    pub(crate) fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    pub(crate) fn peek2(&self) -> Option<&Tok> {
        self.toks.get(self.pos + 1).map(|(t, _)| t)
    }

    pub(crate) fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_punct(&mut self, c: char) -> Result<(), AsmError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> Result<String, AsmError> {
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s),
            _ => Err(self.error("expected identifier")),
        }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> AsmError {
        parse_err(self.line(), message)
    }
}

/// Quote a string for source output, escaping quotes and backslashes.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_a_statement() {
        let mut lx = Lexer::new("0: ins_40(16); // stack\n").unwrap();
        assert_eq!(lx.next(), Some(Tok::Int(0)));
        assert_eq!(lx.next(), Some(Tok::Punct(':')));
        assert_eq!(lx.next(), Some(Tok::Ident("ins_40".into())));
        assert_eq!(lx.next(), Some(Tok::Punct('(')));
        assert_eq!(lx.next(), Some(Tok::Int(16)));
        assert_eq!(lx.next(), Some(Tok::Punct(')')));
        assert_eq!(lx.next(), Some(Tok::Punct(';')));
        assert!(lx.at_end());
    }

    #[test]
    fn lexes_floats_and_strings() {
        let mut lx = Lexer::new("1.5f \"a \\\"b\\\"\" @\"00ff\"").unwrap();
        assert_eq!(lx.next(), Some(Tok::Float(1.5)));
        assert_eq!(lx.next(), Some(Tok::Str("a \"b\"".into())));
        assert_eq!(lx.next(), Some(Tok::Raw(vec![0, 0xff])));
    }

    #[test]
    fn tracks_line_numbers() {
        let mut lx = Lexer::new("a\nb\nc").unwrap();
        lx.next();
        lx.next();
        assert_eq!(lx.line(), 2);
    }

    #[test]
    fn quoting_round_trips() {
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
    }
}
