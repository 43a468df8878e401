//! Tokenizer.

use std::sync::Arc;

use shadec_ir::Location;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int { value: u64, unsigned: bool },
    Float(f64),
    /// String literal; `angle` marks the `<path>` form after `#include`.
    Str { text: String, angle: bool },
    Punct(&'static str),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
    /// First token on its source line (directives must start a line).
    pub line_start: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_ident(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(w) if w == word)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(w) => Some(w),
            _ => None,
        }
    }

    /// Source spelling, used for diagnostics and `#define` bodies.
    pub fn spelling(&self) -> String {
        match &self.kind {
            TokenKind::Ident(w) => w.clone(),
            TokenKind::Int { value, unsigned } => {
                format!("{value}{}", if *unsigned { "u" } else { "" })
            }
            TokenKind::Float(v) => format!("{v:?}"),
            TokenKind::Str { text, angle: false } => format!("\"{text}\""),
            TokenKind::Str { text, angle: true } => format!("<{text}>"),
            TokenKind::Punct(p) => (*p).to_string(),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}

const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "==", "!=", "<=",
    ">=", "&&", "||", "<<", ">>", "+", "-", "*", "/", "%", "=", "<", ">", "!", "&", "|", "^", "~",
    "?", ":", ";", ",", ".", "(", ")", "{", "}", "[", "]", "#",
];

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    file: Arc<str>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

/// Splits `source` into tokens. The result always ends with an `Eof`
/// token.
pub fn tokenize(source: &str, file: Arc<str>) -> Result<Vec<Token>, (Location, String)> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        column: 1,
        file,
        at_line_start: true,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer<'_> {
    fn location(&self) -> Location {
        Location::new(self.file.clone(), self.line, self.column)
    }

    fn peek(&self, ahead: usize) -> u8 {
        self.src.get(self.pos + ahead).copied().unwrap_or(0)
    }

    fn bump(&mut self) -> u8 {
        let c = self.peek(0);
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
        }
        c
    }

    fn push(&mut self, kind: TokenKind, location: Location) {
        self.tokens.push(Token {
            kind,
            location,
            line_start: self.at_line_start,
        });
        self.at_line_start = false;
    }

    fn after_include_directive(&self) -> bool {
        let n = self.tokens.len();
        n >= 2 && self.tokens[n - 1].is_ident("include") && self.tokens[n - 2].is_punct("#") && self.tokens[n - 2].line_start
    }

    fn run(&mut self) -> Result<(), (Location, String)> {
        loop {
            self.skip_trivia()?;
            let loc = self.location();
            let c = self.peek(0);
            if c == 0 {
                self.push(TokenKind::Eof, loc);
                return Ok(());
            }
            if c.is_ascii_alphabetic() || c == b'_' {
                let start = self.pos;
                while self.peek(0).is_ascii_alphanumeric() || self.peek(0) == b'_' {
                    self.bump();
                }
                let word = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                self.push(TokenKind::Ident(word), loc);
            } else if c.is_ascii_digit() || (c == b'.' && self.peek(1).is_ascii_digit()) {
                let kind = self.number(&loc)?;
                self.push(kind, loc);
            } else if c == b'"' {
                self.bump();
                let text = self.until(b'"', &loc)?;
                self.push(TokenKind::Str { text, angle: false }, loc);
            } else if c == b'<' && self.after_include_directive() {
                self.bump();
                let text = self.until(b'>', &loc)?;
                self.push(TokenKind::Str { text, angle: true }, loc);
            } else {
                let rest = &self.src[self.pos..];
                let Some(p) = PUNCTUATORS.iter().find(|p| rest.starts_with(p.as_bytes())) else {
                    return Err((loc, format!("unexpected character '{}'", c as char)));
                };
                for _ in 0..p.len() {
                    self.bump();
                }
                self.push(TokenKind::Punct(p), loc);
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), (Location, String)> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (b' ' | b'\t' | b'\r' | b'\n', _) => {
                    self.bump();
                }
                // Line continuation keeps the logical line going.
                (b'\\', b'\n') => {
                    self.bump();
                    self.bump();
                    self.at_line_start = false;
                }
                (b'/', b'/') => {
                    while self.peek(0) != b'\n' && self.peek(0) != 0 {
                        self.bump();
                    }
                }
                (b'/', b'*') => {
                    let loc = self.location();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (0, _) => return Err((loc, "unterminated block comment".into())),
                            (b'*', b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn until(&mut self, end: u8, loc: &Location) -> Result<String, (Location, String)> {
        let start = self.pos;
        while self.peek(0) != end {
            if self.peek(0) == 0 || self.peek(0) == b'\n' {
                return Err((loc.clone(), "unterminated string".into()));
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.bump();
        Ok(text)
    }

    fn number(&mut self, loc: &Location) -> Result<TokenKind, (Location, String)> {
        let start = self.pos;
        if self.peek(0) == b'0' && matches!(self.peek(1), b'x' | b'X') {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek(0).is_ascii_hexdigit() {
                self.bump();
            }
            let digits = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap_or("");
            let value = u64::from_str_radix(digits, 16)
                .map_err(|_| (loc.clone(), "malformed hexadecimal literal".to_string()))?;
            let unsigned = self.suffix(b'u');
            return Ok(TokenKind::Int { value, unsigned });
        }

        let mut is_float = false;
        while self.peek(0).is_ascii_digit() {
            self.bump();
        }
        if self.peek(0) == b'.' {
            is_float = true;
            self.bump();
            while self.peek(0).is_ascii_digit() {
                self.bump();
            }
        }
        if matches!(self.peek(0), b'e' | b'E')
            && (self.peek(1).is_ascii_digit()
                || (matches!(self.peek(1), b'+' | b'-') && self.peek(2).is_ascii_digit()))
        {
            is_float = true;
            self.bump();
            if matches!(self.peek(0), b'+' | b'-') {
                self.bump();
            }
            while self.peek(0).is_ascii_digit() {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");

        if is_float || self.suffix(b'f') {
            // Consume an optional `f` after a fractional literal.
            self.suffix(b'f');
            let value: f64 = text
                .parse()
                .map_err(|_| (loc.clone(), format!("malformed float literal '{text}'")))?;
            return Ok(TokenKind::Float(value));
        }
        let value: u64 = text
            .parse()
            .map_err(|_| (loc.clone(), format!("integer literal '{text}' is too large")))?;
        let unsigned = self.suffix(b'u');
        Ok(TokenKind::Int { value, unsigned })
    }

    fn suffix(&mut self, s: u8) -> bool {
        if self.peek(0).to_ascii_lowercase() == s && !self.peek(1).is_ascii_alphanumeric() {
            self.bump();
            true
        } else {
            false
        }
    }
}
