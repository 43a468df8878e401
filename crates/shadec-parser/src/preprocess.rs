//! Token-level preprocessor: includes, object-like macros and
//! `#ifdef`-style conditionals.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use shadec_ir::Location;

use crate::include::IncludeHandler;
use crate::lexer::{Token, TokenKind, tokenize};

const MAX_INCLUDE_DEPTH: usize = 32;

type PreprocessResult<T> = Result<T, (Location, String)>;

struct Conditional {
    /// Tokens in the current branch are kept.
    active: bool,
    /// The enclosing region was active.
    parent_active: bool,
    seen_else: bool,
    location: Location,
}

pub struct Preprocessor<'a> {
    includes: &'a dyn IncludeHandler,
    macros: FxHashMap<String, Vec<Token>>,
    once: FxHashSet<String>,
    out: Vec<Token>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(includes: &'a dyn IncludeHandler) -> Self {
        Self {
            includes,
            macros: FxHashMap::default(),
            once: FxHashSet::default(),
            out: Vec::new(),
        }
    }

    /// Predefines `NAME` as `value` (command line `-D`).
    pub fn define(&mut self, name: &str, value: &str) -> PreprocessResult<()> {
        let mut body = tokenize(value, Arc::from("<command line>"))?;
        body.pop();
        self.macros.insert(name.to_string(), body);
        Ok(())
    }

    /// Runs the root file and returns the expanded token stream, ending
    /// with `Eof`.
    pub fn run(mut self, source: &str, path: &str) -> PreprocessResult<Vec<Token>> {
        let tokens = tokenize(source, Arc::from(path))?;
        self.process(tokens, path, 0)?;
        let eof = Location::new(Arc::from(path), 0, 0);
        self.out.push(Token {
            kind: TokenKind::Eof,
            location: eof,
            line_start: true,
        });
        Ok(self.out)
    }

    fn process(&mut self, tokens: Vec<Token>, path: &str, depth: usize) -> PreprocessResult<()> {
        let mut stack: Vec<Conditional> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            if matches!(tok.kind, TokenKind::Eof) {
                break;
            }
            let active = stack.last().is_none_or(|c| c.active);

            if tok.is_punct("#") && tok.line_start {
                let start = i + 1;
                let mut end = start;
                while end < tokens.len()
                    && !tokens[end].line_start
                    && !matches!(tokens[end].kind, TokenKind::Eof)
                {
                    end += 1;
                }
                self.directive(&tokens[i], &tokens[start..end], path, depth, active, &mut stack)?;
                i = end;
                continue;
            }

            if active {
                self.expand(tok.clone(), &mut Vec::new());
            }
            i += 1;
        }

        if let Some(open) = stack.last() {
            return Err((open.location.clone(), "unterminated conditional directive".into()));
        }
        Ok(())
    }

    fn directive(
        &mut self,
        hash: &Token,
        line: &[Token],
        path: &str,
        depth: usize,
        active: bool,
        stack: &mut Vec<Conditional>,
    ) -> PreprocessResult<()> {
        let Some(name) = line.first().and_then(Token::ident) else {
            return Err((hash.location.clone(), "expected a directive name after '#'".into()));
        };
        let loc = line[0].location.clone();
        let arg = |n: usize| -> PreprocessResult<&str> {
            line.get(n)
                .and_then(Token::ident)
                .ok_or_else(|| (loc.clone(), format!("#{name} expects a macro name")))
        };

        match name {
            "ifdef" | "ifndef" => {
                let defined = self.macros.contains_key(arg(1)?);
                let taken = if name == "ifdef" { defined } else { !defined };
                stack.push(Conditional {
                    active: active && taken,
                    parent_active: active,
                    seen_else: false,
                    location: loc,
                });
            }
            "else" => {
                let Some(top) = stack.last_mut() else {
                    return Err((loc, "#else without #ifdef".into()));
                };
                if top.seen_else {
                    return Err((loc, "duplicate #else".into()));
                }
                top.seen_else = true;
                top.active = top.parent_active && !top.active;
            }
            "endif" => {
                if stack.pop().is_none() {
                    return Err((loc, "#endif without #ifdef".into()));
                }
            }
            _ if !active => {}
            "define" => {
                let macro_name = arg(1)?;
                let body = &line[2..];
                if let Some(first) = body.first() {
                    let name_end = line[1].location.column + macro_name.len() as u32;
                    if first.is_punct("(") && first.location.line == line[1].location.line && first.location.column == name_end {
                        return Err((loc, format!("function-like macro '{macro_name}' is not supported")));
                    }
                }
                self.macros.insert(macro_name.to_string(), body.to_vec());
            }
            "undef" => {
                self.macros.remove(arg(1)?);
            }
            "include" => {
                let Some(TokenKind::Str { text, angle }) = line.get(1).map(|t| &t.kind) else {
                    return Err((loc, "#include expects \"path\" or <path>".into()));
                };
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err((loc, format!("#include nested deeper than {MAX_INCLUDE_DEPTH} levels")));
                }
                let (bytes, resolved) = self
                    .includes
                    .load_include(*angle, text, path)
                    .map_err(|e| (loc.clone(), e.to_string()))?;
                if self.once.contains(&resolved) {
                    return Ok(());
                }
                let source = String::from_utf8(bytes)
                    .map_err(|_| (loc.clone(), format!("'{resolved}' is not valid UTF-8")))?;
                let tokens = tokenize(&source, Arc::from(resolved.as_str()))?;
                self.process(tokens, &resolved, depth + 1)?;
            }
            "pragma" => {
                if line.get(1).is_some_and(|t| t.is_ident("once")) {
                    self.once.insert(path.to_string());
                }
            }
            "error" => {
                let text: Vec<String> = line[1..].iter().map(Token::spelling).collect();
                return Err((loc, format!("#error {}", text.join(" "))));
            }
            other => return Err((loc, format!("unsupported directive '#{other}'"))),
        }
        Ok(())
    }

    /// Emits `tok`, replacing macro names by their bodies. `active` holds
    /// the macros being expanded, which are not expanded again.
    fn expand(&mut self, tok: Token, active: &mut Vec<String>) {
        let body = match tok.ident() {
            Some(name) if !active.iter().any(|a| a == name) => self.macros.get(name).cloned(),
            _ => None,
        };
        let Some(body) = body else {
            self.out.push(Token {
                line_start: false,
                ..tok
            });
            return;
        };
        active.push(tok.spelling());
        for t in body {
            self.expand(
                Token {
                    kind: t.kind,
                    location: tok.location.clone(),
                    line_start: false,
                },
                active,
            );
        }
        active.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::{MemoryIncludes, NoIncludes};

    fn spell(tokens: &[Token]) -> String {
        tokens
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Eof))
            .map(Token::spelling)
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn object_macros_expand_recursively() {
        let src = "#define A B + 1\n#define B 2\nx = A;";
        let out = Preprocessor::new(&NoIncludes).run(src, "m").unwrap();
        assert_eq!(spell(&out), "x = 2 + 1 ;");
    }

    #[test]
    fn self_referencing_macro_stops() {
        let src = "#define X X + 1\nX";
        let out = Preprocessor::new(&NoIncludes).run(src, "m").unwrap();
        assert_eq!(spell(&out), "X + 1");
    }

    #[test]
    fn conditionals_select_branches() {
        let src = "#define FAST\n#ifdef FAST\na\n#else\nb\n#endif\n#ifndef FAST\nc\n#endif\nd";
        let out = Preprocessor::new(&NoIncludes).run(src, "m").unwrap();
        assert_eq!(spell(&out), "a d");
    }

    #[test]
    fn nested_inactive_regions_stay_inactive() {
        let src = "#ifdef NOPE\n#ifndef NOPE\na\n#else\nb\n#endif\n#endif\nc";
        let out = Preprocessor::new(&NoIncludes).run(src, "m").unwrap();
        assert_eq!(spell(&out), "c");
    }

    #[test]
    fn includes_are_spliced_and_pragma_once_honored() {
        let inc = MemoryIncludes::new().with_file("c.h", "#pragma once\nconst float K = 1.0;");
        let src = "#include \"c.h\"\n#include \"c.h\"\nK";
        let out = Preprocessor::new(&inc).run(src, "main").unwrap();
        assert_eq!(spell(&out), "const float K = 1.0 ; K");
        assert_eq!(&*out[0].location.file, "c.h");
    }

    #[test]
    fn command_line_defines() {
        let mut pp = Preprocessor::new(&NoIncludes);
        pp.define("QUALITY", "3").unwrap();
        let out = pp.run("QUALITY", "m").unwrap();
        assert_eq!(spell(&out), "3");
    }

    #[test]
    fn errors_carry_locations() {
        let (loc, msg) = Preprocessor::new(&NoIncludes).run("\n#include \"x.h\"", "m").unwrap_err();
        assert_eq!(loc.line, 2);
        assert!(msg.contains("x.h"), "{msg}");

        let (_, msg) = Preprocessor::new(&NoIncludes).run("#ifdef A\n", "m").unwrap_err();
        assert_eq!(msg, "unterminated conditional directive");
    }
}
