//! Shading-language front end for shadec.
//!
//! Source text goes through the [`Preprocessor`](preprocess::Preprocessor)
//! (includes, object-like macros, `#ifdef` conditionals) and is then parsed
//! straight into a [`shadec_ir::CodeLibrary`]: names, types and
//! overloads are resolved while parsing, so the library that comes out is
//! fully typed.

mod code;
pub mod include;
mod lexer;
mod parser;
pub mod preprocess;
mod typeck;

use shadec_ir::{CodeLibrary, ErrorReported, ErrorReporter};

pub use include::{FileSystemIncludes, IncludeError, IncludeHandler, MemoryIncludes, NoIncludes};
pub use typeck::native_result_type;

/// Options of one parse.
#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// Predefined object-like macros (`-D NAME=VALUE`).
    pub defines: Vec<(String, String)>,
}

/// Parses `source` (loaded from `path`) into a new code library.
///
/// Every problem is reported to `err` with its location; the first error
/// aborts the parse.
pub fn parse_library(
    source: &str,
    path: &str,
    includes: &dyn IncludeHandler,
    err: &mut dyn ErrorReporter,
    options: &ParseOptions,
) -> Result<CodeLibrary, ErrorReported> {
    let mut pp = preprocess::Preprocessor::new(includes);
    for (name, value) in &options.defines {
        if let Err((loc, message)) = pp.define(name, value) {
            err.report_error(&loc, &message);
            return Err(ErrorReported);
        }
    }
    let tokens = match pp.run(source, path) {
        Ok(tokens) => tokens,
        Err((loc, message)) => {
            err.report_error(&loc, &message);
            return Err(ErrorReported);
        }
    };
    log::debug!("{path}: {} tokens after preprocessing", tokens.len());

    let lib = parser::Parser::new(tokens, err).parse_library()?;
    log::debug!(
        "{path}: {} programs, {} global functions, {} exports",
        lib.programs.len(),
        lib.global_functions().len(),
        lib.exports.len()
    );
    Ok(lib)
}
