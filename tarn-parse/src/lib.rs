#![forbid(unsafe_code)]

mod error;
mod parser;
mod symbols;

use miette::IntoDiagnostic;
use tarn_lex::Lexer;
use tarn_syntax::Module;

pub use error::ParseError;
pub use parser::Parser;

/// Lexes and parses a whole module from source text.
pub fn parse_source(src: &str) -> miette::Result<Module> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    Parser::new(&tokens).parse_module().into_diagnostic()
}
