pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;

pub use ast::{Command, Link};
pub use lexer::{tokenize, Lexer, Token, TokenKind};
pub use parser::{parse, Parser};
