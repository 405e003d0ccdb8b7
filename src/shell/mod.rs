pub mod cli;
pub mod command;
pub mod error;
pub mod executor;
pub mod parser;
pub mod process;
#[allow(clippy::module_inception)]
pub mod shell;

pub use command::{Buffer, ExecOption, ExitCode, Input, Invokable, Output};
pub use error::{Result, ShellError};
pub use executor::{Executor, Registry};
pub use parser::{parse, tokenize, Command, Token, TokenKind};
pub use process::Process;
pub use shell::Shell;
