use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::command::ExitCode;

/// Everything that can go wrong between reading a byte and reaping a child.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("syntax error: empty command")]
    EmptyCommand,

    #[error("{0}: command not found")]
    NotFound(String),

    #[error("{name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{name}: wait failed: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("close: {0}")]
    Close(#[source] nix::Error),

    #[error("{0} panicked")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{}", join_messages(.0))]
    Joined(Vec<ShellError>),
}

pub type Result<T> = std::result::Result<T, ShellError>;

fn join_messages(errors: &[ShellError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ShellError {
    pub fn spawn(name: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => ShellError::NotFound(name.to_string()),
            _ => ShellError::Spawn {
                name: name.to_string(),
                source,
            },
        }
    }

    /// Combines two errors of one statement; the receiver stays the primary cause.
    pub fn join(self, other: ShellError) -> Self {
        let mut errors = match self {
            ShellError::Joined(errors) => errors,
            primary => vec![primary],
        };
        match other {
            ShellError::Joined(more) => errors.extend(more),
            other => errors.push(other),
        }
        ShellError::Joined(errors)
    }

    /// Folds a list of errors into one, `None` when the list is empty.
    pub fn join_all(errors: Vec<ShellError>) -> Option<Self> {
        let mut errors = errors.into_iter();
        let first = errors.next()?;
        Some(errors.fold(first, ShellError::join))
    }

    /// Status a statement reports when it fails with this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ShellError::Syntax(_) | ShellError::EmptyCommand => 2,
            ShellError::NotFound(_) => 127,
            ShellError::Spawn { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
                126
            }
            ShellError::Joined(errors) => errors.first().map_or(1, ShellError::exit_code),
            _ => 1,
        }
    }
}
