use std::fmt::Display;
use std::fs::File;
use std::io::{self, Cursor, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use nix::sys::signal::Signal;

use super::process::Process;

/// Conventional process status: 0 is success, anything else failure.
pub type ExitCode = i32;

/// A command the executor can instantiate from the registry and run in-process.
pub trait Invokable: Send {
    /// Runs the command; `args[0]` is the name it was invoked by.
    fn main(&mut self, args: &[String]) -> ExitCode;

    fn process(&self) -> &Arc<Process>;

    fn kill(&self) {
        self.process().kill();
    }

    fn wait(&self) {
        self.process().wait();
    }

    fn signal(&self, signal: Signal) {
        self.process().signal(signal);
    }
}

/// Where a command reads its standard input from.
#[derive(Debug, Clone)]
pub enum Input {
    Inherit,
    File(Arc<File>),
    /// Literal bytes, e.g. a heredoc body.
    Text(Arc<[u8]>),
}

impl Input {
    pub fn text(text: impl Into<String>) -> Self {
        Input::Text(Arc::from(text.into().into_bytes()))
    }

    pub fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            Input::Inherit => Box::new(io::stdin()),
            Input::File(file) => Box::new(file.try_clone()?),
            Input::Text(text) => Box::new(Cursor::new(Arc::clone(text))),
        })
    }

    /// Text has to be pumped into a pipe by the caller.
    pub(crate) fn stdio(&self) -> io::Result<Stdio> {
        Ok(match self {
            Input::Inherit => Stdio::inherit(),
            Input::File(file) => Stdio::from(file.try_clone()?),
            Input::Text(_) => Stdio::piped(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Input::Inherit => io::stdin().is_terminal(),
            Input::File(file) => file.is_terminal(),
            Input::Text(_) => false,
        }
    }
}

/// Where a command writes one of its output streams.
#[derive(Debug, Clone)]
pub enum Output {
    Stdout,
    Stderr,
    File(Arc<File>),
    Buffer(Buffer),
}

impl Output {
    pub fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(match self {
            Output::Stdout => Box::new(io::stdout()),
            Output::Stderr => Box::new(io::stderr()),
            Output::File(file) => Box::new(file.try_clone()?),
            Output::Buffer(buffer) => Box::new(buffer.clone()),
        })
    }

    /// Buffers have to be filled from a pipe by the caller.
    pub(crate) fn stdio(&self) -> io::Result<Stdio> {
        Ok(match self {
            Output::Stdout => Stdio::from(io::stdout()),
            Output::Stderr => Stdio::from(io::stderr()),
            Output::File(file) => Stdio::from(file.try_clone()?),
            Output::Buffer(_) => Stdio::piped(),
        })
    }
}

/// Shared in-memory sink, mostly for capturing what a statement prints.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for Buffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The ambient state a command runs against.
///
/// Cloning shares the underlying handles; a pipe write end only closes once
/// every clone holding it is gone.
#[derive(Debug, Clone)]
pub struct ExecOption {
    /// Working directory for spawned processes; `None` inherits the shell's.
    pub dir: Option<PathBuf>,
    /// Replacement environment; `None` inherits the live process environment.
    pub env: Option<Vec<(String, String)>>,
    pub stdin: Input,
    pub stdout: Output,
    pub stderr: Output,
}

impl Default for ExecOption {
    fn default() -> Self {
        Self {
            dir: None,
            env: None,
            stdin: Input::Inherit,
            stdout: Output::Stdout,
            stderr: Output::Stderr,
        }
    }
}

impl ExecOption {
    /// Resolves a redirection target against `dir`.
    pub fn resolve(&self, path: &str) -> PathBuf {
        match &self.dir {
            Some(dir) if Path::new(path).is_relative() => dir.join(path),
            _ => PathBuf::from(path),
        }
    }

    /// Prints `<component>: <message>` on stderr.
    pub fn report(&self, component: &str, message: impl Display) {
        if let Ok(mut stderr) = self.stderr.writer() {
            let _ = writeln!(stderr, "{}: {}", component, message);
            let _ = stderr.flush();
        }
    }
}
