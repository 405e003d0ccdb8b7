use std::env;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser as _;
use log::{debug, error, warn};
use nix::sys::signal::Signal;
use nix::unistd::{gethostname, getuid, User};

use super::cli::Cli;
use super::command::{ExecOption, ExitCode, Invokable};
use super::error::{Result, ShellError};
use super::executor::{Executor, Registry};
use super::parser::{Command, Lexer, Parser};
use super::process::Process;
use crate::utils::path::{current_dir, prompt_dir};
use crate::utils::theme::Theme;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The interpreter: lexer, parser and executor wired over one input.
///
/// A shell is itself an [`Invokable`], so `kosh` can be run from `kosh`.
pub struct Shell {
    process: Arc<Process>,
    option: ExecOption,
    executor: Executor,
    theme: Theme,
    interactive: bool,
}

impl Shell {
    pub fn new(option: ExecOption) -> Self {
        Self::with_registry(option, Registry::with_defaults())
    }

    pub fn with_registry(option: ExecOption, registry: Registry) -> Self {
        Self {
            process: Arc::new(Process::new()),
            option,
            executor: Executor::new(registry),
            theme: Theme::default(),
            interactive: false,
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    /// Runs every statement read from `input` and returns the last status.
    pub fn run<R>(&mut self, input: R) -> ExitCode
    where
        R: Read + Send + 'static,
    {
        let (lexer, tokens) = Lexer::new(input);
        let (parser, commands) = Parser::new(tokens);

        let cancel = Arc::clone(&self.process);
        let lexing = match spawn_stage("lexer", move || lexer.run(&cancel)) {
            Ok(handle) => handle,
            Err(err) => return self.fail(err),
        };
        let cancel = Arc::clone(&self.process);
        let parsing = match spawn_stage("parser", move || parser.run(&cancel)) {
            Ok(handle) => handle,
            Err(err) => return self.fail(err),
        };

        let mut code = 0;
        self.prompt();
        while let Some(command) = self.next(&commands) {
            debug!("statement: {}", command);
            code = match self.executor.execute(command, &self.option) {
                Ok(code) => code,
                Err(err) => {
                    self.option.report("kosh", &err);
                    err.exit_code()
                }
            };
            self.notify_jobs();
            if !self.process.running() {
                break;
            }
            self.prompt();
        }

        if !self.process.running() {
            debug!("shell cancelled");
            // the lexer may be blocked on input, leave it behind
            if parsing.is_finished() && parsing.join().is_err() {
                error!("parser panicked");
            }
            return code;
        }

        if parsing.join().is_err() {
            return self.fail(ShellError::Panicked("parser".to_string()));
        }
        match lexing.join() {
            Ok(Ok(())) => code,
            Ok(Err(err)) => {
                self.option.report("kosh", &err);
                err.exit_code()
            }
            Err(_) => self.fail(ShellError::Panicked("lexer".to_string())),
        }
    }

    fn fail(&self, err: ShellError) -> ExitCode {
        error!("{}", err);
        self.option.report("kosh", &err);
        err.exit_code()
    }

    fn next(&self, commands: &Receiver<Command>) -> Option<Command> {
        loop {
            if !self.process.running() {
                return None;
            }
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(command) => return Some(command),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn prompt(&self) {
        if !self.interactive {
            return;
        }

        let user = User::from_uid(getuid()).ok().flatten();
        let name = user
            .as_ref()
            .map(|user| user.name.clone())
            .unwrap_or_else(|| "kosh".to_string());
        let home = env::var("HOME")
            .ok()
            .or_else(|| user.map(|user| user.dir.to_string_lossy().into_owned()));
        let host = gethostname()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_else(|| "kosh".to_string());
        let dir = prompt_dir(&current_dir(), home.as_deref());

        if let Ok(mut stdout) = self.option.stdout.writer() {
            let _ = stdout.write_all(self.theme.prompt(&name, &host, &dir).as_bytes());
            let _ = stdout.flush();
        }
    }

    fn notify_jobs(&self) {
        let done = self.executor.jobs().reap();
        if !self.interactive || done.is_empty() {
            return;
        }
        if let Ok(mut stderr) = self.option.stderr.writer() {
            for job in done {
                let _ = writeln!(stderr, "{}", (self.theme.notice_style)(job.to_string()));
            }
            let _ = stderr.flush();
        }
    }

    /// Stops this shell when SIGTERM is delivered to its process handle.
    fn watch_signals(&self) -> Result<()> {
        let signals = self.process.notify(&[Signal::SIGTERM]);
        let process = Arc::downgrade(&self.process);
        spawn_stage("signals", move || {
            if let Ok(signal) = signals.recv() {
                debug!("{} received", signal);
                if let Some(process) = process.upgrade() {
                    process.stop();
                }
            }
        })?;
        Ok(())
    }

    fn invoke(&mut self, args: &[String]) -> ExitCode {
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(err) => {
                let output = if err.use_stderr() {
                    &self.option.stderr
                } else {
                    &self.option.stdout
                };
                if let Ok(mut writer) = output.writer() {
                    let _ = write!(writer, "{}", err.render());
                    let _ = writer.flush();
                }
                return err.exit_code();
            }
        };

        if let Err(err) = self.watch_signals() {
            warn!("signal watcher: {}", err);
        }

        self.interactive = cli.interactive
            || (cli.command.is_none() && cli.script.is_none() && self.option.stdin.is_terminal());

        if let Some(text) = cli.command {
            return self.run(Cursor::new(text.into_bytes()));
        }

        if let Some(script) = cli.script {
            let path = self.option.resolve(&script.to_string_lossy());
            return match File::open(&path) {
                Ok(file) => self.run(file),
                Err(err) => {
                    self.option.report("kosh", format!("{}: {}", path.display(), err));
                    3
                }
            };
        }

        match self.option.stdin.reader() {
            Ok(reader) => self.run(reader),
            Err(err) => self.fail(ShellError::Io(err)),
        }
    }
}

fn spawn_stage<F, T>(name: &str, body: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(format!("kosh-{}", name))
        .spawn(body)
        .map_err(ShellError::Io)
}

impl Invokable for Shell {
    fn main(&mut self, args: &[String]) -> ExitCode {
        self.process.start();
        let code = self.invoke(args);
        self.process.stop();
        debug!("shell exited with {}", code);
        code
    }

    fn process(&self) -> &Arc<Process> {
        &self.process
    }
}
