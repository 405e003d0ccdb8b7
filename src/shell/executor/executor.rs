use std::fs::{File, OpenOptions};
use std::os::fd::IntoRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use nix::fcntl::OFlag;
use nix::unistd::{close, pipe2};

use super::external;
use super::job_manager::JobManager;
use super::registry::{Entry, Registry};
use crate::shell::command::{ExecOption, ExitCode, Input, Output};
use crate::shell::error::{Result, ShellError};
use crate::shell::parser::ast::Command;
use crate::shell::process::Process;

/// Closes the last reference to `file`, surfacing the close error. A file
/// still shared with a background job is left to that job.
fn release(file: Arc<File>) -> Result<()> {
    match Arc::try_unwrap(file) {
        Ok(file) => close(file.into_raw_fd()).map_err(ShellError::Close),
        Err(_) => Ok(()),
    }
}

/// Files opened for one stage's redirections.
#[derive(Default)]
struct Redirections {
    files: Vec<Arc<File>>,
}

impl Redirections {
    fn open(&mut self, path: PathBuf, options: &OpenOptions) -> Result<Arc<File>> {
        let file = options
            .open(&path)
            .map_err(|source| ShellError::Redirect { path, source })?;
        let file = Arc::new(file);
        self.files.push(Arc::clone(&file));
        Ok(file)
    }

    /// Rewires `option` for the `<`, `<<`, `>` and `>>` of `command`.
    fn apply(&mut self, command: &Command, option: &mut ExecOption) -> Result<()> {
        if let Some(input) = &command.input {
            let file = self.open(option.resolve(input), OpenOptions::new().read(true))?;
            option.stdin = Input::File(file);
        } else if let Some(text) = &command.heredoc {
            option.stdin = Input::text(text.as_str());
        }

        if let Some(output) = &command.output {
            let file = self.open(
                option.resolve(output),
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o644),
            )?;
            option.stdout = Output::File(file);
        }
        if let Some(append) = &command.append {
            let file = self.open(
                option.resolve(append),
                OpenOptions::new().append(true).create(true).mode(0o644),
            )?;
            option.stdout = Output::File(file);
        }
        Ok(())
    }

    fn close(self) -> Result<()> {
        let errors: Vec<ShellError> = self
            .files
            .into_iter()
            .filter_map(|file| release(file).err())
            .collect();
        match ShellError::join_all(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Joins the outcome of a step with a follow-up error, keeping the step's
/// error first.
fn merge(result: Result<ExitCode>, extra: Result<()>) -> Result<ExitCode> {
    match (result, extra) {
        (Ok(code), Ok(())) => Ok(code),
        (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
        (Err(err), Err(extra)) => Err(err.join(extra)),
    }
}

/// Walks statement trees and turns them into running commands.
#[derive(Debug)]
pub struct Executor {
    registry: Arc<Registry>,
    jobs: Arc<JobManager>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Registry::with_defaults())
    }
}

impl Executor {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            jobs: Arc::new(JobManager::new()),
        }
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Runs one statement. The status is the one of the rightmost pipe stage
    /// of the last `&&`/`||` branch taken.
    pub fn execute(&self, mut command: Command, option: &ExecOption) -> Result<ExitCode> {
        let pipe = command.pipe.take();
        let and = command.and.take();
        let or = command.or.take();

        let mut code = match pipe {
            Some(pipe) => self.execute_piped(command, *pipe, option)?,
            None => self.run_stage(command, option.clone())?,
        };

        if let Some(and) = and {
            if code == 0 {
                code = self.execute(*and, option)?;
            }
        }
        if let Some(or) = or {
            if code != 0 {
                code = self.execute(*or, option)?;
            }
        }

        Ok(code)
    }

    fn execute_piped(&self, command: Command, pipe: Command, option: &ExecOption) -> Result<ExitCode> {
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
        let writer = Arc::new(File::from(writer));
        let pipe_option = ExecOption {
            stdin: Input::File(Arc::new(File::from(reader))),
            ..option.clone()
        };
        let this_option = ExecOption {
            stdout: Output::File(Arc::clone(&writer)),
            ..option.clone()
        };
        debug!("pipe: {} | {}", command.path, pipe.path);

        thread::scope(|scope| {
            let child = thread::Builder::new()
                .name(format!("pipe-{}", pipe.path))
                .spawn_scoped(scope, move || self.execute(pipe, &pipe_option))
                .map_err(ShellError::Io)?;

            let this = self.run_stage(command, this_option);
            // the reader sees EOF once our copy of the write end is gone
            let this = merge(this, release(writer));

            let piped = child
                .join()
                .unwrap_or_else(|_| Err(ShellError::Panicked("pipe stage".to_string())));

            match (this, piped) {
                (Ok(_), piped) => piped,
                (Err(err), Ok(_)) => Err(err),
                (Err(err), Err(piped)) => Err(err.join(piped)),
            }
        })
    }

    /// One node without its children: redirect, dispatch, close.
    fn run_stage(&self, command: Command, mut option: ExecOption) -> Result<ExitCode> {
        if command.is_empty() {
            return Err(ShellError::EmptyCommand);
        }

        let mut redirections = Redirections::default();
        let result = match redirections.apply(&command, &mut option) {
            Ok(()) => self.dispatch(&command, option),
            Err(err) => {
                drop(option);
                Err(err)
            }
        };

        merge(result, redirections.close())
    }

    fn dispatch(&self, command: &Command, option: ExecOption) -> Result<ExitCode> {
        let argv = command.argv();

        match self.registry.resolve(&command.path) {
            Some(Entry::Builtin(builtin)) => {
                debug!("builtin: {}", argv.join(" "));
                Ok(builtin(&option, &argv))
            }
            Some(Entry::Command(factory)) => {
                debug!("command: {}", argv.join(" "));
                let mut invokable = factory(option);
                if !command.background {
                    return Ok(invokable.main(&argv));
                }

                let process = Arc::clone(invokable.process());
                let index = self.jobs.add_job(None, argv.join(" "), process);
                let jobs = Arc::clone(&self.jobs);
                thread::Builder::new()
                    .name(format!("job-{}", index))
                    .spawn(move || {
                        let code = invokable.main(&argv);
                        jobs.finish(index, code);
                    })
                    .map_err(|err| {
                        self.jobs.finish(index, 1);
                        ShellError::Io(err)
                    })?;
                Ok(0)
            }
            None => {
                let running = external::spawn(&argv, &option)?;
                drop(option);
                if !command.background {
                    return running.wait();
                }

                let process = Arc::new(Process::new());
                process.start();
                let index = self
                    .jobs
                    .add_job(Some(running.id()), argv.join(" "), process);
                let jobs = Arc::clone(&self.jobs);
                let name = command.path.clone();
                thread::Builder::new()
                    .name(format!("job-{}", index))
                    .spawn(move || {
                        let code = running.wait().unwrap_or_else(|err| {
                            warn!("{}: {}", name, err);
                            err.exit_code()
                        });
                        jobs.finish(index, code);
                    })
                    .map_err(|err| {
                        self.jobs.finish(index, 1);
                        ShellError::Io(err)
                    })?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::shell::command::{Buffer, Invokable};
    use crate::shell::parser::parse;
    use std::fs;
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    /// Upper-cases its stdin; exits with the number of bytes read modulo 256
    /// when asked to.
    struct Upper {
        option: ExecOption,
        process: Arc<Process>,
    }

    impl Invokable for Upper {
        fn main(&mut self, args: &[String]) -> ExitCode {
            self.process.start();
            let mut text = String::new();
            let _ = self.option.stdin.reader().unwrap().read_to_string(&mut text);
            let mut out = self.option.stdout.writer().unwrap();
            let _ = out.write_all(text.to_uppercase().as_bytes());
            self.process.stop();
            match args.get(1).map(String::as_str) {
                Some("--count") => (text.len() % 256) as ExitCode,
                _ => 0,
            }
        }

        fn process(&self) -> &Arc<Process> {
            &self.process
        }
    }

    fn executor() -> Executor {
        let mut registry = Registry::with_defaults();
        registry.register_command("upper", |option| {
            Box::new(Upper {
                option,
                process: Arc::new(Process::new()),
            })
        });
        Executor::new(registry)
    }

    fn capture() -> (ExecOption, Buffer, Buffer) {
        let stdout = Buffer::new();
        let stderr = Buffer::new();
        let option = ExecOption {
            stdin: Input::text(""),
            stdout: Output::Buffer(stdout.clone()),
            stderr: Output::Buffer(stderr.clone()),
            ..ExecOption::default()
        };
        (option, stdout, stderr)
    }

    /// Runs every statement of `line`, returning the last status.
    fn run(executor: &Executor, line: &str, option: &ExecOption) -> Result<ExitCode> {
        let mut code = 0;
        for command in parse(line).unwrap() {
            code = executor.execute(command, option)?;
        }
        Ok(code)
    }

    #[test]
    fn test_simple_external() {
        let (option, stdout, _) = capture();
        let code = run(&executor(), "echo hello world", &option).unwrap();
        assert_eq!(code, 0);
        assert_eq!(stdout.to_string_lossy(), "hello world\n");
    }

    #[test]
    fn test_pipe_status_is_rightmost() {
        let executor = executor();
        let (option, _, _) = capture();
        assert_eq!(run(&executor, "false | true", &option).unwrap(), 0);
        assert_ne!(run(&executor, "true | false", &option).unwrap(), 0);
    }

    #[test]
    fn test_pipe_through_processes() {
        let (option, stdout, _) = capture();
        let code = run(&executor(), "printf 'b\\na\\n' | sort | head -n 1", &option).unwrap();
        assert_eq!(code, 0);
        assert_eq!(stdout.to_string_lossy(), "a\n");
    }

    #[test]
    fn test_pipe_into_registered_command() {
        let (option, stdout, _) = capture();
        let code = run(&executor(), "echo shout | upper --count", &option).unwrap();
        assert_eq!(code, 6);
        assert_eq!(stdout.to_string_lossy(), "SHOUT\n");
    }

    #[test]
    fn test_and_or() {
        let executor = executor();
        let (option, stdout, _) = capture();

        assert_eq!(run(&executor, "true && echo ok", &option).unwrap(), 0);
        assert_eq!(stdout.to_string_lossy(), "ok\n");

        let (option, stdout, _) = capture();
        assert_eq!(run(&executor, "false && echo no", &option).unwrap(), 1);
        assert_eq!(stdout.to_string_lossy(), "");

        let (option, stdout, _) = capture();
        assert_eq!(run(&executor, "false || echo ok", &option).unwrap(), 0);
        assert_eq!(stdout.to_string_lossy(), "ok\n");

        let (option, stdout, _) = capture();
        assert_eq!(run(&executor, "true || echo no", &option).unwrap(), 0);
        assert_eq!(stdout.to_string_lossy(), "");
    }

    #[test]
    fn test_output_truncates_and_append_appends() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        let executor = executor();
        let (option, _, _) = capture();

        let line = format!("echo hi > {}", file.display());
        run(&executor, &line, &option).unwrap();
        run(&executor, &line, &option).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "hi\n");

        let line = format!("echo again >> {}", file.display());
        run(&executor, &line, &option).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "hi\nagain\n");
    }

    #[test]
    fn test_relative_targets_resolve_against_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "from file\n").unwrap();
        let (mut option, _, _) = capture();
        option.dir = Some(dir.path().to_path_buf());

        let code = run(&executor(), "cat < in.txt > out.txt", &option).unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "from file\n"
        );
    }

    #[test]
    fn test_append_wins_over_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let app = dir.path().join("app.txt");
        let (option, _, _) = capture();

        let line = format!("echo x > {} >> {}", out.display(), app.display());
        run(&executor(), &line, &option).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
        assert_eq!(fs::read_to_string(&app).unwrap(), "x\n");
    }

    #[test]
    fn test_heredoc_and_input_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "file wins").unwrap();
        let executor = executor();

        let (option, stdout, _) = capture();
        run(&executor, "cat <<EOF\nline1\nline2\nEOF\n", &option).unwrap();
        assert_eq!(stdout.to_string_lossy(), "line1\nline2");

        let (option, stdout, _) = capture();
        let line = format!("cat < {} <<EOF\nheredoc\nEOF\n", input.display());
        run(&executor, &line, &option).unwrap();
        assert_eq!(stdout.to_string_lossy(), "file wins");
    }

    #[test]
    fn test_missing_redirect_source_aborts() {
        let (option, stdout, _) = capture();
        let err = run(&executor(), "cat < /no/such/kosh/file && echo after", &option).unwrap_err();
        assert!(matches!(err, ShellError::Redirect { .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(stdout.to_string_lossy(), "");
    }

    #[test]
    fn test_not_found_and_empty_command() {
        let executor = executor();
        let (option, _, _) = capture();

        let err = run(&executor, "kosh-no-such-program", &option).unwrap_err();
        assert_eq!(err.exit_code(), 127);

        let err = run(&executor, "true &&", &option).unwrap_err();
        assert!(matches!(err, ShellError::EmptyCommand));

        let err = run(&executor, "true |", &option).unwrap_err();
        assert!(matches!(err, ShellError::EmptyCommand));

        let err = executor
            .execute(Command::default(), &option)
            .unwrap_err();
        assert!(matches!(err, ShellError::EmptyCommand));
    }

    #[test]
    fn test_pipe_child_error_is_joined() {
        let (option, stdout, _) = capture();
        let err = run(&executor(), "echo x | kosh-no-such-program", &option).unwrap_err();
        assert_eq!(err.exit_code(), 127);
        assert_eq!(stdout.to_string_lossy(), "");
    }

    #[test]
    fn test_both_pipe_stages_failing_are_joined() {
        let (option, _, _) = capture();
        let err = run(&executor(), "kosh-missing-left | kosh-missing-right", &option).unwrap_err();
        match &err {
            ShellError::Joined(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(matches!(&errors[0], ShellError::NotFound(name) if name == "kosh-missing-left"));
                assert!(matches!(&errors[1], ShellError::NotFound(name) if name == "kosh-missing-right"));
            }
            other => panic!("expected joined error, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_builtin_runs_in_process() {
        let (option, _, stderr) = capture();
        let code = run(&executor(), "exit 1 2", &option).unwrap();
        assert_eq!(code, 1);
        assert_eq!(stderr.to_string_lossy(), "exit: too many arguments\n");
    }

    #[test]
    fn test_background_returns_immediately() {
        let executor = executor();
        let (option, stdout, _) = capture();

        let start = Instant::now();
        let code = run(&executor, "sleep 2 & echo done", &option).unwrap();
        assert_eq!(code, 0);
        assert_eq!(stdout.to_string_lossy(), "done\n");
        assert!(start.elapsed() < Duration::from_millis(1500));

        let jobs = executor.jobs().get_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].command, "sleep 2");
        assert!(jobs[0].pid.is_some());

        jobs[0].process.wait();
        let done = executor.jobs().reap();
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn test_background_registered_command() {
        let executor = executor();
        let (mut option, stdout, _) = capture();
        option.stdin = Input::text("bg");

        let code = run(&executor, "upper &", &option).unwrap();
        assert_eq!(code, 0);

        let jobs = executor.jobs().get_jobs();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].pid.is_none());
        jobs[0].process.wait();

        // the job table is updated right after the process handle stops
        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.jobs().reap().is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stdout.to_string_lossy(), "BG");
    }
}
