use std::io::{self, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{self, Child, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::shell::command::{Buffer, ExecOption, ExitCode, Input, Output};
use crate::shell::error::{Result, ShellError};

/// A spawned OS process plus the threads moving bytes in and out of it.
pub(crate) struct Running {
    name: String,
    child: Child,
    pumps: Vec<JoinHandle<()>>,
}

impl Running {
    pub(crate) fn id(&self) -> u32 {
        self.child.id()
    }

    /// Reaps the process, then drains its pumps.
    pub(crate) fn wait(mut self) -> Result<ExitCode> {
        let status = self.child.wait().map_err(|source| ShellError::Wait {
            name: self.name.clone(),
            source,
        })?;
        for pump in self.pumps {
            if pump.join().is_err() {
                warn!("{}: stream pump panicked", self.name);
            }
        }
        debug!("{} exited with {}", self.name, status);
        Ok(exit_code(status))
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Starts `argv[0]` with the streams, directory and environment of `option`.
pub(crate) fn spawn(argv: &[String], option: &ExecOption) -> Result<Running> {
    let name = argv.first().cloned().unwrap_or_default();
    let mut command = process::Command::new(&name);
    command.args(argv.get(1..).unwrap_or_default());

    if let Some(dir) = &option.dir {
        command.current_dir(dir);
    }
    if let Some(env) = &option.env {
        command.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
    }
    command
        .stdin(option.stdin.stdio()?)
        .stdout(option.stdout.stdio()?)
        .stderr(option.stderr.stdio()?);

    let mut child = command
        .spawn()
        .map_err(|source| ShellError::spawn(&name, source))?;
    // the builder holds duplicates of our stream handles
    drop(command);
    debug!("spawned {} (pid {})", name, child.id());

    match attach_pumps(&mut child, option) {
        Ok(pumps) => Ok(Running { name, child, pumps }),
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ShellError::Io(err))
        }
    }
}

fn attach_pumps(child: &mut Child, option: &ExecOption) -> io::Result<Vec<JoinHandle<()>>> {
    let mut pumps = Vec::new();

    if let (Input::Text(text), Some(mut stdin)) = (&option.stdin, child.stdin.take()) {
        let text = Arc::clone(text);
        pumps.push(pump("stdin", move || match stdin.write_all(&text) {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => warn!("stdin pump: {}", e),
            _ => {}
        })?);
    }
    if let (Output::Buffer(buffer), Some(stdout)) = (&option.stdout, child.stdout.take()) {
        pumps.push(fill("stdout", stdout, buffer.clone())?);
    }
    if let (Output::Buffer(buffer), Some(stderr)) = (&option.stderr, child.stderr.take()) {
        pumps.push(fill("stderr", stderr, buffer.clone())?);
    }

    Ok(pumps)
}

fn fill<R>(stream: &str, mut from: R, mut buffer: Buffer) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let label = stream.to_string();
    pump(stream, move || {
        if let Err(e) = io::copy(&mut from, &mut buffer) {
            warn!("{} pump: {}", label, e);
        }
    })
}

fn pump<F>(stream: &str, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("pump-{}", stream))
        .spawn(body)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn argv(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn captured() -> (ExecOption, Buffer) {
        let buffer = Buffer::new();
        let option = ExecOption {
            stdout: Output::Buffer(buffer.clone()),
            ..ExecOption::default()
        };
        (option, buffer)
    }

    #[test]
    fn test_exit_codes() {
        let (option, _) = captured();
        assert_eq!(spawn(&argv(&["true"]), &option).unwrap().wait().unwrap(), 0);
        assert_eq!(spawn(&argv(&["false"]), &option).unwrap().wait().unwrap(), 1);
        assert_eq!(
            spawn(&argv(&["sh", "-c", "kill -9 $$"]), &option)
                .unwrap()
                .wait()
                .unwrap(),
            137
        );
    }

    #[test]
    fn test_text_input_and_buffer_output() {
        let (mut option, buffer) = captured();
        option.stdin = Input::text("one\ntwo\n");
        let code = spawn(&argv(&["cat"]), &option).unwrap().wait().unwrap();
        assert_eq!(code, 0);
        assert_eq!(buffer.to_string_lossy(), "one\ntwo\n");
    }

    #[test]
    fn test_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let (mut option, buffer) = captured();
        option.dir = Some(dir.path().to_path_buf());
        option.env = Some(vec![("KOSH_MARK".to_string(), "x1".to_string())]);

        let script = "printf '%s %s' \"$KOSH_MARK\" \"$(pwd -P)\"";
        let code = spawn(&argv(&["/bin/sh", "-c", script]), &option)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(code, 0);
        let expected = format!("x1 {}", dir.path().canonicalize().unwrap().display());
        assert_eq!(buffer.to_string_lossy(), expected);
    }

    #[test]
    fn test_missing_program() {
        let (option, _) = captured();
        match spawn(&argv(&["kosh-no-such-program"]), &option) {
            Err(err) => {
                assert_eq!(err.exit_code(), 127);
                assert_eq!(err.to_string(), "kosh-no-such-program: command not found");
            }
            Ok(_) => panic!("expected spawn to fail"),
        }
    }
}
