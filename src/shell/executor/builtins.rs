use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{self, Path, PathBuf};
use std::process;

use log::debug;
use nix::unistd::{getuid, User};

use crate::shell::command::{ExecOption, ExitCode};
use crate::utils::path::clean_path;

const EXIT_USAGE: &str = "exit: exit [n]
    Exit the shell.

    Exits the shell with a status of N.  If N is omitted, the exit
    status is 0.
";

fn home_dir() -> Option<String> {
    match env::var("HOME") {
        Ok(home) if !home.is_empty() => Some(home),
        _ => User::from_uid(getuid())
            .ok()
            .flatten()
            .map(|user| user.dir.to_string_lossy().into_owned()),
    }
}

/// Expands `~`, `~/rest`, `~user` and `~user/rest`.
fn expand_home(dir: &str) -> io::Result<PathBuf> {
    let (head, rest) = match dir.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (dir, None),
    };

    if head == "~" {
        let home = home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
        let expanded = shellexpand::tilde_with_context(dir, || Some(home.clone()));
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    let name = &head[1..];
    let user = User::from_name(name)
        .map_err(io::Error::from)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such user: {}", name)))?;
    Ok(match rest {
        Some(rest) => user.dir.join(rest),
        None => user.dir,
    })
}

/// `-` and `-N` select the previous directory; only one entry is kept.
fn expand_last(dir: &str) -> Result<String, String> {
    if dir.len() > 1 {
        dir[1..]
            .parse::<usize>()
            .map_err(|e| format!("{}: {}", dir, e))?;
    }
    match env::var("OLDPWD") {
        Ok(old) if !old.is_empty() => Ok(old),
        _ => Ok(".".to_string()),
    }
}

fn absolute(dir: &Path) -> io::Result<PathBuf> {
    Ok(clean_path(&path::absolute(dir)?))
}

fn set_env(key: &str, value: &OsStr) -> io::Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: value contains a NUL byte", key),
        ));
    }
    env::set_var(key, value);
    Ok(())
}

/// `cd [-L|-P] [--] [dir]`
pub fn cd(option: &ExecOption, args: &[String]) -> ExitCode {
    let mut end = false;
    let mut dir: Option<&str> = None;
    let mut escape = true;
    let mut physical = false;

    for arg in args.iter().skip(1) {
        if !end {
            match arg.as_str() {
                "--" => {
                    end = true;
                    continue;
                }
                "-P" => {
                    physical = true;
                    continue;
                }
                "-L" => {
                    physical = false;
                    continue;
                }
                _ => {}
            }
        }
        if dir.is_some() {
            option.report("cd", "too many arguments");
            return 1;
        }
        dir = Some(arg.as_str());
        escape = !end;
    }

    let dir = match dir {
        Some(dir) if !dir.is_empty() => dir.to_string(),
        _ => "~".to_string(),
    };

    let dir = if dir.starts_with('-') && escape {
        match expand_last(&dir) {
            Ok(dir) => PathBuf::from(dir),
            Err(e) => {
                option.report("cd", e);
                return 2;
            }
        }
    } else if dir.starts_with('~') {
        match expand_home(&dir) {
            Ok(dir) => dir,
            Err(e) => {
                option.report("cd", format!("{}: {}", dir, e));
                return 3;
            }
        }
    } else {
        PathBuf::from(dir)
    };

    let dir = if physical {
        match fs::canonicalize(&dir) {
            Ok(dir) => dir,
            Err(e) => {
                option.report("cd", format!("{}: {}", dir.display(), e));
                return 4;
            }
        }
    } else {
        clean_path(&dir)
    };

    let old = match env::current_dir() {
        Ok(old) => old,
        Err(e) => {
            option.report("cd", e);
            return 5;
        }
    };

    let target = match (absolute(&old), absolute(&dir)) {
        (Ok(old), Ok(target)) if old == target => return 0,
        (Ok(_), Ok(target)) => target,
        (Err(e), _) | (_, Err(e)) => {
            option.report("cd", e);
            return 6;
        }
    };

    if let Err(e) = env::set_current_dir(&target) {
        option.report("cd", format!("{}: {}", dir.display(), e));
        return 7;
    }
    debug!("cd: {} -> {}", old.display(), target.display());

    if let Err(e) = set_env("OLDPWD", old.as_os_str()) {
        option.report("cd", e);
        return 8;
    }
    if let Err(e) = set_env("PWD", target.as_os_str()) {
        option.report("cd", e);
        return 9;
    }

    0
}

/// `exit [n]`
pub fn exit(option: &ExecOption, args: &[String]) -> ExitCode {
    let args = args.get(1..).unwrap_or_default();

    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        if let Ok(mut stdout) = option.stdout.writer() {
            let _ = stdout.write_all(EXIT_USAGE.as_bytes());
            let _ = stdout.flush();
        }
        return 0;
    }

    let code = match args.first() {
        Some(arg) => match arg.parse::<ExitCode>() {
            Ok(code) => code,
            Err(_) => {
                option.report("exit", format!("{}: numeric argument required", arg));
                return 2;
            }
        },
        None => 0,
    };
    if args.len() > 1 {
        option.report("exit", "too many arguments");
        return 1;
    }

    debug!("exit {}", code);
    for output in [&option.stdout, &option.stderr] {
        if let Ok(mut writer) = output.writer() {
            let _ = writer.flush();
        }
    }
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    process::exit(code)
}

/// Serializes tests that touch the process working directory.
#[cfg(test)]
pub(crate) static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::shell::command::{Buffer, Output};
    use std::sync::PoisonError;

    fn capture() -> (ExecOption, Buffer, Buffer) {
        let stdout = Buffer::new();
        let stderr = Buffer::new();
        let option = ExecOption {
            stdout: Output::Buffer(stdout.clone()),
            stderr: Output::Buffer(stderr.clone()),
            ..ExecOption::default()
        };
        (option, stdout, stderr)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Runs `body` with the cwd restored afterwards.
    fn in_cwd<F: FnOnce()>(body: F) {
        let _guard = CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let cwd = env::current_dir().unwrap();
        let saved: Vec<_> = ["OLDPWD", "PWD"]
            .into_iter()
            .map(|key| (key, env::var_os(key)))
            .collect();
        body();
        env::set_current_dir(cwd).unwrap();
        for (key, value) in saved {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }

    #[test]
    fn test_cd_and_back() {
        in_cwd(|| {
            let (option, _, stderr) = capture();
            let dir = tempfile::tempdir().unwrap();
            let start = env::current_dir().unwrap();
            let target = dir.path().to_string_lossy().into_owned();

            assert_eq!(cd(&option, &args(&["cd", &target])), 0);
            assert_eq!(
                fs::canonicalize(env::current_dir().unwrap()).unwrap(),
                fs::canonicalize(dir.path()).unwrap()
            );
            assert_eq!(env::var("OLDPWD").unwrap(), start.to_string_lossy());
            assert_eq!(env::var("PWD").unwrap(), target);

            assert_eq!(cd(&option, &args(&["cd", "-"])), 0);
            assert_eq!(env::current_dir().unwrap(), start);
            assert_eq!(stderr.to_string_lossy(), "");
        });
    }

    #[test]
    fn test_cd_dot_is_a_noop() {
        in_cwd(|| {
            let (option, _, _) = capture();
            env::set_var("OLDPWD", "/marker");
            let start = env::current_dir().unwrap();

            assert_eq!(cd(&option, &args(&["cd", "."])), 0);
            assert_eq!(env::current_dir().unwrap(), start);
            assert_eq!(env::var("OLDPWD").unwrap(), "/marker");
        });
    }

    #[test]
    fn test_cd_logical_parent() {
        in_cwd(|| {
            let (option, _, _) = capture();
            let dir = tempfile::tempdir().unwrap();
            let nested = dir.path().join("a");
            fs::create_dir(&nested).unwrap();

            let target = format!("{}/a/..", dir.path().display());
            assert_eq!(cd(&option, &args(&["cd", "-L", &target])), 0);
            assert_eq!(env::var("PWD").unwrap(), dir.path().to_string_lossy());
        });
    }

    #[test]
    fn test_cd_double_dash_takes_dash_literally() {
        in_cwd(|| {
            let (option, _, stderr) = capture();
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir(dir.path().join("-")).unwrap();
            env::set_current_dir(dir.path()).unwrap();

            assert_eq!(cd(&option, &args(&["cd", "--", "-"])), 0);
            assert_eq!(basename_of_cwd(), "-");
            assert_eq!(stderr.to_string_lossy(), "");
        });
    }

    fn basename_of_cwd() -> String {
        env::current_dir()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_cd_error_codes() {
        in_cwd(|| {
            let (option, _, stderr) = capture();
            assert_eq!(cd(&option, &args(&["cd", "a", "b"])), 1);
            assert!(stderr.to_string_lossy().starts_with("cd: too many arguments"));

            assert_eq!(cd(&option, &args(&["cd", "-x"])), 2);
            assert_eq!(cd(&option, &args(&["cd", "~no_such_user_for_kosh"])), 3);
            assert_eq!(cd(&option, &args(&["cd", "-P", "/no/such/kosh/dir"])), 4);
            assert_eq!(cd(&option, &args(&["cd", "/no/such/kosh/dir"])), 7);
        });
    }

    #[test]
    fn test_expand_home() {
        let home = home_dir().unwrap();
        assert_eq!(expand_home("~").unwrap(), PathBuf::from(&home));
        assert_eq!(expand_home("~/x").unwrap(), PathBuf::from(&home).join("x"));
        let root = User::from_name("root").unwrap().unwrap();
        assert_eq!(expand_home("~root/x").unwrap(), root.dir.join("x"));
    }

    #[test]
    fn test_exit_help_and_errors() {
        let (option, stdout, stderr) = capture();
        assert_eq!(exit(&option, &args(&["exit", "--help"])), 0);
        assert!(stdout.to_string_lossy().starts_with("exit: exit [n]"));

        assert_eq!(exit(&option, &args(&["exit", "abc"])), 2);
        assert_eq!(
            stderr.to_string_lossy(),
            "exit: abc: numeric argument required\n"
        );

        let (option, _, stderr) = capture();
        assert_eq!(exit(&option, &args(&["exit", "1", "2"])), 1);
        assert_eq!(stderr.to_string_lossy(), "exit: too many arguments\n");
    }
}
