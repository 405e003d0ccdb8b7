use std::borrow::Cow;
use std::env;
use std::path::{Component, Path, PathBuf};

use log::error;

pub fn basename(path: &str) -> Cow<'_, str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return path.into();
    }
    match trimmed.rsplit('/').next() {
        Some(p) => p.into(),
        None => trimmed.into(),
    }
}

pub fn current_dir() -> String {
    match env::current_dir() {
        Ok(dir) => dir.to_string_lossy().into_owned(),
        Err(e) => {
            error!("kosh: PROMPT: env current_dir error: {}", e);
            String::new()
        }
    }
}

/// Directory part of the prompt: `~` at home, the basename elsewhere.
pub fn prompt_dir(dir: &str, home: Option<&str>) -> String {
    match home {
        Some(home) if !home.is_empty() && Path::new(dir) == Path::new(home) => "~".to_string(),
        _ => basename(dir).into_owned(),
    }
}

/// Lexically normalizes `path`: drops `.`, folds `..` into its parent and
/// never climbs above the root.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}
