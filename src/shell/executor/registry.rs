use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::builtins;
use crate::shell::command::{ExecOption, ExitCode, Invokable};
use crate::shell::shell::Shell;

/// Runs inside the shell process itself.
pub type Builtin = fn(&ExecOption, &[String]) -> ExitCode;

/// Builds a fresh command bound to the streams of one invocation.
pub type Factory = Arc<dyn Fn(ExecOption) -> Box<dyn Invokable> + Send + Sync>;

/// What a command name resolves to, before falling back to `$PATH`.
#[derive(Clone)]
pub enum Entry {
    Builtin(Builtin),
    Command(Factory),
}

/// Name tables consulted in a fixed order: builtins, then registered
/// commands. Anything else is an external program.
#[derive(Clone, Default)]
pub struct Registry {
    builtins: HashMap<String, Builtin>,
    commands: HashMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cd`, `exit` and a nested `kosh`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_builtin("cd", builtins::cd);
        registry.register_builtin("exit", builtins::exit);
        registry.register_command("kosh", |option| Box::new(Shell::new(option)));
        registry
    }

    pub fn register_builtin(&mut self, name: &str, builtin: Builtin) {
        self.builtins.insert(name.to_string(), builtin);
    }

    pub fn register_command<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(ExecOption) -> Box<dyn Invokable> + Send + Sync + 'static,
    {
        self.commands.insert(name.to_string(), Arc::new(factory));
    }

    pub fn resolve(&self, name: &str) -> Option<Entry> {
        if let Some(builtin) = self.builtins.get(name) {
            return Some(Entry::Builtin(*builtin));
        }
        self.commands
            .get(name)
            .map(|factory| Entry::Command(Arc::clone(factory)))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builtins: Vec<_> = self.builtins.keys().collect();
        let mut commands: Vec<_> = self.commands.keys().collect();
        builtins.sort();
        commands.sort();
        f.debug_struct("Registry")
            .field("builtins", &builtins)
            .field("commands", &commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero(_: &ExecOption, _: &[String]) -> ExitCode {
        0
    }

    #[test]
    fn test_defaults() {
        let registry = Registry::with_defaults();
        assert!(matches!(registry.resolve("cd"), Some(Entry::Builtin(_))));
        assert!(matches!(registry.resolve("exit"), Some(Entry::Builtin(_))));
        assert!(matches!(registry.resolve("kosh"), Some(Entry::Command(_))));
        assert!(registry.resolve("ls").is_none());
    }

    #[test]
    fn test_builtin_shadows_command() {
        let mut registry = Registry::new();
        registry.register_command("dup", |option| Box::new(Shell::new(option)));
        registry.register_builtin("dup", zero);
        assert!(matches!(registry.resolve("dup"), Some(Entry::Builtin(_))));
    }
}
