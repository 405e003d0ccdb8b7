use std::fmt;

/// One node of a statement tree.
///
/// `pipe`, `and` and `or` are owned child slots; a statement is a tree, never
/// a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub path: String,
    pub args: Vec<String>,
    pub pipe: Option<Box<Command>>,
    pub and: Option<Box<Command>>,
    pub or: Option<Box<Command>>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub append: Option<String>,
    pub heredoc: Option<String>,
    pub background: bool,
}

/// Child slot a parser cursor steps through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Pipe,
    And,
    Or,
}

impl Command {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.path.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// The child behind `link`, created empty if absent.
    pub fn child_mut(&mut self, link: Link) -> &mut Command {
        let slot = match link {
            Link::Pipe => &mut self.pipe,
            Link::And => &mut self.and,
            Link::Or => &mut self.or,
        };
        slot.get_or_insert_with(Box::default)
    }

    /// Follows `path` from this node.
    pub fn node_mut(&mut self, path: &[Link]) -> &mut Command {
        let mut node = self;
        for link in path {
            node = node.child_mut(*link);
        }
        node
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(input) = &self.input {
            write!(f, " < {}", input)?;
        }
        if self.heredoc.is_some() {
            write!(f, " <<")?;
        }
        if let Some(output) = &self.output {
            write!(f, " > {}", output)?;
        }
        if let Some(append) = &self.append {
            write!(f, " >> {}", append)?;
        }
        if let Some(pipe) = &self.pipe {
            write!(f, " | {}", pipe)?;
        }
        if self.background {
            write!(f, " &")?;
        }
        if let Some(and) = &self.and {
            write!(f, " && {}", and)?;
        }
        if let Some(or) = &self.or {
            write!(f, " || {}", or)?;
        }
        Ok(())
    }
}
