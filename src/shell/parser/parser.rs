use std::mem;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use super::ast::{Command, Link};
use super::lexer::{Lexer, Token, TokenKind, QUEUE_CAPACITY};
use crate::shell::error::{Result, ShellError};
use crate::shell::process::Process;

/// How often a blocked parser looks at its cancellation handle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Turns the token queue into one [`Command`] tree per statement.
pub struct Parser {
    tokens: Receiver<Token>,
    commands: SyncSender<Command>,
}

/// The statement under construction and its two cursors.
#[derive(Default)]
struct Statement {
    root: Command,
    /// Node receiving words, redirections and `&&`.
    current: Vec<Link>,
    /// Leftmost node of the active pipeline segment, where `||` hangs.
    front: Vec<Link>,
}

impl Statement {
    fn current(&mut self) -> &mut Command {
        self.root.node_mut(&self.current)
    }

    fn take(&mut self) -> Command {
        mem::take(self).root
    }

    fn apply(&mut self, token: Token) {
        match token.kind {
            TokenKind::Word => {
                let node = self.current();
                if node.path.is_empty() {
                    node.path = token.value;
                } else {
                    node.args.push(token.value);
                }
            }
            TokenKind::Pipe => {
                self.current().pipe = Some(Box::default());
                self.current.push(Link::Pipe);
                self.front = self.current.clone();
            }
            TokenKind::And => {
                self.current().and = Some(Box::default());
                self.current.push(Link::And);
            }
            TokenKind::Or => {
                self.root.node_mut(&self.front).or = Some(Box::default());
                self.front.push(Link::Or);
                self.current = self.front.clone();
            }
            TokenKind::Heredoc => self.current().heredoc = Some(token.value),
            TokenKind::Background => self.current().background = true,
            // handled by the parser loop
            TokenKind::RedirectIn
            | TokenKind::RedirectOut
            | TokenKind::RedirectAppend
            | TokenKind::Semicolon => {}
        }
    }
}

impl Parser {
    pub fn new(tokens: Receiver<Token>) -> (Self, Receiver<Command>) {
        let (commands, rx) = sync_channel(QUEUE_CAPACITY);
        (Self { tokens, commands }, rx)
    }

    /// Consumes tokens until the queue closes, the consumer hangs up or
    /// `cancel` is stopped. The statement queue closes when this returns.
    pub fn run(self, cancel: &Process) {
        let mut statement = Statement::default();
        let mut background = false;

        while let Some(token) = self.next(cancel) {
            if background {
                background = false;
                let heredoc = token.kind == TokenKind::Heredoc;
                if heredoc {
                    statement.current().heredoc = Some(token.value.clone());
                }
                if !self.emit(statement.take()) {
                    return;
                }
                if heredoc {
                    continue;
                }
            }

            match token.kind {
                TokenKind::RedirectIn | TokenKind::RedirectOut | TokenKind::RedirectAppend => {
                    let Some(target) = self.next(cancel) else {
                        warn!("dropping `{}` redirect without a target", token.value);
                        break;
                    };
                    let node = statement.current();
                    let slot = match token.kind {
                        TokenKind::RedirectIn => &mut node.input,
                        TokenKind::RedirectOut => &mut node.output,
                        _ => &mut node.append,
                    };
                    *slot = Some(target.value);
                }
                TokenKind::Semicolon => {
                    if !self.emit(statement.take()) {
                        return;
                    }
                }
                TokenKind::Background => {
                    background = true;
                    statement.apply(token);
                }
                _ => statement.apply(token),
            }
        }

        if cancel.running() {
            self.emit(statement.take());
        }
    }

    fn next(&self, cancel: &Process) -> Option<Token> {
        loop {
            if !cancel.running() {
                return None;
            }
            match self.tokens.recv_timeout(POLL_INTERVAL) {
                Ok(token) => return Some(token),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Sends a finished statement; returns false once nobody is listening.
    fn emit(&self, command: Command) -> bool {
        if command.is_empty() {
            return true;
        }
        debug!("parsed: {}", command);
        self.commands.send(command).is_ok()
    }
}

/// Parses a whole string into its statements.
pub fn parse(input: &str) -> Result<Vec<Command>> {
    let cancel = Process::new();
    let (lexer, tokens) = Lexer::new(input.as_bytes());
    let (parser, commands) = Parser::new(tokens);

    thread::scope(|scope| {
        let lexing = scope.spawn(|| lexer.run(&cancel));
        let parsing = scope.spawn(|| parser.run(&cancel));

        let statements: Vec<Command> = commands.iter().collect();

        if parsing.join().is_err() {
            return Err(ShellError::Panicked("parser".to_string()));
        }
        lexing
            .join()
            .unwrap_or_else(|_| Err(ShellError::Panicked("lexer".to_string())))?;
        Ok(statements)
    })
}
