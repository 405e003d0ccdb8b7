use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::mem;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use log::debug;
use once_cell::sync::Lazy;

use crate::shell::error::{Result, ShellError};
use crate::shell::process::Process;

/// Capacity of the token and statement queues.
pub const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Word,
    Pipe,           // |
    Or,             // ||
    And,            // &&
    RedirectIn,     // <
    RedirectOut,    // >
    RedirectAppend, // >>
    Heredoc,        // <<
    Background,     // &
    Semicolon,      // ;
}

impl TokenKind {
    const OPERATORS: [TokenKind; 9] = [
        TokenKind::Pipe,
        TokenKind::Or,
        TokenKind::And,
        TokenKind::RedirectIn,
        TokenKind::RedirectOut,
        TokenKind::RedirectAppend,
        TokenKind::Heredoc,
        TokenKind::Background,
        TokenKind::Semicolon,
    ];

    pub fn symbol(self) -> Option<&'static str> {
        match self {
            TokenKind::Word => None,
            TokenKind::Pipe => Some("|"),
            TokenKind::Or => Some("||"),
            TokenKind::And => Some("&&"),
            TokenKind::RedirectIn => Some("<"),
            TokenKind::RedirectOut => Some(">"),
            TokenKind::RedirectAppend => Some(">>"),
            TokenKind::Heredoc => Some("<<"),
            TokenKind::Background => Some("&"),
            TokenKind::Semicolon => Some(";"),
        }
    }
}

static SYMBOLS: Lazy<HashMap<&'static [u8], TokenKind>> = Lazy::new(|| {
    TokenKind::OPERATORS
        .iter()
        .filter_map(|kind| kind.symbol().map(|symbol| (symbol.as_bytes(), *kind)))
        .collect()
});

static ESCAPES: Lazy<HashMap<u8, u8>> = Lazy::new(|| {
    HashMap::from([
        (b'n', b'\n'),
        (b't', b'\t'),
        (b'r', b'\r'),
        (b'v', 0x0b),
        (b'b', 0x08),
        (b'f', 0x0c),
        (b'\\', b'\\'),
        (b'\'', b'\''),
        (b'"', b'"'),
    ])
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn word(value: impl Into<String>) -> Self {
        Self::new(TokenKind::Word, value)
    }

    /// An operator token carrying its own symbol.
    pub fn operator(kind: TokenKind) -> Self {
        Self::new(kind, kind.symbol().unwrap_or_default())
    }
}

/// Why scanning ended early.
enum Halt {
    /// The consumer hung up or cancellation was requested.
    Closed,
    Failed(ShellError),
}

impl From<io::Error> for Halt {
    fn from(err: io::Error) -> Self {
        Halt::Failed(ShellError::Io(err))
    }
}

impl From<ShellError> for Halt {
    fn from(err: ShellError) -> Self {
        Halt::Failed(err)
    }
}

type Step<T = ()> = std::result::Result<T, Halt>;

/// `<<` seen, body not captured yet.
#[derive(Default)]
struct PendingHeredoc {
    delimiter: Option<String>,
    strip_tabs: bool,
    /// Index in the held tokens of the first `;` after `<<`; the body goes
    /// there.
    slot: Option<usize>,
}

#[derive(Default)]
struct Scan {
    word: Vec<u8>,
    quoted: bool,
    quotes: Vec<u8>,
    heredoc: Option<PendingHeredoc>,
}

impl Scan {
    fn awaiting_delimiter(&self) -> bool {
        matches!(&self.heredoc, Some(pending) if pending.delimiter.is_none())
    }

    /// Takes the pending word, `None` when nothing was started.
    fn take_word(&mut self) -> Option<String> {
        if self.word.is_empty() && !self.quoted {
            return None;
        }
        self.quoted = false;
        let word = mem::take(&mut self.word);
        Some(String::from_utf8_lossy(&word).into_owned())
    }
}

/// Streaming tokenizer: reads bytes, sends [`Token`]s down a bounded queue.
///
/// Tokens are released one statement line at a time, so a line that fails to
/// lex never reaches the parser.
pub struct Lexer<R> {
    reader: BufReader<R>,
    tokens: SyncSender<Token>,
    pending: Vec<Token>,
    position: usize,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R) -> (Self, Receiver<Token>) {
        let (tokens, rx) = sync_channel(QUEUE_CAPACITY);
        let lexer = Self {
            reader: BufReader::new(reader),
            tokens,
            pending: Vec::new(),
            position: 0,
        };
        (lexer, rx)
    }

    /// Scans until end of input, a syntax error or cancellation. The token
    /// queue closes when this returns.
    pub fn run(mut self, cancel: &Process) -> Result<()> {
        match self.scan(cancel) {
            Ok(()) | Err(Halt::Closed) => Ok(()),
            Err(Halt::Failed(err)) => {
                debug!(
                    "lexer stopped at byte {}, dropping {} tokens: {}",
                    self.position,
                    self.pending.len(),
                    err
                );
                Err(err)
            }
        }
    }

    fn scan(&mut self, cancel: &Process) -> Step {
        let mut scan = Scan::default();

        loop {
            if !cancel.running() {
                return Err(Halt::Closed);
            }
            let Some(c) = self.read_byte()? else {
                break;
            };

            if let Some(&top) = scan.quotes.last() {
                if c == top {
                    scan.quotes.pop();
                } else if c == b'\\' && top == b'"' {
                    let escaped = self.read_escaped()?;
                    scan.word.push(escaped);
                } else {
                    scan.word.push(c);
                }
                continue;
            }

            match c {
                b'\\' => {
                    let escaped = self.read_escaped()?;
                    scan.word.push(escaped);
                }
                b'\'' | b'"' | b'`' => {
                    scan.quotes.push(c);
                    scan.quoted = true;
                }
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.finish_word(&mut scan)?;
                    if c == b'\r' && self.peek_byte()? == Some(b'\n') {
                        self.read_byte()?;
                    }
                    if c == b'\r' || c == b'\n' {
                        if let Some(pending) = scan.heredoc.take() {
                            self.capture_heredoc(pending, cancel)?;
                        }
                        self.emit(Token::operator(TokenKind::Semicolon))?;
                    }
                }
                b'-' if scan.awaiting_delimiter() && scan.word.is_empty() && !scan.quoted => {
                    if let Some(pending) = scan.heredoc.as_mut() {
                        pending.strip_tabs = true;
                    }
                }
                _ => match self.match_operator(c)? {
                    Some(kind) => {
                        self.finish_word(&mut scan)?;
                        if kind == TokenKind::Heredoc {
                            scan.heredoc = Some(PendingHeredoc::default());
                        } else if let (TokenKind::Semicolon, Some(pending)) =
                            (kind, scan.heredoc.as_mut())
                        {
                            // Held until the body is read.
                            pending.slot.get_or_insert(self.pending.len());
                            self.pending.push(Token::operator(kind));
                        } else {
                            self.emit(Token::operator(kind))?;
                        }
                    }
                    None => scan.word.push(c),
                },
            }
        }

        if let Some(&quote) = scan.quotes.last() {
            return Err(ShellError::Syntax(format!(
                "unclosed quote '{}' at position {}",
                quote as char, self.position
            ))
            .into());
        }

        self.finish_word(&mut scan)?;

        if scan.heredoc.is_some() {
            return Err(ShellError::Syntax(
                "unexpected end of input after heredoc delimiter".to_string(),
            )
            .into());
        }

        self.flush()
    }

    fn emit(&mut self, token: Token) -> Step {
        let boundary = token.kind == TokenKind::Semicolon;
        self.pending.push(token);
        if boundary {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Step {
        for token in self.pending.drain(..) {
            self.tokens.send(token).map_err(|_| Halt::Closed)?;
        }
        Ok(())
    }

    /// Flushes the pending word, or keeps it as the heredoc delimiter.
    fn finish_word(&mut self, scan: &mut Scan) -> Step {
        let awaiting = scan.awaiting_delimiter();
        let Some(word) = scan.take_word() else {
            return Ok(());
        };
        match scan.heredoc.as_mut() {
            Some(pending) if awaiting => {
                pending.delimiter = Some(word);
                Ok(())
            }
            _ => self.emit(Token::word(word)),
        }
    }

    fn capture_heredoc(&mut self, pending: PendingHeredoc, cancel: &Process) -> Step {
        let Some(delimiter) = pending.delimiter else {
            return Err(ShellError::Syntax(format!(
                "heredoc delimiter is missing at position {}",
                self.position
            ))
            .into());
        };

        let body = self.read_heredoc(&delimiter, pending.strip_tabs, cancel)?;
        let token = Token::new(TokenKind::Heredoc, body);
        match pending.slot {
            Some(slot) => self.pending.insert(slot, token),
            None => self.pending.push(token),
        }
        Ok(())
    }

    /// Reads raw lines until one equals `delimiter`.
    fn read_heredoc(&mut self, delimiter: &str, strip_tabs: bool, cancel: &Process) -> Step<String> {
        let mut lines = Vec::new();

        loop {
            if !cancel.running() {
                return Err(Halt::Closed);
            }

            let mut raw = Vec::new();
            let read = self.reader.read_until(b'\n', &mut raw)?;
            self.position += read;

            let terminated = raw.last() == Some(&b'\n');
            if terminated {
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
            }

            let mut line = &raw[..];
            if strip_tabs {
                let tabs = line.iter().take_while(|b| **b == b'\t').count();
                line = &line[tabs..];
            }

            if read > 0 && line == delimiter.as_bytes() {
                return Ok(lines.join("\n"));
            }
            if !terminated {
                return Err(ShellError::Syntax(format!(
                    "unexpected end of input: heredoc is missing its `{}` delimiter",
                    delimiter
                ))
                .into());
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }
    }

    fn match_operator(&mut self, c: u8) -> Step<Option<TokenKind>> {
        if !b"|&<>;".contains(&c) {
            return Ok(None);
        }

        if let Some(next) = self.peek_byte()? {
            if let Some(kind) = SYMBOLS.get(&[c, next][..]) {
                self.reader.consume(1);
                self.position += 1;
                return Ok(Some(*kind));
            }
        }

        Ok(SYMBOLS.get(&[c][..]).copied())
    }

    fn read_escaped(&mut self) -> Step<u8> {
        match self.read_byte()? {
            Some(c) => Ok(ESCAPES.get(&c).copied().unwrap_or(c)),
            None => Err(ShellError::Syntax("unexpected end of input after \\".to_string()).into()),
        }
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.reader.consume(1);
            self.position += 1;
        }
        Ok(byte)
    }
}

/// Lexes a whole string, returning every token produced before the lexer
/// stopped together with its result.
pub fn tokenize(input: &str) -> (Vec<Token>, Result<()>) {
    let cancel = Process::new();
    let (lexer, tokens) = Lexer::new(input.as_bytes());

    thread::scope(|scope| {
        let lexing = scope.spawn(|| lexer.run(&cancel));
        let collected: Vec<Token> = tokens.iter().collect();
        let result = lexing
            .join()
            .unwrap_or_else(|_| Err(ShellError::Panicked("lexer".to_string())));
        (collected, result)
    })
}
