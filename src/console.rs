//! Operator console: the blocking prompt surface.
//!
//! Every suspension point of the installer is either a question asked here or
//! an external command. Free text comes back trimmed; yes/no questions are
//! re-asked until one of the canonical answers is given.

use crate::error::{InstallerError, Result};
use std::io::{self, BufRead, Write};

/// Line-oriented interaction with the operator.
pub trait Console {
    /// Ask for a line of text. The answer is returned trimmed.
    fn ask_line(&mut self, question: &str) -> Result<String>;

    /// Ask a yes/no question until `y`, `yes`, `n` or `no` is given.
    fn ask_yes_no(&mut self, question: &str) -> Result<bool>;

    /// Print a message for the operator.
    fn say(&mut self, message: &str);

    /// Block until the operator presses Enter.
    fn pause(&mut self) -> Result<()>;

    /// Ask for a line, substituting `default` for an empty answer.
    fn ask_line_or(&mut self, question: &str, default: &str) -> Result<String> {
        let answer = self.ask_line(&format!("{} [{}]", question, default))?;
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer)
        }
    }

    /// Print a section banner.
    fn section(&mut self, title: &str) {
        let rule = "=".repeat(60);
        self.say(&format!("\n{}\n{}\n{}", rule, title, rule));
    }
}

/// Parse a yes/no answer. `None` means "ask again".
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Console over any reader/writer pair; `stdio()` for the real terminal.
pub struct TerminalConsole<R, W> {
    input: R,
    output: W,
}

impl TerminalConsole<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Consume the console and return the writer (tests inspect the transcript).
    pub fn into_output(self) -> W {
        self.output
    }

    fn prompt(&mut self, text: &str) -> Result<String> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(InstallerError::ConsoleClosed);
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> Console for TerminalConsole<R, W> {
    fn ask_line(&mut self, question: &str) -> Result<String> {
        self.prompt(&format!("{}: ", question))
    }

    fn ask_yes_no(&mut self, question: &str) -> Result<bool> {
        loop {
            let answer = self.prompt(&format!("{} [y/n]: ", question))?;
            match parse_yes_no(&answer) {
                Some(value) => return Ok(value),
                None => self.say("Please answer y or n."),
            }
        }
    }

    fn say(&mut self, message: &str) {
        if let Err(e) = writeln!(self.output, "{}", message) {
            tracing::warn!("failed to write to console: {}", e);
        }
    }

    fn pause(&mut self) -> Result<()> {
        self.prompt("Press Enter to continue...").map(|_| ())
    }
}
