use std::io::{self, BufRead, Write};

/// Operator input seam for the interactive discovery flows (instance
/// selection, manual executable path, application id).
///
/// The locator takes a `&mut dyn Prompter` so tests can script replies
/// instead of reading stdin.
pub trait Prompter {
    /// Show `message` and block for a single line of input.
    fn prompt(&mut self, message: &str) -> io::Result<String>;
}

/// Stdin-backed prompter used by the real binary.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, message: &str) -> io::Result<String> {
        println!("{message}");
        print!(">> ");
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Scripted prompter for tests: pops replies in order and records every
/// prompt message it was shown.
#[cfg(test)]
pub struct ScriptedPrompter {
    pub replies: std::collections::VecDeque<String>,
    pub seen: Vec<String>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            seen: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn prompt(&mut self, message: &str) -> io::Result<String> {
        self.seen.push(message.to_string());
        self.replies.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted reply left")
        })
    }
}
