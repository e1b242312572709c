//! Terminal feedback: progress spinner and interruptible line input.

use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

use crate::error::{Error, Result};

/// Spinner shown while a request is outstanding. Holds no session state;
/// must be stopped before any further console writes.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Stop and erase the spinner line.
    pub fn stop(self) {
        self.bar.finish_and_clear();
    }
}

/// Synchronous line-based user input, interruptible by Ctrl+C.
#[async_trait]
pub trait Prompter: Send {
    /// Print `prompt` (no newline) and read one line. EOF reads as an empty
    /// line; Ctrl+C is [`Error::Interrupted`].
    async fn read_line(&mut self, prompt: &str) -> Result<String>;
}

/// Reads from the process's stdin.
pub struct ConsolePrompter {
    reader: BufReader<Stdin>,
}

impl ConsolePrompter {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
        }
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn read_line(&mut self, prompt: &str) -> Result<String> {
        use std::io::Write as _;
        print!("{prompt}");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        tokio::select! {
            read = self.reader.read_line(&mut line) => {
                read.map_err(|e| Error::Execution(format!("failed to read input: {e}")))?;
                Ok(line.trim_end_matches(['\n', '\r']).to_string())
            }
            _ = tokio::signal::ctrl_c() => Err(Error::Interrupted),
        }
    }
}
