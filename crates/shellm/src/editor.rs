//! External editor invocation for the edit-before-run flow.

use std::io::Write as _;

use tracing::{debug, warn};

/// Seam for opening a candidate command in an editor; scripted in tests.
pub trait Editor: Send + Sync {
    /// Open `text` for editing. `None` means the edit was cancelled, failed,
    /// or produced no effective change — the caller keeps the original.
    fn edit(&self, text: &str) -> Option<String>;
}

/// Opens `$VISUAL` (then `$EDITOR`, then `vi`) on a temporary file.
pub struct ExternalEditor;

impl Editor for ExternalEditor {
    fn edit(&self, text: &str) -> Option<String> {
        let mut file = tempfile::Builder::new()
            .prefix("shellm-")
            .suffix(".sh")
            .tempfile()
            .ok()?;
        file.write_all(text.as_bytes()).ok()?;
        file.flush().ok()?;

        let editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string());
        // The editor setting may carry arguments, e.g. "code --wait".
        let mut words = editor.split_whitespace();
        let program = words.next()?;
        debug!("opening editor {program}");

        let status = std::process::Command::new(program)
            .args(words)
            .arg(file.path())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!("editor exited with {status}");
                return None;
            }
            Err(e) => {
                warn!("failed to launch editor {program}: {e}");
                return None;
            }
        }

        let edited = std::fs::read_to_string(file.path()).ok()?;
        let edited = edited.trim();
        if edited.is_empty() || edited == text {
            None
        } else {
            Some(edited.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The interactive path needs a terminal; cover the edit contract with a
    // scripted editor instead, the same seam the lifecycle tests use.
    struct Scripted(Option<&'static str>);
    impl Editor for Scripted {
        fn edit(&self, _text: &str) -> Option<String> {
            self.0.map(|s| s.to_string())
        }
    }

    #[test]
    fn scripted_editor_contract() {
        assert_eq!(Scripted(Some("ls -l")).edit("ls"), Some("ls -l".into()));
        assert_eq!(Scripted(None).edit("ls"), None);
    }
}
