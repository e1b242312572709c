//! Tracing setup and structured request/response logging.
//!
//! `-v` raises the live log level; `--log-file` additionally appends one
//! pretty-printed JSON record per model exchange (generation, fix,
//! explanation, and preflight selection) for offline inspection. Log-file
//! write failures are reported once on stderr and never abort the session.

use std::io::Write as _;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::backend::BackendInfo;

/// Install the global tracing subscriber. Verbosity: 0 = warnings,
/// 1 = info, 2+ = debug. `RUST_LOG` overrides when set.
pub fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shellm={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Serialize)]
struct ExchangeRecord<'a> {
    timestamp: String,
    kind: &'a str,
    backend: &'a BackendInfo,
    prompt: &'a str,
    system_context: &'a str,
    response: &'a str,
}

/// Append-only JSON log of model exchanges.
pub struct ExchangeLog {
    path: PathBuf,
}

impl ExchangeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one exchange record. Failures are diagnostics, not errors.
    pub fn append(
        &self,
        kind: &str,
        backend: &BackendInfo,
        system_context: &str,
        prompt: &str,
        response: &str,
    ) {
        let record = ExchangeRecord {
            timestamp: chrono::Local::now().to_rfc3339(),
            kind,
            backend,
            prompt,
            system_context,
            response,
        };
        if let Err(e) = self.write_record(&record) {
            warn!("failed to write exchange log: {e}");
            eprintln!("Error writing to log file: {e}");
        }
    }

    fn write_record(&self, record: &ExchangeRecord<'_>) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let body = serde_json::to_string_pretty(record)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writeln!(file, "{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_info() -> BackendInfo {
        BackendInfo {
            name: "openai".into(),
            model: "gpt-4o-mini".into(),
            url: "https://api.openai.com/v1".into(),
        }
    }

    #[test]
    fn appends_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchanges.log");
        let log = ExchangeLog::new(&path);
        log.append("generate", &backend_info(), "system", "list files", "ls -la");
        log.append("fix", &backend_info(), "system", "fix it", "ls -l");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"kind\": \"generate\""));
        assert!(text.contains("\"kind\": \"fix\""));
        assert!(text.contains("ls -la"));
        assert!(text.contains("\"model\": \"gpt-4o-mini\""));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("exchanges.log");
        let log = ExchangeLog::new(&path);
        log.append("preflight", &backend_info(), "sys", "prompt", "{}");
        assert!(path.exists());
    }
}
