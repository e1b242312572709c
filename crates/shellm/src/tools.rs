//! Context tools: stateless data sources whose text output supplements the
//! model's prompt.
//!
//! Every tool honors one contract: [`ContextTool::context`] is idempotent,
//! side-effect free, and never fails — an internal error is rendered as a
//! one-line diagnostic string that goes into the prompt like any other
//! context, so a broken tool can't abort command generation.

use std::fmt::Write as _;

use tracing::debug;

/// Tool names used in configuration and selection responses.
pub const DIR_LISTER: &str = "dir_lister";
pub const ENV_INSPECTOR: &str = "env_inspector";
pub const SYSTEM_INFO: &str = "system_info";

/// Tools chosen when selection fails or returns nothing usable.
pub const DEFAULT_SELECTION: &[&str] = &[DIR_LISTER, SYSTEM_INFO];

/// A stateless context source.
pub trait ContextTool: Send + Sync {
    fn name(&self) -> &'static str;
    /// One-line description shown to the model in the preflight prompt.
    fn description(&self) -> &'static str;
    /// Gather this tool's context. Must not fail; render errors inline.
    fn context(&self) -> String;
}

/// Instantiate the tools named in the enabled list, in order, skipping
/// unknown names.
pub fn build_tools(enabled: &[String]) -> Vec<Box<dyn ContextTool>> {
    enabled
        .iter()
        .filter_map(|name| -> Option<Box<dyn ContextTool>> {
            match name.as_str() {
                DIR_LISTER => Some(Box::new(DirLister)),
                ENV_INSPECTOR => Some(Box::new(EnvInspector)),
                SYSTEM_INFO => Some(Box::new(SystemInfo)),
                other => {
                    debug!("ignoring unknown tool {other:?} in configuration");
                    None
                }
            }
        })
        .collect()
}

/// Concatenate tool contexts into the prompt's system-context block, each
/// framed by a `--- name ---` header.
pub fn gather_context<'a>(tools: impl IntoIterator<Item = &'a dyn ContextTool>) -> String {
    let mut parts = Vec::new();
    for tool in tools {
        let context = tool.context();
        if !context.is_empty() {
            parts.push(format!("--- {} ---\n{context}", tool.name()));
        }
    }
    parts.join("\n\n")
}

// ── dir_lister ─────────────────────────────────────────────────────

/// Lists non-hidden entries in the current directory with basic metadata.
pub struct DirLister;

impl ContextTool for DirLister {
    fn name(&self) -> &'static str {
        DIR_LISTER
    }

    fn description(&self) -> &'static str {
        "Lists non-hidden files in the current directory with type, size, and modification time"
    }

    fn context(&self) -> String {
        match list_current_dir() {
            Ok(listing) => listing,
            Err(e) => format!("Error listing current directory: {e}"),
        }
    }
}

fn list_current_dir() -> std::io::Result<String> {
    let cwd = std::env::current_dir()?;
    let mut entries: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(&cwd)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        // Entries we can't stat are skipped rather than failing the listing.
        let Ok(meta) = entry.metadata() else { continue };
        let kind = if meta.is_dir() {
            "Directory"
        } else if is_executable(&meta) {
            "Executable"
        } else {
            "File"
        };
        let modified = meta
            .modified()
            .ok()
            .map(|t| {
                chrono::DateTime::<chrono::Local>::from(t)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "unknown".to_string());
        entries.push(format!(
            "- {name} ({kind}, {}, modified: {modified})",
            format_size(meta.len())
        ));
    }
    entries.sort();

    let mut out = format!("Current directory: {}\nFiles:\n", cwd.display());
    out.push_str(&entries.join("\n"));
    Ok(out)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 || *unit == "TB" {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    unreachable!("TB branch always returns")
}

// ── env_inspector ──────────────────────────────────────────────────

/// Environment variables with secret-looking names excluded.
pub struct EnvInspector;

/// Lowercased substrings marking an environment variable as sensitive.
const SENSITIVE_MARKERS: &[&str] = &["token", "secret", "password", "key", "credential", "auth"];

impl ContextTool for EnvInspector {
    fn name(&self) -> &'static str {
        ENV_INSPECTOR
    }

    fn description(&self) -> &'static str {
        "Shows environment variables, excluding ones that look like secrets or credentials"
    }

    fn context(&self) -> String {
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter(|(name, _)| {
                let lower = name.to_lowercase();
                !SENSITIVE_MARKERS.iter().any(|m| lower.contains(m))
            })
            .collect();
        vars.sort();

        let mut out = String::from("Environment variables:\n");
        for (name, value) in vars {
            let _ = writeln!(out, "{name}={value}");
        }
        out.trim_end().to_string()
    }
}

// ── system_info ────────────────────────────────────────────────────

/// Basic facts about the machine and user environment.
pub struct SystemInfo;

impl ContextTool for SystemInfo {
    fn name(&self) -> &'static str {
        SYSTEM_INFO
    }

    fn description(&self) -> &'static str {
        "Provides operating system, architecture, user, and shell information"
    }

    fn context(&self) -> String {
        let mut out = format!(
            "Operating system: {}\nArchitecture: {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        if let Ok(user) = std::env::var("USER") {
            let _ = write!(out, "\nUser: {user}");
        }
        if let Ok(shell) = std::env::var("SHELL") {
            let _ = write!(out, "\nLogin shell: {shell}");
        }
        if let Ok(cwd) = std::env::current_dir() {
            let _ = write!(out, "\nWorking directory: {}", cwd.display());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_tools_skips_unknown_names() {
        let enabled = vec![
            DIR_LISTER.to_string(),
            "flux_capacitor".to_string(),
            SYSTEM_INFO.to_string(),
        ];
        let tools = build_tools(&enabled);
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec![DIR_LISTER, SYSTEM_INFO]);
    }

    #[test]
    fn gather_context_frames_each_tool() {
        struct Fixed(&'static str, &'static str);
        impl ContextTool for Fixed {
            fn name(&self) -> &'static str {
                self.0
            }
            fn description(&self) -> &'static str {
                "fixed"
            }
            fn context(&self) -> String {
                self.1.to_string()
            }
        }
        let a = Fixed("alpha", "context a");
        let b = Fixed("beta", "");
        let c = Fixed("gamma", "context c");
        let tools: Vec<&dyn ContextTool> = vec![&a, &b, &c];
        let joined = gather_context(tools);
        assert!(joined.contains("--- alpha ---\ncontext a"));
        assert!(joined.contains("--- gamma ---\ncontext c"));
        // Empty contexts are dropped entirely, header included.
        assert!(!joined.contains("beta"));
    }

    #[test]
    fn dir_lister_reports_current_directory() {
        let context = DirLister.context();
        assert!(context.contains("Current directory:"));
    }

    #[test]
    fn env_inspector_redacts_secretish_names() {
        // Contract check on the filter itself rather than live process env.
        let lower = "MY_API_TOKEN".to_lowercase();
        assert!(SENSITIVE_MARKERS.iter().any(|m| lower.contains(m)));
        let lower = "HOME".to_lowercase();
        assert!(!SENSITIVE_MARKERS.iter().any(|m| lower.contains(m)));
    }

    #[test]
    fn system_info_names_os_and_arch() {
        let context = SystemInfo.context();
        assert!(context.contains(std::env::consts::OS));
        assert!(context.contains(std::env::consts::ARCH));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert!(format_size(5 * 1024 * 1024).ends_with("MB"));
    }
}
