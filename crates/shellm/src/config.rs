//! YAML configuration: shell, backends, enabled tools.
//!
//! Configuration is looked up at an explicit `--config` path, then
//! `~/.shellm/config.yml`, then `~/.config/shellm/config.yml`. Missing files
//! fall back to defaults; a file that exists but fails to parse is a fatal
//! [`Error::Config`]. Environment variables override file values last.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default enabled context tools.
pub const DEFAULT_ENABLED_TOOLS: &[&str] = &["dir_lister", "env_inspector", "system_info"];

/// One configured remote backend. Immutable after construction.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BackendConfig {
    pub name: String,
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    /// Whether the model emits reasoning tokens worth streaming in verbose mode.
    #[serde(default)]
    pub is_reasoning_model: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ENABLED_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Top-level configuration, consumed read-only after loading.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Shell the generated commands target (and execute under).
    pub shell: String,
    pub backends: Vec<BackendConfig>,
    pub default_backend: usize,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            backends: vec![BackendConfig {
                name: "openai".to_string(),
                url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                is_reasoning_model: false,
            }],
            default_backend: 0,
            tools: ToolsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, apply environment overrides, and report whether a
    /// config file was actually found.
    pub fn load(explicit_path: Option<&Path>) -> Result<(Self, bool)> {
        let mut config = Config::default();
        let file = Self::find_config_file(explicit_path);
        let found = file.is_some();

        if let Some(path) = file {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
            config = serde_yaml::from_str(&text)
                .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
            debug!("Loaded configuration from {}", path.display());
        }

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok((config, found))
    }

    fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit_path {
            return path.exists().then(|| path.to_path_buf());
        }
        let home = dirs::home_dir()?;
        let candidates = [
            home.join(".shellm").join("config.yml"),
            home.join(".config").join("shellm").join("config.yml"),
        ];
        candidates.into_iter().find(|p| p.exists())
    }

    /// Apply environment overrides via a caller-supplied lookup, so tests
    /// don't have to mutate the process environment.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(shell) = get("SHELLM_SHELL") {
            self.shell = shell;
        }
        if let Some(raw) = get("SHELLM_DEFAULT_BACKEND")
            && let Ok(index) = raw.parse::<usize>()
        {
            self.default_backend = index;
        }

        for (i, backend) in self.backends.iter_mut().enumerate() {
            if let Some(key) = get(&format!("SHELLM_BACKEND_{i}_API_KEY")) {
                backend.api_key = key;
            }
            if !backend.name.is_empty()
                && let Some(key) = get(&format!("{}_API_KEY", backend.name.to_uppercase()))
            {
                backend.api_key = key;
            }
            // `api_key: $OPENAI_API_KEY` style indirection.
            if let Some(var) = backend.api_key.strip_prefix('$') {
                backend.api_key = get(var).unwrap_or_default();
            }
        }
    }

    /// Resolve a backend record by index, falling back to the default and
    /// then to the first configured backend on an out-of-range index.
    pub fn backend(&self, index: Option<usize>) -> Result<&BackendConfig> {
        let resolved = index.unwrap_or(self.default_backend);
        self.backends
            .get(resolved)
            .or_else(|| self.backends.first())
            .ok_or_else(|| Error::Config("no backends configured".to_string()))
    }

    /// Resolved index used for backend-instance caching.
    pub fn backend_index(&self, index: Option<usize>) -> usize {
        let resolved = index.unwrap_or(self.default_backend);
        if resolved < self.backends.len() { resolved } else { 0 }
    }

    /// Write a commented default config to `~/.config/shellm/config.yml`.
    /// Refuses to overwrite an existing file.
    pub fn write_default() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| Error::Config("cannot locate home directory".into()))?;
        let dir = home.join(".config").join("shellm");
        let path = dir.join("config.yml");
        if path.exists() {
            return Err(Error::Config(format!(
                "config file already exists at {}",
                path.display()
            )));
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;

        let body = serde_yaml::to_string(&Config::default())
            .map_err(|e| Error::Config(format!("failed to serialize default config: {e}")))?;
        let text = format!(
            "# shellm configuration.\n\
             # api_key may be a literal key or an environment reference like $OPENAI_API_KEY.\n\
             {body}"
        );
        std::fs::write(&path, text)
            .map_err(|e| Error::Config(format!("failed to write {}: {e}", path.display())))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_one_backend_and_default_tools() {
        let config = Config::default();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.default_backend, 0);
        assert_eq!(config.shell, "bash");
        assert_eq!(config.tools.enabled, DEFAULT_ENABLED_TOOLS);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("shell: zsh\n").unwrap();
        assert_eq!(config.shell, "zsh");
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.tools.enabled, DEFAULT_ENABLED_TOOLS);
    }

    #[test]
    fn yaml_backend_list_overrides_default() {
        let yaml = "\
backends:
  - name: local
    url: http://localhost:8080/v1
    model: llama3
    is_reasoning_model: true
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].name, "local");
        assert!(config.backends[0].is_reasoning_model);
        assert!(config.backends[0].api_key.is_empty());
    }

    #[test]
    fn env_overrides_shell_and_default_backend() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "SHELLM_SHELL" => Some("fish".to_string()),
            "SHELLM_DEFAULT_BACKEND" => Some("3".to_string()),
            _ => None,
        });
        assert_eq!(config.shell, "fish");
        assert_eq!(config.default_backend, 3);
    }

    #[test]
    fn env_overrides_api_key_by_index_and_name() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "SHELLM_BACKEND_0_API_KEY" => Some("by-index".to_string()),
            _ => None,
        });
        assert_eq!(config.backends[0].api_key, "by-index");

        // Named override wins over indexed (applied after it).
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "SHELLM_BACKEND_0_API_KEY" => Some("by-index".to_string()),
            "OPENAI_API_KEY" => Some("by-name".to_string()),
            _ => None,
        });
        assert_eq!(config.backends[0].api_key, "by-name");
    }

    #[test]
    fn dollar_reference_expands_or_empties() {
        let mut config = Config::default();
        config.backends[0].api_key = "$MY_KEY".to_string();
        config.apply_env_overrides(|name| (name == "MY_KEY").then(|| "secret".to_string()));
        assert_eq!(config.backends[0].api_key, "secret");

        let mut config = Config::default();
        config.backends[0].api_key = "$MISSING_KEY".to_string();
        config.apply_env_overrides(|_| None);
        assert_eq!(config.backends[0].api_key, "");
    }

    #[test]
    fn backend_lookup_falls_back_to_first_on_bad_index() {
        let config = Config::default();
        assert_eq!(config.backend(Some(42)).unwrap().name, "openai");
        assert_eq!(config.backend_index(Some(42)), 0);
        assert_eq!(config.backend_index(None), 0);
    }

    #[test]
    fn no_backends_is_a_config_error() {
        let config = Config {
            backends: vec![],
            ..Config::default()
        };
        assert!(matches!(config.backend(None), Err(Error::Config(_))));
    }
}
