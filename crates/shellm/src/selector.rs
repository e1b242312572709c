//! Preflight tool selection: ask the model which context tools are worth
//! running for a prompt, and survive whatever it answers.
//!
//! The model is instructed to reply with a flat JSON object of tool-name →
//! boolean, but real models return fenced JSON, single-quoted pseudo-JSON,
//! missing commas, bare tool names, or prose. [`parse_selection`] is the
//! single authoritative fallback pipeline:
//!
//! 1. a single quoted tool name is a singleton selection;
//! 2. strict JSON parse of the first `{...}` span;
//! 3. one bounded repair pass (quote style, missing commas), then retry;
//! 4. regex scan for `"<tool>": true` shapes per known tool;
//! 5. `true` and `"yes"`/`"true"`/`"1"` (any case) count as affirmative;
//! 6. anything still unusable falls back to the default tool set.
//!
//! Selection failure never aborts generation: the worst case is "some
//! reasonable default context", never "no context" or a crashed session.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::Message;
use crate::backend::{ChatBackend, RequestOptions, send_interruptible};
use crate::error::{Error, Result};
use crate::logging::ExchangeLog;
use crate::tools::{ContextTool, DEFAULT_SELECTION};
use crate::ui::Spinner;

/// Static facts about one selectable tool.
#[derive(Clone, Debug)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// Descriptors for a set of instantiated tools.
pub fn describe_tools(tools: &[Box<dyn ContextTool>]) -> Vec<ToolDescriptor> {
    tools
        .iter()
        .map(|t| ToolDescriptor {
            name: t.name().to_string(),
            description: t.description().to_string(),
        })
        .collect()
}

const PREFLIGHT_SYSTEM_PROMPT: &str = "\
You are an AI assistant that selects which context-gathering tools should \
supplement a user's prompt to a shell-command generator.
Analyze the user's prompt and decide which of the available tools would help \
generate an accurate command.

The available tools are:
{available_tools}

For each tool, answer \"yes\" or \"no\".
Format your response as a flat JSON object with tool names as keys and \
boolean values, for example: {\"dir_lister\": true, \"system_info\": false}

Only select tools that are truly necessary for this specific prompt.";

/// Decides which enabled context tools are relevant to one prompt.
pub struct ToolSelector<'a> {
    backend: &'a dyn ChatBackend,
}

impl<'a> ToolSelector<'a> {
    pub fn new(backend: &'a dyn ChatBackend) -> Self {
        Self { backend }
    }

    /// The meta-prompt enumerating each tool's name and description.
    pub fn preflight_prompt(enabled: &[ToolDescriptor]) -> String {
        let listing: Vec<String> = enabled
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        PREFLIGHT_SYSTEM_PROMPT.replace("{available_tools}", &listing.join("\n"))
    }

    /// Select tools for `prompt`. Infallible except for a user interrupt:
    /// backend and parse failures degrade to the default selection.
    pub async fn select(
        &self,
        prompt: &str,
        enabled: &[ToolDescriptor],
        verbose: bool,
        log: Option<&ExchangeLog>,
    ) -> Result<Vec<String>> {
        if enabled.is_empty() {
            return Ok(Vec::new());
        }
        let known: Vec<String> = enabled.iter().map(|t| t.name.clone()).collect();
        let system = Self::preflight_prompt(enabled);
        let messages = [Message::system(&system), Message::user(prompt)];
        let opts = RequestOptions::default();

        let spinner = (!verbose).then(|| Spinner::start("Selecting tools"));
        let outcome = send_interruptible(self.backend, &messages, &opts).await;
        if let Some(s) = spinner {
            s.stop();
        }

        let selected = match outcome {
            Ok(response) => {
                if let Some(log) = log {
                    log.append("preflight", &self.backend.info(), &system, prompt, &response);
                }
                match parse_selection(&response, &known) {
                    Ok(selection) if !selection.is_empty() => selection,
                    Ok(_) => {
                        debug!("tool selection empty, using defaults");
                        fallback_selection(&known)
                    }
                    Err(e) => {
                        warn!("tool selection unparseable ({e}), using defaults");
                        fallback_selection(&known)
                    }
                }
            }
            Err(Error::Interrupted) => return Err(Error::Interrupted),
            Err(e) => {
                warn!("tool selection backend call failed ({e}), using defaults");
                fallback_selection(&known)
            }
        };

        if selected.is_empty() {
            eprintln!("No tools selected");
        } else {
            eprintln!("Selected tools: {}", selected.join(", "));
        }
        Ok(selected)
    }
}

/// The default set intersected with what is enabled; if that intersection is
/// empty, one arbitrary enabled tool rather than none.
pub fn fallback_selection(enabled: &[String]) -> Vec<String> {
    let defaults: Vec<String> = DEFAULT_SELECTION
        .iter()
        .filter(|d| enabled.iter().any(|e| e == *d))
        .map(|d| d.to_string())
        .collect();
    if !defaults.is_empty() {
        return defaults;
    }
    enabled.first().map(|t| vec![t.clone()]).unwrap_or_default()
}

/// Parse a tool-selection response into the subset of `known` tool names the
/// model affirmed. `Ok(empty)` means the model affirmed nothing; `Err` means
/// the response had no recognizable selection at all.
pub fn parse_selection(response: &str, known: &[String]) -> Result<Vec<String>> {
    let trimmed = response.trim();

    // A bare quoted tool name is a singleton selection.
    if let Some(name) = quoted_singleton(trimmed)
        && let Some(matched) = known.iter().find(|k| k.as_str() == name)
    {
        return Ok(vec![matched.clone()]);
    }

    if let Some(span) = brace_span(trimmed) {
        if let Some(selection) = strict_parse(span, known) {
            return Ok(selection);
        }
        let repaired = repair_json(span);
        if let Some(selection) = strict_parse(&repaired, known) {
            debug!("tool selection parsed after syntax repair");
            return Ok(selection);
        }
    }

    let scanned = regex_scan(trimmed, known);
    if !scanned.is_empty() {
        return Ok(scanned);
    }

    Err(Error::Parse(format!(
        "no tool selection found in {} bytes of response",
        response.len()
    )))
}

fn quoted_singleton(text: &str) -> Option<&str> {
    let inner = text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| text.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))?;
    let well_formed =
        !inner.is_empty() && inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    well_formed.then_some(inner)
}

/// Greedy brace match: first `{` through last `}`.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end { text.get(start..=end) } else { None }
}

fn strict_parse(span: &str, known: &[String]) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(span).ok()?;
    let object = value.as_object()?;
    Some(
        known
            .iter()
            .filter(|name| object.get(name.as_str()).is_some_and(is_affirmative))
            .cloned()
            .collect(),
    )
}

/// A bounded set of syntax repairs for almost-JSON: single quotes become
/// double quotes, and missing commas are inserted after boolean literals and
/// between adjacent quoted strings on separate lines.
fn repair_json(span: &str) -> String {
    static COMMA_AFTER_BOOL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"\b(true|false)(\s+")"#).expect("static regex")
    });
    static COMMA_BETWEEN_QUOTES: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""(\s*\n\s*)""#).expect("static regex")
    });

    let repaired = span.replace('\'', "\"");
    let repaired = COMMA_AFTER_BOOL.replace_all(&repaired, "$1,$2");
    COMMA_BETWEEN_QUOTES
        .replace_all(&repaired, "\",$1\"")
        .into_owned()
}

/// Last resort: scan for `"<tool>": true`-shaped substrings per known tool.
fn regex_scan(text: &str, known: &[String]) -> Vec<String> {
    known
        .iter()
        .filter(|name| {
            let pattern = format!(
                r#""{}"\s*:\s*(true|"yes"|"true"|"1")"#,
                regex::escape(name)
            );
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .is_ok_and(|re| re.is_match(text))
        })
        .cloned()
        .collect()
}

/// Boolean `true`, or the strings `yes`/`true`/`1` in any case.
fn is_affirmative(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => {
            matches!(s.to_lowercase().as_str(), "yes" | "true" | "1")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendInfo;
    use async_trait::async_trait;

    fn known() -> Vec<String> {
        vec![
            "dir_lister".to_string(),
            "env_inspector".to_string(),
            "system_info".to_string(),
        ]
    }

    #[test]
    fn strict_json_selection() {
        let response = r#"{"dir_lister": true, "env_inspector": false, "system_info": true}"#;
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister", "system_info"]);
    }

    #[test]
    fn json_embedded_in_prose_and_fences() {
        let response = "Sure! Here is my selection:\n```json\n{\"dir_lister\": true}\n```\nDone.";
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister"]);
    }

    #[test]
    fn single_quoted_tool_name_is_singleton() {
        assert_eq!(
            parse_selection("\"env_inspector\"", &known()).unwrap(),
            vec!["env_inspector"]
        );
        assert_eq!(
            parse_selection("'dir_lister'", &known()).unwrap(),
            vec!["dir_lister"]
        );
    }

    #[test]
    fn single_quotes_repaired() {
        let response = "{'dir_lister': true, 'system_info': false}";
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister"]);
    }

    #[test]
    fn missing_comma_after_boolean_repaired() {
        let response = "{\"dir_lister\": true \"system_info\": true}";
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister", "system_info"]);
    }

    #[test]
    fn yes_and_numeric_strings_are_affirmative() {
        let response =
            r#"{"dir_lister": "Yes", "env_inspector": "1", "system_info": "no"}"#;
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister", "env_inspector"]);
    }

    #[test]
    fn regex_scan_rescues_broken_json() {
        // Unclosed brace defeats both strict parsing and repair.
        let response = r#"selection: "dir_lister": true, "system_info": true"#;
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister", "system_info"]);
    }

    #[test]
    fn unknown_tools_filtered_out() {
        let response = r#"{"dir_lister": true, "time_machine": true}"#;
        let selected = parse_selection(response, &known()).unwrap();
        assert_eq!(selected, vec!["dir_lister"]);
    }

    #[test]
    fn hopeless_garbage_is_a_parse_error() {
        assert!(parse_selection("I have no idea what you mean.", &known()).is_err());
        assert!(parse_selection("", &known()).is_err());
    }

    #[test]
    fn all_negative_is_ok_but_empty() {
        let response = r#"{"dir_lister": false, "system_info": false}"#;
        let selected = parse_selection(response, &known()).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn fallback_intersects_defaults_with_enabled() {
        let enabled = known();
        assert_eq!(
            fallback_selection(&enabled),
            vec!["dir_lister", "system_info"]
        );
    }

    #[test]
    fn fallback_without_default_overlap_picks_one_enabled() {
        let enabled = vec!["env_inspector".to_string()];
        assert_eq!(fallback_selection(&enabled), vec!["env_inspector"]);
        assert!(fallback_selection(&[]).is_empty());
    }

    #[test]
    fn preflight_prompt_lists_every_tool() {
        let descriptors = vec![
            ToolDescriptor {
                name: "dir_lister".into(),
                description: "lists files".into(),
            },
            ToolDescriptor {
                name: "system_info".into(),
                description: "system facts".into(),
            },
        ];
        let prompt = ToolSelector::preflight_prompt(&descriptors);
        assert!(prompt.contains("- dir_lister: lists files"));
        assert!(prompt.contains("- system_info: system facts"));
        assert!(!prompt.contains("{available_tools}"));
    }

    // ── select() end-to-end against scripted backends ──────────────

    struct FixedBackend(Result<&'static str>);

    #[async_trait]
    impl ChatBackend for FixedBackend {
        async fn send(&self, _messages: &[Message], _opts: &RequestOptions) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.to_string()),
                Err(_) => Err(Error::Backend("connection refused".to_string())),
            }
        }

        fn info(&self) -> BackendInfo {
            BackendInfo {
                name: "test".into(),
                model: "test-model".into(),
                url: "http://localhost".into(),
            }
        }
    }

    fn descriptors() -> Vec<ToolDescriptor> {
        known()
            .into_iter()
            .map(|name| ToolDescriptor {
                name,
                description: "test tool".into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_defaults() {
        let backend = FixedBackend(Err(Error::Backend("down".into())));
        let selector = ToolSelector::new(&backend);
        let selected = selector
            .select("list files", &descriptors(), true, None)
            .await
            .unwrap();
        assert_eq!(selected, vec!["dir_lister", "system_info"]);
    }

    #[tokio::test]
    async fn garbage_response_falls_back_to_defaults() {
        let backend = FixedBackend(Ok("no json here at all"));
        let selector = ToolSelector::new(&backend);
        let selected = selector
            .select("list files", &descriptors(), true, None)
            .await
            .unwrap();
        assert_eq!(selected, vec!["dir_lister", "system_info"]);
    }

    #[tokio::test]
    async fn valid_response_wins_over_defaults() {
        let backend = FixedBackend(Ok(r#"{"env_inspector": true}"#));
        let selector = ToolSelector::new(&backend);
        let selected = selector
            .select("show my environment", &descriptors(), true, None)
            .await
            .unwrap();
        assert_eq!(selected, vec!["env_inspector"]);
    }

    #[tokio::test]
    async fn no_enabled_tools_selects_nothing() {
        let backend = FixedBackend(Ok(r#"{"dir_lister": true}"#));
        let selector = ToolSelector::new(&backend);
        let selected = selector.select("anything", &[], true, None).await.unwrap();
        assert!(selected.is_empty());
    }
}
