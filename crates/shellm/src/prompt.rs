//! System and user prompt assembly.
//!
//! All templates are parameterised on the configured shell and on the
//! gathered tool context. The generation template additionally carries the
//! declined-command section: every command the user has rejected this
//! session is listed verbatim so the model is never asked to repeat one.

use std::path::Path;

use crate::error::{Error, Result};

const BASE_SYSTEM_PROMPT: &str = "\
You are an AI assistant that generates shell commands based on user requests.
Your task is to generate a single shell command or a short oneliner script \
that accomplishes the user's request.
Only generate commands for the `{shell}` shell.
Do not include explanations or descriptions.
Ensure the commands are safe and do not cause data loss or security issues.
Use the following system context to inform your command generation:

{system_context}

{declined_commands}

Generate only the command, nothing else.";

const FIXING_SYSTEM_PROMPT: &str = "\
You are an AI assistant that fixes failed shell commands.
Your task is to analyze a failed command and generate a fixed version that \
will work correctly.
Only generate commands for the `{shell}` shell.
Do not include explanations or descriptions.
Ensure the commands are safe and do not cause data loss or security issues.
Use the following system context to inform your command generation:

{system_context}

Generate only the fixed command, nothing else. If the original command is \
completely wrong or cannot be fixed, generate a new command that \
accomplishes the original intent.";

const EXPLANATION_SYSTEM_PROMPT: &str = "\
You are an AI assistant that explains shell commands for `{shell}` in plain text.
When the user provides a command, follow these steps:
1. PURPOSE: Briefly summarize its goal.
2. WORKFLOW: Explain how it works step-by-step, including pipes, \
redirections, and logic.
3. BREAKDOWN: List each flag, argument, and operator with its role.
4. RISKS: Highlight dangers (e.g., data loss, permissions). If none, state \
\"No significant risks.\"
5. IMPROVEMENTS: Suggest safer or more efficient alternatives if relevant.

Use the system context below to tailor the explanation:
{system_context}

Formatting rules:
- DO NOT USE Markdown.
- Use uppercase headings like \"PURPOSE:\", \"RISKS:\".
- Separate sections with two newlines.
- Avoid technical jargon if possible.";

/// Builds the prompts used across the lifecycle.
#[derive(Clone, Debug)]
pub struct PromptBuilder {
    shell: String,
}

impl PromptBuilder {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// System prompt for command generation. `declined` commands are listed
    /// verbatim with an instruction never to produce them again.
    pub fn system_prompt(&self, system_context: &str, declined: &[String]) -> String {
        let declined_section = if declined.is_empty() {
            String::new()
        } else {
            format!("Do not generate these commands:\n{}", declined.join("\n"))
        };
        BASE_SYSTEM_PROMPT
            .replace("{shell}", &self.shell)
            .replace("{system_context}", system_context)
            .replace("{declined_commands}", &declined_section)
    }

    /// System prompt for the fix loop.
    pub fn fixing_system_prompt(&self, system_context: &str) -> String {
        FIXING_SYSTEM_PROMPT
            .replace("{shell}", &self.shell)
            .replace("{system_context}", system_context)
    }

    /// User prompt for the fix loop, embedding exactly what failed and how.
    pub fn fixing_user_prompt(
        &self,
        request: &str,
        failed_command: &str,
        exit_code: i32,
        output: &str,
    ) -> String {
        format!(
            "I need to fix a failed command.\n\n\
             Original request (purpose of the command): {request}\n\n\
             The failed command: {failed_command}\n\n\
             Exit code: {exit_code}\n\n\
             Command output:\n{output}\n\n\
             Please provide a fixed version of this command or a completely \
             different command that accomplishes the original request."
        )
    }

    /// System prompt for explaining a candidate command.
    pub fn explanation_system_prompt(&self, system_context: &str) -> String {
        EXPLANATION_SYSTEM_PROMPT
            .replace("{shell}", &self.shell)
            .replace("{system_context}", system_context)
    }
}

/// Read a prompt from a file, trimmed.
pub fn load_prompt_from_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::Config(format!("failed to read prompt file {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_the_shell_and_context() {
        let builder = PromptBuilder::new("zsh");
        let prompt = builder.system_prompt("--- system_info ---\nOS: linux", &[]);
        assert!(prompt.contains("`zsh`"));
        assert!(prompt.contains("OS: linux"));
        assert!(!prompt.contains("{shell}"));
        assert!(!prompt.contains("{system_context}"));
        assert!(!prompt.contains("{declined_commands}"));
        assert!(!prompt.contains("Do not generate these commands"));
    }

    #[test]
    fn declined_commands_listed_verbatim() {
        let builder = PromptBuilder::new("bash");
        let declined = vec!["ls -la".to_string(), "find . -name '*.rs'".to_string()];
        let prompt = builder.system_prompt("", &declined);
        assert!(prompt.contains("Do not generate these commands:"));
        assert!(prompt.contains("ls -la"));
        assert!(prompt.contains("find . -name '*.rs'"));
    }

    #[test]
    fn fixing_user_prompt_embeds_failure_details() {
        let builder = PromptBuilder::new("bash");
        let prompt = builder.fixing_user_prompt(
            "count lines in all files",
            "wc -l *.txt",
            1,
            "wc: *.txt: No such file or directory",
        );
        assert!(prompt.contains("count lines in all files"));
        assert!(prompt.contains("The failed command: wc -l *.txt"));
        assert!(prompt.contains("Exit code: 1"));
        assert!(prompt.contains("No such file or directory"));
    }

    #[test]
    fn explanation_prompt_forbids_markdown() {
        let builder = PromptBuilder::new("fish");
        let prompt = builder.explanation_system_prompt("ctx");
        assert!(prompt.contains("`fish`"));
        assert!(prompt.contains("DO NOT USE Markdown"));
    }

    #[test]
    fn missing_prompt_file_is_a_config_error() {
        let result = load_prompt_from_file(Path::new("/nonexistent/prompt.txt"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn prompt_file_contents_are_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "  list all rust files \n").unwrap();
        assert_eq!(
            load_prompt_from_file(&path).unwrap(),
            "list all rust files"
        );
    }
}
