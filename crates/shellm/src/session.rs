//! The confirmation lifecycle: generate, confirm, execute, fix.
//!
//! [`Session`] drives one request (or, in follow-up mode, a sequence of
//! requests over a shared conversation) through an explicit state machine:
//!
//! ```text
//! Generate ──► Confirm ──y──► Execute ──ok──► Finished(0)
//!    ▲           │ │ │           │
//!    │ r         │ e x           └─fail──► ConfirmFix ──y──► Generate(fix)
//!    └───────────┘ │ └──► Explain ──► Confirm          └─n──► Finished(code)
//!                  └────► Edit ─────► Confirm
//! ```
//!
//! Every path out of the machine is an explicit exit code; the only error
//! that escapes `run` is [`Error::Interrupted`], which the binary maps to
//! exit 130.

use tracing::debug;

use crate::Message;
use crate::backend::{ChatBackend, RequestOptions, send_interruptible};
use crate::chat::{ChatSession, DEFAULT_CONTEXT_TOKENS};
use crate::editor::Editor;
use crate::error::{Error, Result};
use crate::executor::{CommandRunner, ExecutionResult};
use crate::logging::ExchangeLog;
use crate::prompt::PromptBuilder;
use crate::selector::{ToolSelector, describe_tools};
use crate::tools::{ContextTool, gather_context};
use crate::ui::{Prompter, Spinner};

const SEPARATOR: &str = "----------------------------------------";

/// What failed, for the fix-generation prompt.
struct FixContext {
    command: String,
    exit_code: i32,
    output: String,
}

enum State {
    Generate {
        fix: Option<FixContext>,
        /// A regeneration after a decline; in follow-up mode the decline is
        /// already the newest conversation turn, so the request is not
        /// re-appended.
        regenerated: bool,
    },
    Confirm(String),
    Edit(String),
    Explain(String),
    Execute(String),
    ConfirmFix {
        command: String,
        result: ExecutionResult,
    },
    Finished(i32),
}

/// One interactive assistant session over injected seams. Production wiring
/// uses the real backend, shell runner, stdin prompter, and `$EDITOR`; tests
/// substitute scripted implementations.
pub struct Session<'a> {
    backend: &'a dyn ChatBackend,
    runner: &'a dyn CommandRunner,
    prompter: &'a mut dyn Prompter,
    editor: &'a dyn Editor,
    prompts: PromptBuilder,
    tools: Vec<Box<dyn ContextTool>>,
    log: Option<&'a ExchangeLog>,
    verbose: bool,
    follow_up: bool,
    /// Commands the user declined for the current request, newest last.
    declined: Vec<String>,
    /// Tool context gathered once per request.
    context: Option<String>,
    /// Conversation history, follow-up mode only.
    chat: Option<ChatSession>,
}

impl<'a> Session<'a> {
    pub fn new(
        backend: &'a dyn ChatBackend,
        runner: &'a dyn CommandRunner,
        prompter: &'a mut dyn Prompter,
        editor: &'a dyn Editor,
        prompts: PromptBuilder,
        tools: Vec<Box<dyn ContextTool>>,
    ) -> Self {
        Self {
            backend,
            runner,
            prompter,
            editor,
            prompts,
            tools,
            log: None,
            verbose: false,
            follow_up: false,
            declined: Vec::new(),
            context: None,
            chat: None,
        }
    }

    pub fn with_log(mut self, log: Option<&'a ExchangeLog>) -> Self {
        self.log = log;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn follow_up(mut self, follow_up: bool) -> Self {
        self.follow_up = follow_up;
        self
    }

    /// Run the session to completion and return the process exit code.
    /// `request` may be absent only in follow-up mode, where the first
    /// request is read interactively.
    pub async fn run(&mut self, request: Option<&str>) -> Result<i32> {
        let mut code = 0;
        if let Some(request) = request {
            code = self.run_request(request).await?;
        }
        if !self.follow_up {
            return Ok(code);
        }
        loop {
            let next = self.prompter.read_line("\nshellm> ").await?;
            let next = next.trim();
            if next.is_empty() || next == "exit" || next == "quit" {
                return Ok(code);
            }
            code = self.run_request(next).await?;
        }
    }

    /// Drive one request through the state machine.
    async fn run_request(&mut self, request: &str) -> Result<i32> {
        self.declined.clear();
        self.context = None;
        let mut state = State::Generate {
            fix: None,
            regenerated: false,
        };
        loop {
            state = match state {
                State::Generate { fix, regenerated } => {
                    self.generate(request, fix, regenerated).await?
                }
                State::Confirm(command) => self.confirm(command).await?,
                State::Edit(command) => self.edit(command),
                State::Explain(command) => self.explain(command).await?,
                State::Execute(command) => self.execute(command).await?,
                State::ConfirmFix { command, result } => {
                    self.confirm_fix(command, result).await?
                }
                State::Finished(code) => return Ok(code),
            };
        }
    }

    // ── States ─────────────────────────────────────────────────────

    async fn generate(
        &mut self,
        request: &str,
        fix: Option<FixContext>,
        regenerated: bool,
    ) -> Result<State> {
        let context = self.request_context(request).await?;
        // A chat that already exists means this is a later follow-up turn:
        // its pinned system message carries the first turn's context, so
        // refreshed context rides the user turn instead.
        let continuing = self.chat.is_some();

        let (kind, system, user) = match &fix {
            Some(f) => (
                "fix",
                self.prompts.fixing_system_prompt(&context),
                self.prompts
                    .fixing_user_prompt(request, &f.command, f.exit_code, &f.output),
            ),
            None => {
                let user = if continuing && !context.is_empty() {
                    format!("Current system context:\n{context}\n\n{request}")
                } else {
                    request.to_string()
                };
                (
                    "generate",
                    self.prompts.system_prompt(&context, &self.declined),
                    user,
                )
            }
        };

        if self.follow_up && self.chat.is_none() {
            let budget = self
                .backend
                .context_window()
                .await
                .unwrap_or(DEFAULT_CONTEXT_TOKENS);
            // Declined commands travel as conversation turns, so the chat's
            // system prompt carries none.
            self.chat = Some(ChatSession::new(
                &self.prompts.system_prompt(&context, &[]),
                budget,
            ));
        }

        let opts = RequestOptions::command(self.declined.len(), self.verbose);
        let label = if fix.is_some() { "Fixing" } else { "Thinking" };
        let spinner = (!self.verbose).then(|| Spinner::start(label));

        let outcome = match (&fix, self.chat.as_mut()) {
            // Normal generation in follow-up mode rides the conversation.
            (None, Some(chat)) => {
                if !regenerated {
                    chat.add_user_message(&user);
                }
                send_interruptible(self.backend, chat.messages(), &opts).await
            }
            // One-shot generations and all fix generations are standalone
            // exchanges; the fix prompt embeds everything it needs.
            _ => {
                let messages = [Message::system(&system), Message::user(&user)];
                send_interruptible(self.backend, &messages, &opts).await
            }
        };
        if let Some(s) = spinner {
            s.stop();
        }

        match outcome {
            Ok(command) => {
                debug!("generated command: {command}");
                if let Some(log) = self.log {
                    // Conversation turns go out under the chat's pinned
                    // system message, not the freshly built one.
                    let sent_system = match (&fix, &self.chat) {
                        (None, Some(chat)) => chat.messages()[0].content.as_str(),
                        _ => system.as_str(),
                    };
                    log.append(kind, &self.backend.info(), sent_system, &user, &command);
                }
                if fix.is_none()
                    && let Some(chat) = self.chat.as_mut()
                {
                    chat.add_assistant_message(&command);
                }
                Ok(State::Confirm(command))
            }
            Err(Error::Interrupted) => Err(Error::Interrupted),
            Err(e) => {
                eprintln!("Error: {e}");
                Ok(State::Finished(1))
            }
        }
    }

    async fn confirm(&mut self, command: String) -> Result<State> {
        println!("Suggested: {command}");
        let answer = self
            .prompter
            .read_line("[Confirm] Run this command? (y/N/e/r/x) ")
            .await?;
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Ok(State::Execute(command)),
            "r" | "regenerate" => {
                println!("Regenerating command...");
                if let Some(chat) = self.chat.as_mut() {
                    chat.add_declined_command(&command);
                }
                self.declined.push(command);
                Ok(State::Generate {
                    fix: None,
                    regenerated: true,
                })
            }
            "e" | "edit" => Ok(State::Edit(command)),
            "x" | "explain" => Ok(State::Explain(command)),
            _ => {
                println!("Command execution cancelled");
                Ok(State::Finished(0))
            }
        }
    }

    fn edit(&mut self, command: String) -> State {
        match self.editor.edit(&command) {
            Some(edited) => {
                println!("Updated command: {edited}");
                State::Confirm(edited)
            }
            // Cancelled or unchanged; back to the same candidate.
            None => State::Confirm(command),
        }
    }

    async fn explain(&mut self, command: String) -> Result<State> {
        let context = self.context.clone().unwrap_or_default();
        let system = self.prompts.explanation_system_prompt(&context);
        let user = format!("Explain this command: {command}");
        let messages = [Message::system(&system), Message::user(&user)];
        let opts = RequestOptions::explanation(self.verbose);

        let spinner = (!self.verbose).then(|| Spinner::start("Explaining"));
        let outcome = send_interruptible(self.backend, &messages, &opts).await;
        if let Some(s) = spinner {
            s.stop();
        }

        match outcome {
            Ok(explanation) => {
                if let Some(log) = self.log {
                    log.append("explain", &self.backend.info(), &system, &user, &explanation);
                }
                println!("{SEPARATOR}");
                println!("{explanation}");
                println!("{SEPARATOR}");
            }
            Err(Error::Interrupted) => return Err(Error::Interrupted),
            // An explanation failure never loses the candidate command.
            Err(e) => eprintln!("Error: {e}"),
        }
        Ok(State::Confirm(command))
    }

    async fn execute(&mut self, command: String) -> Result<State> {
        println!("Executing: {command}");
        match self.runner.run(&command).await {
            Ok(result) if result.exit_code == 0 => {
                if let Some(chat) = self.chat.as_mut() {
                    chat.add_command_execution(&command, &result.output);
                    eprintln!("{}", chat.usage_bar());
                }
                Ok(State::Finished(0))
            }
            Ok(result) => Ok(State::ConfirmFix { command, result }),
            Err(Error::Interrupted) => Err(Error::Interrupted),
            Err(e) => {
                eprintln!("Error: {e}");
                Ok(State::Finished(1))
            }
        }
    }

    async fn confirm_fix(&mut self, command: String, result: ExecutionResult) -> Result<State> {
        eprintln!("{SEPARATOR}");
        eprintln!("Command execution failed with code {}", result.exit_code);
        eprintln!("Failed command: {command}");
        let answer = self
            .prompter
            .read_line("[Confirm] Try to fix this command? (y/N) ")
            .await?;
        if matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            Ok(State::Generate {
                fix: Some(FixContext {
                    command,
                    exit_code: result.exit_code,
                    output: result.output,
                }),
                regenerated: false,
            })
        } else {
            if let Some(chat) = self.chat.as_mut() {
                chat.add_command_execution(&command, &result.output);
            }
            Ok(State::Finished(result.exit_code))
        }
    }

    /// Tool context for the current request, gathered once. The selector
    /// picks a per-request subset of the enabled tools; with no tools
    /// enabled the context is empty and no model call is made.
    async fn request_context(&mut self, request: &str) -> Result<String> {
        if let Some(context) = &self.context {
            return Ok(context.clone());
        }
        let context = if self.tools.is_empty() {
            String::new()
        } else {
            let descriptors = describe_tools(&self.tools);
            let selected = ToolSelector::new(self.backend)
                .select(request, &descriptors, self.verbose, self.log)
                .await?;
            gather_context(
                self.tools
                    .iter()
                    .filter(|t| selected.iter().any(|name| name == t.name()))
                    .map(|t| t.as_ref()),
            )
        };
        self.context = Some(context.clone());
        Ok(context)
    }
}
