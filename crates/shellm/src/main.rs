//! Turn a natural-language request into a shell command, confirm it, run it.
//!
//! # Examples
//!
//! ```sh
//! # One-shot request
//! shellm find all rust files modified this week
//!
//! # Read the request from a file
//! shellm --prompt-file request.txt
//!
//! # Pick a configured backend and show model reasoning
//! shellm -b 1 -v compress this directory
//!
//! # Keep the conversation going after each command
//! shellm -i tidy up my downloads folder
//!
//! # Write a starter config to ~/.config/shellm/config.yml
//! shellm --init
//! ```

use std::path::PathBuf;
use std::process;

use clap::Parser;

use shellm::backend::BackendRegistry;
use shellm::config::Config;
use shellm::editor::ExternalEditor;
use shellm::executor::ShellRunner;
use shellm::logging::{ExchangeLog, init_tracing};
use shellm::prompt::{PromptBuilder, load_prompt_from_file};
use shellm::session::Session;
use shellm::tools::build_tools;
use shellm::ui::ConsolePrompter;
use shellm::{Error, Result};

/// Generate shell commands from natural language, with confirmation before
/// anything runs.
#[derive(Parser)]
#[command(name = "shellm", version)]
struct Cli {
    /// The request, as free words: `shellm list the biggest files`
    prompt: Vec<String>,

    /// Read the request from a file instead
    #[arg(long, conflicts_with = "prompt")]
    prompt_file: Option<PathBuf>,

    /// Backend index from the config to use
    #[arg(short, long)]
    backend: Option<usize>,

    /// Increase verbosity (-v info + streamed reasoning, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,

    /// Append a JSON record of every model exchange to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Keep prompting for follow-up requests after each command
    #[arg(short = 'i', long)]
    follow_up: bool,
}

async fn run(cli: Cli) -> Result<i32> {
    if cli.init {
        let path = Config::write_default()?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(0);
    }

    let request = if let Some(path) = &cli.prompt_file {
        Some(load_prompt_from_file(path)?)
    } else if cli.prompt.is_empty() {
        None
    } else {
        Some(cli.prompt.join(" "))
    };
    if request.is_none() && !cli.follow_up {
        return Err(Error::Config(
            "no prompt given (pass words on the command line, --prompt-file, or -i)".to_string(),
        ));
    }

    let (config, found) = Config::load(cli.config.as_deref())?;
    if !found {
        eprintln!("Note: No configuration file found, using built-in defaults (see --init)");
    }

    let mut registry = BackendRegistry::new();
    let backend = registry.get(&config, cli.backend)?;

    let log = cli.log_file.as_ref().map(ExchangeLog::new);
    let tools = build_tools(&config.tools.enabled);
    let prompts = PromptBuilder::new(&config.shell);
    let runner = ShellRunner::new(&config.shell);
    let mut prompter = ConsolePrompter::new();
    let editor = ExternalEditor;

    let mut session = Session::new(
        backend.as_ref(),
        &runner,
        &mut prompter,
        &editor,
        prompts,
        tools,
    )
    .with_log(log.as_ref())
    .verbose(cli.verbose > 0)
    .follow_up(cli.follow_up);

    session.run(request.as_deref()).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(Error::Interrupted) => {
            eprintln!("Operation cancelled by user");
            process::exit(130);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(e.exit_code());
        }
    }
}
