use std::borrow::Cow::{self, Borrowed, Owned};
use std::env;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tracing::error;
use tracing_subscriber::EnvFilter;

use parlance_core::driver::StartCallback;
use parlance_core::{ConversationDriver, TurnRole};
use parlance_interaction::ChatApiRunner;

const DEFAULT_SECRET_WORD: &str = "banana";

/// Session-inspection commands the REPL accepts alongside free text.
const REPL_COMMANDS: &[&str] = &["/history", "/persona"];

/// Rustyline helper wiring completion, hints, and highlighting for the
/// slash commands.
#[derive(Clone)]
struct CliHelper {
    commands: &'static [&'static str],
}

impl CliHelper {
    fn new() -> Self {
        Self {
            commands: REPL_COMMANDS,
        }
    }

    fn matching_commands(&self, prefix: &str) -> Vec<&'static str> {
        self.commands
            .iter()
            .copied()
            .filter(|cmd| cmd.starts_with(prefix))
            .collect()
    }
}

impl Helper for CliHelper {}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let prefix = &line[..pos];
        if !prefix.starts_with('/') {
            return Ok((0, Vec::new()));
        }

        let candidates = self
            .matching_commands(prefix)
            .into_iter()
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if !line.starts_with('/') {
            return Borrowed(line);
        }
        // Recognized commands in cyan; anything else slash-prefixed is
        // dimmed so a typo is visible before hitting enter.
        if self.matching_commands(line.trim_end()).is_empty() {
            Owned(line.bright_black().to_string())
        } else {
            Owned(line.bright_cyan().to_string())
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned(hint.bright_black().to_string())
    }

    fn highlight_char(&self, line: &str, _pos: usize, _forced: bool) -> bool {
        line.starts_with('/')
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let prefix = &line[..pos];
        if !prefix.starts_with('/') || prefix.contains(' ') {
            return None;
        }

        self.matching_commands(prefix)
            .into_iter()
            .find(|cmd| cmd.len() > prefix.len())
            .map(|cmd| cmd[prefix.len()..].to_string())
    }
}

impl Validator for CliHelper {}

/// The main entry point for the Parlance readline REPL.
///
/// Each typed line stands in for one voice transcription: it is fed
/// through a [`ConversationDriver`] and the streamed response chunks are
/// printed as they arrive.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // ===== Backend Initialization =====
    let runner = Arc::new(ChatApiRunner::try_from_env()?.with_default_personas());
    let secret_word =
        env::var("PARLANCE_SECRET_WORD").unwrap_or_else(|_| DEFAULT_SECRET_WORD.to_string());

    let on_start: StartCallback = Box::new(|transcription| {
        println!("{}", format!("[turn] {}", transcription).bright_black());
        Ok(())
    });

    let mut driver = ConversationDriver::new(runner, "assistant", secret_word, on_start);

    // ===== REPL Setup =====
    let helper = CliHelper::new();
    let mut rl = Editor::new()?;
    rl.set_helper(Some(helper));

    println!("{}", "=== Parlance REPL ===".bright_magenta().bold());
    println!(
        "{}",
        "Type a message, '/history' or '/persona' to inspect state, or 'quit' to exit."
            .bright_black()
    );
    println!();

    // ===== Main REPL Loop =====
    loop {
        let readline = rl.readline(">> ");

        match readline {
            Ok(line) => {
                let trimmed = line.trim();

                if trimmed == "quit" || trimmed == "exit" {
                    println!("{}", "Goodbye!".bright_green());
                    break;
                }

                if trimmed.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(&line);

                if trimmed == "/history" {
                    for turn in driver.history() {
                        let label = match turn.role {
                            TurnRole::User => "user".green(),
                            TurnRole::Assistant => "assistant".bright_blue(),
                        };
                        println!("{}: {}", label, turn.content);
                    }
                    continue;
                }

                if trimmed == "/persona" {
                    println!("{}", driver.active_persona().to_string().bright_magenta());
                    continue;
                }

                println!("{}", format!("> {}", trimmed).green());

                match driver.process(trimmed).await {
                    Ok(mut stream) => {
                        while let Some(chunk) = stream.next_chunk().await {
                            print!("{}", chunk.bright_blue());
                            let _ = std::io::stdout().flush();
                        }
                        println!();
                    }
                    Err(err) => {
                        error!(error = %err, "turn aborted before any chunk");
                        eprintln!("{}", format!("Turn aborted: {err}").red());
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("{}", "CTRL-C detected. Type 'quit' to exit.".yellow());
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("{}", "CTRL-D detected. Exiting...".bright_green());
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Error: {:?}", err).red());
                break;
            }
        }
    }

    Ok(())
}
