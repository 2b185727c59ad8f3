//! `envmedic fix`: run the fix-issue agent on one problem description.

use std::io::{BufRead, Write};
use std::sync::Arc;

use envmedic_config::AppConfig;
use envmedic_core::approval::{Approver, AutoApprove};
use envmedic_core::error::RunError;
use envmedic_core::event::{AgentEvent, EventHandler, MessageTag};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(issue: String, yes: bool, quiet: bool) -> anyhow::Result<()> {
    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;

    let approver: Arc<dyn Approver> = if yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(TerminalApprover)
    };
    let handler = Arc::new(PrintHandler { quiet });

    debug!(auto_approve = yes, quiet, config = ?config, "Starting fix session");

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("  Stopping the agent...");
            on_ctrl_c.cancel();
        }
    });

    match envmedic_agent::run_session(config, &issue, handler, approver, &cancel).await {
        Ok(_) | Err(RunError::Cancelled) => Ok(()),
        Err(RunError::MissingCredential(reason)) => {
            eprintln!();
            eprintln!("  ERROR: No API token configured!");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    ENVMEDIC_API_KEY=sk-...");
            eprintln!("    OPENAI_API_KEY=sk-...");
            eprintln!("    OPENAI_TOKEN=sk-...");
            eprintln!();
            eprintln!("  Or add api_key to your config file:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            anyhow::bail!("{reason}")
        }
        Err(e) => Err(e.into()),
    }
}

/// Asks on the terminal. Anything but `y`/`yes` is a denial.
struct TerminalApprover;

impl Approver for TerminalApprover {
    fn confirm(&self, action: &str, purpose: &str) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr);
        let _ = writeln!(stderr, "  The agent wants to run:");
        let _ = writeln!(stderr, "    {action}");
        let _ = writeln!(stderr, "  Purpose: {purpose}");
        let _ = write!(stderr, "  Allow? [y/N] ");
        let _ = stderr.flush();
        drop(stderr);

        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Prints events to stdout. Quiet mode keeps user-facing narration and the
/// final outcome.
struct PrintHandler {
    quiet: bool,
}

impl EventHandler for PrintHandler {
    fn handle(&self, event: &AgentEvent) -> anyhow::Result<()> {
        if !should_print(self.quiet, event) {
            return Ok(());
        }
        let mut out = std::io::stdout().lock();
        let label = label(event.tag());
        writeln!(out)?;
        for line in event.render().trim_end().lines() {
            writeln!(out, "  {label} > {line}")?;
        }
        out.flush()?;
        Ok(())
    }
}

fn should_print(quiet: bool, event: &AgentEvent) -> bool {
    !quiet || event.tag().is_user_facing() || event.is_terminal()
}

fn label(tag: MessageTag) -> &'static str {
    match tag {
        MessageTag::Assistant | MessageTag::AssistantForUser => "Agent",
        MessageTag::AssistantLog => "Log",
        MessageTag::ToolCall => "Tool",
        MessageTag::AssistantError => "Error",
        MessageTag::User => "You",
    }
}
