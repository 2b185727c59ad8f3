//! envmedic CLI: the main entry point.
//!
//! Commands:
//! - `fix`     Diagnose and fix an environment issue
//! - `tools`   List the tools the agent may call
//! - `config`  Show, locate, validate or print the default configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "envmedic",
    about = "envmedic: diagnose and fix Python environment issues with an LLM agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate and fix an environment issue
    Fix {
        /// Description of the problem, e.g. the error message you see
        #[arg(required = true, num_args = 1..)]
        issue: Vec<String>,

        /// Approve every host-mutating action without asking
        #[arg(short, long)]
        yes: bool,

        /// Only show narration meant for the user
        #[arg(short, long)]
        quiet: bool,
    },

    /// List the tools available to the agent
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (token redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the config file
    Validate,
    /// Print the default configuration
    Default,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fix { issue, yes, quiet } => commands::fix::run(issue.join(" "), yes, quiet).await?,
        Commands::Tools => commands::tools::run()?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Default => commands::config_cmd::default(),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_joins_issue_words() {
        let cli = Cli::try_parse_from(["envmedic", "fix", "-y", "No", "module", "named", "numpy"]).unwrap();
        match cli.command {
            Commands::Fix { issue, yes, quiet } => {
                assert_eq!(issue.join(" "), "No module named numpy");
                assert!(yes);
                assert!(!quiet);
            }
            _ => panic!("expected fix"),
        }
    }

    #[test]
    fn fix_requires_an_issue() {
        assert!(Cli::try_parse_from(["envmedic", "fix"]).is_err());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["envmedic", "config", "path", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Config { action: ConfigAction::Path }));
    }
}
