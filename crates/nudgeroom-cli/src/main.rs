use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "nudgeroom-cli", version, about = "Nudgeroom CLI")]
struct Cli {
    /// User to act as
    #[arg(long, short, global = true, env = "NUDGEROOM_USER", default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Session tokens for the event stream and HTTP API
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Task management
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// Point wagers on tasks
    Bet {
        #[command(subcommand)]
        action: commands::bet::BetAction,
    },
    /// Reminder nudges
    Nudge {
        #[command(subcommand)]
        action: commands::nudge::NudgeAction,
    },
    /// Points and streak
    Ledger {
        #[command(subcommand)]
        action: commands::ledger::LedgerAction,
    },
    /// Emotion journal
    Emotion {
        #[command(subcommand)]
        action: commands::emotion::EmotionAction,
    },
    /// Task event rules
    Rules {
        #[command(subcommand)]
        action: commands::rules::RulesAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let user = cli.user.as_str();
    let result = match cli.command {
        Commands::Session { action } => commands::session::run(action).await,
        Commands::Task { action } => commands::task::run(action, user).await,
        Commands::Bet { action } => commands::bet::run(action, user).await,
        Commands::Nudge { action } => commands::nudge::run(action, user).await,
        Commands::Ledger { action } => commands::ledger::run(action, user).await,
        Commands::Emotion { action } => commands::emotion::run(action, user).await,
        Commands::Rules { action } => commands::rules::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
