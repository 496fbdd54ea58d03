use clap::Subcommand;

use super::{open_services, print_json, CliResult};

#[derive(Subcommand)]
pub enum LedgerAction {
    /// Show points and streak
    Show {
        /// Show every user
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: LedgerAction, user: &str) -> CliResult {
    let services = open_services()?;
    match action {
        LedgerAction::Show { all: true, json } => {
            let entries = services.ledger.list().await?;
            if json {
                return print_json(&entries);
            }
            for entry in entries {
                println!("{}: {} points, streak {}", entry.user, entry.points, entry.streak);
            }
        }
        LedgerAction::Show { all: false, json } => {
            let entry = services.ledger.balance(user).await?;
            if json {
                return print_json(&entry);
            }
            println!("Points: {}", entry.points);
            println!("Streak: {}", entry.streak);
        }
    }
    Ok(())
}
