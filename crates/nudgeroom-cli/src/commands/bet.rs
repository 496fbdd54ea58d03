use clap::Subcommand;

use super::{open_services, print_json, require_instant, CliResult};

#[derive(Subcommand)]
pub enum BetAction {
    /// Wager points that a task gets started before a deadline
    Place {
        /// Task ID
        task: String,
        /// Points to wager
        wager: i64,
        /// Deadline (RFC 3339)
        #[arg(long)]
        deadline: Option<String>,
        /// Deadline as minutes from now
        #[arg(long)]
        in_mins: Option<i64>,
    },
    /// Cancel a bet; an open bet is refunded
    Cancel {
        /// Task ID
        task: String,
    },
    /// List bets
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: BetAction, user: &str) -> CliResult {
    let services = open_services()?;
    match action {
        BetAction::Place {
            task,
            wager,
            deadline,
            in_mins,
        } => {
            let deadline =
                require_instant("deadline", deadline.as_deref(), in_mins, services.clock.now())?;
            let info = services
                .tasks
                .get(user, &task)
                .await?
                .ok_or_else(|| format!("task {task} not found"))?;
            let bet = services
                .wagers
                .place(user, &info.id, wager, deadline, info.due)
                .await?;
            println!("Bet placed: {} points on {} until {}", bet.wager, bet.task, bet.deadline);
        }
        BetAction::Cancel { task } => {
            let (bet, refunded) = services.wagers.cancel(user, &task).await?;
            if refunded {
                println!("Bet canceled: {} points refunded", bet.wager);
            } else {
                println!("Bet removed (already settled)");
            }
        }
        BetAction::List { json } => {
            let bets = services.wagers.list_for_user(user).await?;
            if json {
                return print_json(&bets);
            }
            if bets.is_empty() {
                println!("No bets.");
            }
            for bet in bets {
                let state = match (bet.success, bet.reward) {
                    (None, _) => "open".to_string(),
                    (Some(true), Some(reward)) => format!("won +{reward}"),
                    (Some(true), None) => "won".to_string(),
                    (Some(false), _) => "lost".to_string(),
                };
                println!("{} {} pts, deadline {} [{state}]", bet.task, bet.wager, bet.deadline);
            }
        }
    }
    Ok(())
}
