use clap::Subcommand;
use nudgeroom_core::sweep::Sweeper;

use super::{open_services, print_json, require_instant, CliResult};

#[derive(Subcommand)]
pub enum NudgeAction {
    /// Schedule a reminder for a task
    Schedule {
        /// Task ID
        task: String,
        /// Delivery time (RFC 3339)
        #[arg(long)]
        at: Option<String>,
        /// Delivery time as minutes from now
        #[arg(long)]
        in_mins: Option<i64>,
    },
    /// Cancel a pending reminder
    Cancel {
        /// Task ID
        task: String,
    },
    /// List reminders
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Trigger due reminders and expire overdue bets for every user, once
    Sweep,
}

pub async fn run(action: NudgeAction, user: &str) -> CliResult {
    let services = open_services()?;
    match action {
        NudgeAction::Schedule { task, at, in_mins } => {
            let at = require_instant("at", at.as_deref(), in_mins, services.clock.now())?;
            if services.tasks.get(user, &task).await?.is_none() {
                return Err(format!("task {task} not found").into());
            }
            let nudge = services.reminders.schedule(user, &task, at).await?;
            println!("Nudge scheduled for {}", nudge.delivery_time);
        }
        NudgeAction::Cancel { task } => {
            services.reminders.cancel(user, &task).await?;
            println!("Nudge canceled");
        }
        NudgeAction::List { json } => {
            let nudges = services.reminders.list_for_user(user).await?;
            if json {
                return print_json(&nudges);
            }
            if nudges.is_empty() {
                println!("No nudges.");
            }
            for nudge in nudges {
                let state = match (&nudge.message, nudge.canceled) {
                    (Some(message), _) => format!("sent: {message}"),
                    (None, true) => "canceled".to_string(),
                    (None, false) => "pending".to_string(),
                };
                println!("{} at {} [{state}]", nudge.task, nudge.delivery_time);
            }
        }
        NudgeAction::Sweep => {
            let report = Sweeper::new(&services).sweep_once().await?;
            println!(
                "triggered {}, expired {}, orphans canceled {}, failed {}",
                report.triggered, report.expired, report.orphans_canceled, report.failed
            );
        }
    }
    Ok(())
}
