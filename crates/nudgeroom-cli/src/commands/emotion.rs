use clap::Subcommand;
use nudgeroom_core::EmotionLogger;

use super::{open_services, print_json, CliResult};

#[derive(Subcommand)]
pub enum EmotionAction {
    /// Record how you feel
    Log {
        /// Emotion, e.g. "tired"
        emotion: String,
        /// Optional note
        #[arg(long)]
        note: Option<String>,
    },
    /// Show recent entries, newest first
    Recent {
        /// How many entries
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: EmotionAction, user: &str) -> CliResult {
    let services = open_services()?;
    match action {
        EmotionAction::Log { emotion, note } => {
            let entry = services.emotions.log(user, &emotion, note.as_deref()).await?;
            println!("Logged: {}", entry.emotion);
        }
        EmotionAction::Recent { limit, json } => {
            let entries = services.emotions.recent_emotions(user, limit).await?;
            if json {
                return print_json(&entries);
            }
            for entry in entries {
                match &entry.note {
                    Some(note) => println!("{} {} ({note})", entry.recorded_at, entry.emotion),
                    None => println!("{} {}", entry.recorded_at, entry.emotion),
                }
            }
        }
    }
    Ok(())
}
