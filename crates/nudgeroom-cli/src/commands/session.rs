use clap::Subcommand;

use super::{open_services, CliResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Issue a session token for a user
    Issue {
        /// User id
        #[arg(id = "target_user", value_name = "USER")]
        user: String,
    },
    /// Revoke sessions: every session of a user, or a single token
    Revoke {
        /// User id
        #[arg(
            id = "target_user",
            value_name = "USER",
            required_unless_present = "token",
            conflicts_with = "token"
        )]
        user: Option<String>,
        /// A single token to revoke
        #[arg(long)]
        token: Option<String>,
    },
}

pub async fn run(action: SessionAction) -> CliResult {
    let services = open_services()?;
    match action {
        SessionAction::Issue { user } => {
            let token = services.sessions.issue(&user).await?;
            println!("{token}");
        }
        SessionAction::Revoke { user: Some(user), .. } => {
            let revoked = services.sessions.revoke_user(&user).await?;
            println!("revoked {revoked} session(s) for {user}");
        }
        SessionAction::Revoke { token: Some(token), .. } => {
            match services.sessions.revoke_token(&token).await? {
                Some(user) => println!("revoked token for {user}"),
                None => return Err("token is not active".into()),
            }
        }
        SessionAction::Revoke { .. } => return Err("give a user or --token".into()),
    }
    Ok(())
}
