use clap::Subcommand;
use nudgeroom_core::rules::RuleStore;

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore the default rules
    Reset,
}

pub fn run(action: RulesAction) -> CliResult {
    let store = RuleStore::open()?;
    match action {
        RulesAction::List { json } => {
            let rules = store.load_all()?;
            if json {
                return print_json(&rules);
            }
            if rules.is_empty() {
                println!("No rules found.");
                return Ok(());
            }
            println!("Rules ({}):", rules.len());
            println!();
            for rule in rules {
                let status = if rule.enabled { "enabled" } else { "disabled" };
                println!("  {} ({})", rule.name, status);
                if !rule.description.is_empty() {
                    println!("    {}", rule.description);
                }
                let triggers: Vec<String> = rule.triggers.iter().map(|t| format!("{t:?}")).collect();
                println!("    On: {}", triggers.join(", "));
                for action in &rule.actions {
                    println!("    - {}", action.description());
                }
                println!();
            }
        }
        RulesAction::Reset => {
            let rules = store.reset()?;
            println!("Restored {} default rules to {}", rules.len(), store.path().display());
        }
    }
    Ok(())
}
