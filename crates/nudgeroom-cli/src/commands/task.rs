//! Task commands. Each mutation runs the enabled rules inline, the same way
//! the server's dispatcher does for HTTP requests.

use clap::Subcommand;
use nudgeroom_core::collab::TaskChange;
use nudgeroom_core::rules::{ActionExecutor, ExecutionStatus, RuleEngine, RuleStore};
use nudgeroom_core::Services;

use super::{open_services, print_json, resolve_instant, CliResult};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Create {
        /// Task title
        title: String,
        /// Task description
        #[arg(long, default_value = "")]
        description: String,
        /// Due time (RFC 3339)
        #[arg(long)]
        due: Option<String>,
        /// Due time as minutes from now
        #[arg(long)]
        due_in_mins: Option<i64>,
        /// Skip rule evaluation
        #[arg(long)]
        no_rules: bool,
    },
    /// List tasks
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start a pending task
    Start {
        /// Task ID
        id: String,
    },
    /// Complete a started task
    Complete {
        /// Task ID
        id: String,
    },
    /// Delete a task
    Delete {
        /// Task ID
        id: String,
    },
}

pub async fn run(action: TaskAction, user: &str) -> CliResult {
    let services = open_services()?;
    match action {
        TaskAction::Create {
            title,
            description,
            due,
            due_in_mins,
            no_rules,
        } => {
            let due = resolve_instant("due", due.as_deref(), due_in_mins, services.clock.now())?;
            let change = services.tasks.create(user, &title, &description, due).await?;
            println!("Task created: {}", change.task.id);
            if !no_rules {
                apply_rules(&services, &change).await?;
            }
        }
        TaskAction::List { json } => {
            let tasks = services.tasks.list(user).await?;
            if json {
                return print_json(&tasks);
            }
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                let due = task.due.map(|d| format!(" due {d}")).unwrap_or_default();
                println!("{} [{}] {}{}", task.id, task.status.as_str(), task.title, due);
            }
        }
        TaskAction::Start { id } => {
            let change = services.tasks.start(user, &id).await?;
            println!("Task started: {id}");
            apply_rules(&services, &change).await?;
        }
        TaskAction::Complete { id } => {
            let change = services.tasks.complete(user, &id).await?;
            println!("Task completed: {id}");
            apply_rules(&services, &change).await?;
        }
        TaskAction::Delete { id } => {
            let change = services.tasks.delete(user, &id).await?;
            println!("Task deleted: {id}");
            apply_rules(&services, &change).await?;
        }
    }
    Ok(())
}

async fn apply_rules(services: &Services, change: &TaskChange) -> CliResult {
    let engine = RuleEngine::load(&RuleStore::open()?)?;
    let actions = engine.evaluate(&change.event);
    if actions.is_empty() {
        return Ok(());
    }
    let log = ActionExecutor::from_services(services)
        .execute_batch(&change.event, actions)
        .await;
    for result in &log.results {
        match &result.status {
            ExecutionStatus::Success => {
                println!("  rule {}: {}", result.rule_name, result.action_type);
            }
            ExecutionStatus::Skipped { reason } => {
                println!("  rule {}: {} skipped ({reason})", result.rule_name, result.action_type);
            }
            ExecutionStatus::Failed { reason, .. } => {
                eprintln!("  rule {}: {} failed: {reason}", result.rule_name, result.action_type);
            }
        }
    }
    Ok(())
}
