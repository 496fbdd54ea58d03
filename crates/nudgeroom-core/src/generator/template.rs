use async_trait::async_trait;

use super::{validate_message, GeneratorError, MessageGenerator, NudgeContext, MAX_MESSAGE_CHARS};

/// Moods that get the gentle wording.
const LOW_MOODS: &[&str] = &[
    "anxious",
    "stressed",
    "tired",
    "sad",
    "overwhelmed",
    "frustrated",
    "exhausted",
];

const GENTLE: &str = "No pressure: just five minutes on \"{title}\" is a real start.";
const UPBEAT: &str = "You planned \"{title}\" for now. Let's get it going!";
const DUE_SOON: &str = "\"{title}\" is due {due}. A quick start now keeps it easy.";

/// Offline, deterministic generator. Same context, same message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

fn fit_title(template: &str, title: &str, due: &str) -> String {
    let fixed = template.replace("{title}", "").replace("{due}", due);
    let budget = MAX_MESSAGE_CHARS.saturating_sub(fixed.chars().count());
    let title = if title.chars().count() > budget {
        let mut cut: String = title.chars().take(budget.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    } else {
        title.to_string()
    };
    template.replace("{title}", &title).replace("{due}", due)
}

#[async_trait]
impl MessageGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, context: &NudgeContext) -> Result<String, GeneratorError> {
        let low = context
            .recent_emotions
            .first()
            .is_some_and(|e| LOW_MOODS.contains(&e.emotion.to_lowercase().as_str()));

        let message = match (low, context.due) {
            (true, _) => fit_title(GENTLE, &context.title, ""),
            (false, Some(due)) => {
                let due = due.format("%b %-d, %H:%M UTC").to_string();
                fit_title(DUE_SOON, &context.title, &due)
            }
            (false, None) => fit_title(UPBEAT, &context.title, ""),
        };
        validate_message(&message)
    }
}
