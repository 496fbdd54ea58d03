use indoc::formatdoc;

use super::{NudgeContext, MAX_MESSAGE_CHARS};

pub fn system_prompt() -> String {
    formatdoc! {"
        You write short, warm reminders that help someone start a task they planned.
        Reply with the reminder only: no quotes, no preamble, no hashtags.
        Stay under {max} characters. Match the tone to their recent mood:
        gentle if they have been stressed or tired, upbeat otherwise.
        ",
        max = MAX_MESSAGE_CHARS
    }
}

pub fn user_prompt(context: &NudgeContext) -> String {
    let mut prompt = format!("Task: {}\n", context.title);
    if !context.description.is_empty() {
        prompt.push_str(&format!("Details: {}\n", context.description));
    }
    if let Some(due) = context.due {
        prompt.push_str(&format!("Due: {}\n", due.format("%Y-%m-%d %H:%M UTC")));
    }
    if context.recent_emotions.is_empty() {
        prompt.push_str("Recent mood: unknown\n");
    } else {
        prompt.push_str("Recent moods (newest first):\n");
        for entry in &context.recent_emotions {
            match &entry.note {
                Some(note) => prompt.push_str(&format!("- {} ({note})\n", entry.emotion)),
                None => prompt.push_str(&format!("- {}\n", entry.emotion)),
            }
        }
    }
    prompt
}
