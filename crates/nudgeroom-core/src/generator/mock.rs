//! Scriptable generator for tests and dry runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{validate_message, GeneratorError, MessageGenerator, NudgeContext};

/// Replays queued replies in order, then falls back to a fixed message.
///
/// Replies pass through [`validate_message`] like a real backend's would.
#[derive(Debug)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GeneratorError>>>,
    fallback: String,
    delay: Duration,
    call_count: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            delay: Duration::ZERO,
            call_count: AtomicU32::new(0),
        }
    }

    /// Queue a reply for the next call.
    pub fn with_reply(self, reply: Result<String, GeneratorError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new("Time to get started!")
    }
}

#[async_trait]
impl MessageGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, context: &NudgeContext) -> Result<String, GeneratorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let raw = match next {
            Some(reply) => reply?,
            None => self.fallback.replace("{title}", &context.title),
        };
        validate_message(&raw)
    }
}
