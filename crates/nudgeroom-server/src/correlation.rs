//! Correlation table: pairs a task request with the rule results its event
//! produces.
//!
//! Slots live in a small arena. A [`CorrelationId`] packs the slot index and
//! its generation, so a reply for a slot that was released and reused is
//! recognised as stale and dropped. A slot is released when the reply
//! arrives, when the waiter times out, or when the waiting request is
//! dropped mid-flight.

use nudgeroom_core::rules::ActionLog;
use nudgeroom_core::CorrelationId;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    reply: Option<oneshot::Sender<ActionLog>>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

fn pack(index: u32, generation: u32) -> CorrelationId {
    CorrelationId((u64::from(generation) << 32) | u64::from(index))
}

fn unpack(id: CorrelationId) -> (usize, u32) {
    #[allow(clippy::cast_possible_truncation)]
    let (index, generation) = (id.0 as u32, (id.0 >> 32) as u32);
    (index as usize, generation)
}

impl Arena {
    fn insert(&mut self, reply: oneshot::Sender<ActionLog>) -> Option<CorrelationId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).ok()?;
                self.slots.push(Slot::default());
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.reply = Some(reply);
        Some(pack(index, slot.generation))
    }

    /// Take the sender if `id` is still current, freeing the slot.
    fn take(&mut self, id: CorrelationId) -> Option<oneshot::Sender<ActionLog>> {
        let (index, generation) = unpack(id);
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let reply = slot.reply.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        #[allow(clippy::cast_possible_truncation)]
        self.free.push(index as u32);
        Some(reply)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    arena: Arc<Mutex<Arena>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot. `None` only if the arena index space is exhausted.
    pub fn register(&self) -> Option<PendingReply> {
        let (tx, rx) = oneshot::channel();
        let id = self.lock().insert(tx)?;
        Some(PendingReply {
            id,
            rx,
            table: self.clone(),
        })
    }

    /// Deliver `log` to the waiter for `id`. Returns false for a stale or
    /// unknown id, or a waiter that already gave up.
    pub fn complete(&self, id: CorrelationId, log: ActionLog) -> bool {
        let Some(reply) = self.lock().take(id) else {
            return false;
        };
        reply.send(log).is_ok()
    }

    /// Slots currently awaiting a reply.
    pub fn pending(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|slot| slot.reply.is_some())
            .count()
    }

    fn release(&self, id: CorrelationId) {
        drop(self.lock().take(id));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<ActionLog>,
    table: CorrelationTable,
}

impl PendingReply {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait up to `timeout` for the reply.
    pub async fn wait(mut self, timeout: Duration) -> Option<ActionLog> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(log)) => Some(log),
            _ => None,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.release(self.id);
    }
}
