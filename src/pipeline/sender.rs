//! Ordered delivery: reassembly buffer and the single sender loop
//!
//! Synthesis tasks finish in any order and push `(slot, payload)` pairs into
//! an unbounded channel. Exactly one sender task drains that channel, parks
//! early arrivals in a [`ReassemblyBuffer`] and forwards payloads to the
//! transport strictly in slot order. The buffer and its cursor live inside
//! the sender task, so nothing else can touch them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::payload::Payload;
use super::sequencer::{Position, Slot};
use super::transport::Transport;
use crate::{Error, Result};

/// A payload waiting for its turn
#[derive(Debug, Clone)]
pub struct Queued {
    pub slot: Slot,
    pub payload: Payload,
}

impl Queued {
    /// Tag `payload` with `slot`
    #[must_use]
    pub fn new(slot: Slot, payload: Payload) -> Self {
        Self {
            slot,
            payload: payload.at(slot),
        }
    }
}

/// Producer side of the reassembly channel
pub type QueueSender = mpsc::UnboundedSender<Queued>;

/// Out-of-order holding area keyed by slot
#[derive(Debug)]
pub struct ReassemblyBuffer {
    pending: BTreeMap<(Position, u32), Queued>,
    next: (Position, u32),
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl ReassemblyBuffer {
    /// Empty buffer expecting `position` first
    #[must_use]
    pub const fn starting_at(position: Position) -> Self {
        Self {
            pending: BTreeMap::new(),
            next: (position, 0),
        }
    }

    /// Next slot eligible for delivery
    #[must_use]
    pub const fn next_expected(&self) -> (Position, u32) {
        self.next
    }

    /// Park a payload until its slot comes up
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pipeline`] for a slot that was already delivered or
    /// is already buffered
    pub fn insert(&mut self, queued: Queued) -> Result<()> {
        let key = queued.slot.key();
        if key < self.next {
            return Err(Error::Pipeline(format!(
                "slot {} arrived after delivery moved on to {}.{}",
                queued.slot, self.next.0, self.next.1
            )));
        }
        if self.pending.contains_key(&key) {
            return Err(Error::Pipeline(format!("duplicate slot {}", queued.slot)));
        }
        self.pending.insert(key, queued);
        Ok(())
    }

    /// Remove and return the payload at the cursor, advancing it
    pub fn pop_ready(&mut self) -> Option<Payload> {
        let queued = self.pending.remove(&self.next)?;
        self.next = if queued.slot.last {
            (self.next.0 + 1, 0)
        } else {
            (self.next.0, self.next.1 + 1)
        };
        Some(queued.payload)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Start a sender loop expecting `start` as its first position
///
/// The loop runs until every [`QueueSender`] is dropped, then fails if
/// anything is still parked (a gap that can never be filled).
pub fn spawn_sender(
    start: Position,
    transport: Arc<dyn Transport>,
) -> (QueueSender, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let result = run_sender(rx, transport, ReassemblyBuffer::starting_at(start)).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "payload sender stopped");
        }
        result
    });
    (tx, handle)
}

async fn run_sender(
    mut rx: mpsc::UnboundedReceiver<Queued>,
    transport: Arc<dyn Transport>,
    mut buffer: ReassemblyBuffer,
) -> Result<()> {
    while let Some(queued) = rx.recv().await {
        tracing::trace!(slot = %queued.slot, buffered = buffer.len(), "payload arrived");
        buffer.insert(queued)?;

        while let Some(payload) = buffer.pop_ready() {
            let message = serde_json::to_string(&payload)?;
            transport.send(message).await?;
            tracing::debug!(
                position = payload.position,
                fragment = payload.fragment,
                silent = payload.is_silent(),
                "payload sent"
            );
        }
    }

    if !buffer.is_empty() {
        let (position, fragment) = buffer.next_expected();
        return Err(Error::Pipeline(format!(
            "{} payloads stranded waiting for slot {position}.{fragment}",
            buffer.len()
        )));
    }

    Ok(())
}
