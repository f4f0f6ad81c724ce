//! Per-turn TTS task manager
//!
//! Admits segments in order, runs their synthesis concurrently and keeps a
//! single sender loop delivering the results in admission order. One manager
//! belongs to one conversation turn of one client; nothing here is global.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};

use super::payload::{Payload, PayloadBuilder};
use super::segment::Segment;
use super::sender::{QueueSender, Queued, spawn_sender};
use super::sequencer::{Position, Sequencer, Slot};
use super::task::SynthesisJob;
use super::transport::Transport;
use crate::tts::SynthesisBackend;
use crate::{Error, Result};

/// Manager-level options
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerConfig {
    /// Stream fragments whenever the backend can
    pub stream: bool,
}

/// Sender loop currently serving this turn
struct ActiveSender {
    queue: QueueSender,
    handle: JoinHandle<Result<()>>,
}

/// Runs synthesis concurrently while delivering payloads in order
pub struct TtsTaskManager {
    backend: SynthesisBackend,
    builder: Arc<dyn PayloadBuilder>,
    transport: Arc<dyn Transport>,
    config: ManagerConfig,
    sequencer: Sequencer,
    tasks: JoinSet<()>,
    dispatched: u64,
    sender: Option<ActiveSender>,
    /// Set once delivery has failed; cleared only by a reset
    failure: Option<String>,
}

impl TtsTaskManager {
    #[must_use]
    pub fn new(
        backend: SynthesisBackend,
        builder: Arc<dyn PayloadBuilder>,
        transport: Arc<dyn Transport>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            backend,
            builder,
            transport,
            config,
            sequencer: Sequencer::new(),
            tasks: JoinSet::new(),
            dispatched: 0,
            sender: None,
            failure: None,
        }
    }

    /// Admit a segment and start its synthesis
    ///
    /// The position is fixed here, before any synthesis runs. Silent segments
    /// skip the backend and are queued immediately.
    ///
    /// # Errors
    ///
    /// Returns error if delivery for this turn has failed. Every later call
    /// keeps failing until [`clear`](Self::clear) or [`cancel`](Self::cancel).
    pub async fn speak(&mut self, segment: Segment) -> Result<Position> {
        let queue = self.ensure_sender().await?;
        let position = self.sequencer.admit();

        if segment.is_silent() {
            tracing::debug!(position, "empty TTS text, sending silent display payload");
            if queue
                .send(Queued::new(Slot::whole(position), Payload::silent(&segment)))
                .is_err()
            {
                return Err(self.poison(Error::Pipeline(format!(
                    "payload sender stopped before position {position}"
                ))));
            }
            return Ok(position);
        }

        tracing::debug!(
            position,
            text = %segment.tts_text,
            speaker = segment.display.name.as_deref().unwrap_or_default(),
            "queuing TTS task"
        );

        let job = SynthesisJob {
            segment,
            position,
            backend: self.backend.clone(),
            builder: Arc::clone(&self.builder),
            queue,
            stream: self.config.stream,
        };
        self.tasks.spawn(job.run());
        self.dispatched += 1;

        Ok(position)
    }

    /// Return the live sender's queue, starting a loop if none is running
    async fn ensure_sender(&mut self) -> Result<QueueSender> {
        self.check_failure()?;

        if let Some(active) = &self.sender {
            if !active.handle.is_finished() {
                return Ok(active.queue.clone());
            }
        }

        if let Some(finished) = self.sender.take() {
            // a loop only ends early when it failed; its positions are lost
            if let Err(e) = join_sender(finished.handle).await {
                return Err(self.poison(e));
            }
        }

        let (queue, handle) = spawn_sender(self.sequencer.issued(), Arc::clone(&self.transport));
        self.sender = Some(ActiveSender {
            queue: queue.clone(),
            handle,
        });
        Ok(queue)
    }

    /// Wait for every synthesis task, then for every payload to be sent
    ///
    /// Admitting again afterwards starts a fresh sender loop that continues
    /// from the next position.
    ///
    /// # Errors
    ///
    /// Returns error if a task panicked, the transport failed, the sender
    /// found a gap it could never fill or delivery had already failed
    pub async fn drain(&mut self) -> Result<()> {
        self.check_failure()?;

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    return Err(self.poison(Error::Pipeline(format!(
                        "synthesis task panicked: {e}"
                    ))));
                }
            }
        }

        if let Some(ActiveSender { queue, handle }) = self.sender.take() {
            drop(queue);
            if let Err(e) = join_sender(handle).await {
                return Err(self.poison(e));
            }
        }

        Ok(())
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(Error::Pipeline(format!(
                "delivery for this turn already failed: {reason}"
            ))),
            None => Ok(()),
        }
    }

    /// Remember a delivery failure so no later admission can succeed silently
    fn poison(&mut self, error: Error) -> Error {
        tracing::error!(admitted = self.sequencer.issued(), error = %error, "payload delivery failed");
        self.failure = Some(error.to_string());
        error
    }

    /// Abort all work, wait for it to unwind and reset numbering
    ///
    /// Once this returns, nothing from the cancelled work can reach the
    /// transport any more.
    pub async fn cancel(&mut self) {
        self.tasks.shutdown().await;
        if let Some(ActiveSender { queue, handle }) = self.sender.take() {
            drop(queue);
            handle.abort();
            let _ = handle.await;
        }
        self.reset();
        tracing::debug!("TTS tasks cancelled");
    }

    /// Abort all work without waiting and reset numbering
    ///
    /// Anything buffered but unsent is discarded; the next admission starts a
    /// new sender with an empty buffer at position zero.
    pub fn clear(&mut self) {
        self.tasks.abort_all();
        self.tasks.detach_all();
        if let Some(active) = self.sender.take() {
            active.handle.abort();
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.sequencer.reset();
        self.dispatched = 0;
        self.failure = None;
    }

    /// Synthesis tasks still running or not yet joined
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Positions handed out since the last reset
    #[must_use]
    pub const fn admitted(&self) -> Position {
        self.sequencer.issued()
    }

    /// Segments sent to the backend since the last reset (silent ones excluded)
    #[must_use]
    pub const fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// True once delivery has failed and before the next reset
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

impl Drop for TtsTaskManager {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn join_sender(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(Error::Pipeline(format!("payload sender panicked: {e}"))),
    }
}
