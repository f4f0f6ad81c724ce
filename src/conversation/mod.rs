//! Conversation turn controller
//!
//! Drives one turn end to end: start signals, model output split into
//! sentences, each sentence admitted to a [`TtsTaskManager`], drain, end
//! signals. An interrupt arrives through a [`CancellationToken`]; the turn
//! then waits for its manager to unwind before returning, so nothing from it
//! reaches the client afterwards. Dropping the turn future still clears the
//! manager, without waiting.

pub mod agent;
pub mod segmenter;

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use agent::{Agent, EchoAgent, TextStream};
pub use segmenter::SentenceSegmenter;

use crate::config::CharacterConfig;
use crate::pipeline::{DisplayText, ManagerConfig, PayloadBuilder, Segment, Transport, TtsTaskManager};
use crate::tts::SynthesisBackend;
use crate::{Error, Result};

/// Non-audio frames sent around a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TurnSignal {
    Control { text: String },
    FullText { text: String },
    BackendSynthComplete,
    ForceNewMessage,
    Error { message: String },
}

impl TurnSignal {
    #[must_use]
    pub fn control(text: &str) -> Self {
        Self::Control {
            text: text.to_string(),
        }
    }

    /// Serialize and send through `transport`
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the transport fails
    pub async fn send(&self, transport: &dyn Transport) -> Result<()> {
        transport.send(serde_json::to_string(self)?).await
    }
}

/// Collaborators shared by every turn of one client
#[derive(Clone)]
pub struct ConversationContext {
    pub agent: Arc<dyn Agent>,
    pub backend: SynthesisBackend,
    pub builder: Arc<dyn PayloadBuilder>,
    pub character: CharacterConfig,
    pub manager: ManagerConfig,
}

impl ConversationContext {
    /// Wrap one sentence of the reply with the character's caption metadata
    #[must_use]
    pub fn segment(&self, text: &str) -> Segment {
        Segment::new(text).with_display(
            DisplayText::new(text)
                .with_speaker(self.character.name.clone(), self.character.avatar.clone()),
        )
    }
}

/// Owns the turn's manager and tears it down however the turn ends
struct TurnGuard {
    manager: TtsTaskManager,
    turn_id: String,
    finished: bool,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(turn = %self.turn_id, "conversation turn dropped before finishing");
        }
        self.manager.clear();
    }
}

/// Run one conversation turn and return the full reply text
///
/// Cancelling `cancel` interrupts the turn. All synthesis work and the
/// sender loop have stopped by the time this returns.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] when interrupted, with no error frame sent.
/// Returns any other error if the agent, transport or delivery pipeline
/// fails; an error frame has then already been sent to the client.
pub async fn run_turn(
    ctx: &ConversationContext,
    transport: Arc<dyn Transport>,
    input: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let mut guard = TurnGuard {
        manager: TtsTaskManager::new(
            ctx.backend.clone(),
            Arc::clone(&ctx.builder),
            Arc::clone(&transport),
            ctx.manager,
        ),
        turn_id: id[..8].to_string(),
        finished: false,
    };

    let result = tokio::select! {
        result = drive_turn(ctx, transport.as_ref(), &mut guard, input) => result,
        () = cancel.cancelled() => Err(Error::Cancelled),
    };

    match &result {
        Ok(_) => {}
        Err(Error::Cancelled) => {
            guard.manager.cancel().await;
            tracing::info!(turn = %guard.turn_id, "conversation turn cancelled due to interrupt");
        }
        Err(e) => {
            tracing::error!(turn = %guard.turn_id, error = %e, "error in conversation turn");
            let frame = TurnSignal::Error {
                message: format!("Conversation error: {e}"),
            };
            if let Err(send_err) = frame.send(transport.as_ref()).await {
                tracing::warn!(error = %send_err, "failed to report conversation error");
            }
        }
    }

    guard.finished = true;
    result
}

async fn drive_turn(
    ctx: &ConversationContext,
    transport: &dyn Transport,
    guard: &mut TurnGuard,
    input: &str,
) -> Result<String> {
    TurnSignal::control("conversation-chain-start").send(transport).await?;
    TurnSignal::FullText {
        text: "Thinking...".to_string(),
    }
    .send(transport)
    .await?;

    tracing::info!(turn = %guard.turn_id, "new conversation turn started");
    tracing::info!(human = %ctx.character.human_name, input = %input, "user input");

    let manager = &mut guard.manager;
    let mut deltas = ctx.agent.chat(input).await?;
    let mut segmenter = SentenceSegmenter::new();
    let mut full_response = String::new();

    while let Some(delta) = deltas.next().await {
        let delta = delta?;
        full_response.push_str(&delta);
        for sentence in segmenter.push(&delta) {
            manager.speak(ctx.segment(&sentence)).await?;
        }
    }
    if let Some(rest) = segmenter.finish() {
        manager.speak(ctx.segment(&rest)).await?;
    }

    if manager.admitted() > 0 {
        manager.drain().await?;
        // all-silent turns never touched the backend
        if manager.dispatched() > 0 {
            TurnSignal::BackendSynthComplete.send(transport).await?;
        }
    }

    TurnSignal::ForceNewMessage.send(transport).await?;
    TurnSignal::control("conversation-chain-end").send(transport).await?;

    tracing::info!(
        turn = %guard.turn_id,
        segments = manager.admitted(),
        response = %full_response,
        "AI response"
    );
    Ok(full_response)
}
