//! Companion Voice - ordered streaming speech for a chat companion
//!
//! This library provides the backend that turns a language model's streamed
//! reply into spoken, captioned output on a connected client:
//! - Sentence segmentation of streamed text
//! - Concurrent speech synthesis against pluggable TTS engines
//! - In-order delivery of audio payloads, whole-file or fragment-streamed
//! - Turn control with interrupt-safe cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Client (WebSocket)                    │
//! │   text-input  │  interrupt-signal  │  audio frames  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Conversation turn                      │
//! │   Agent  │  Segmenter  │  TtsTaskManager            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                TTS engines                          │
//! │   OpenAI-compatible (AllTalk)  │  Dia               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod pipeline;
pub mod tts;

pub use config::Config;
pub use conversation::{Agent, ConversationContext, EchoAgent, TurnSignal, run_turn};
pub use error::{Error, Result};
pub use pipeline::{
    AudioPayloadBuilder, ManagerConfig, Payload, PayloadBuilder, Segment, Transport,
    TtsTaskManager,
};
pub use tts::{FileSynthesizer, StreamSynthesizer, SynthesisBackend, build_backend};
