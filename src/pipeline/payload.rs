//! Transport-ready audio messages

use std::path::Path;

use base64::Engine as _;
use serde::Serialize;

use super::segment::{Actions, DisplayText, Segment};
use super::sequencer::{Position, Slot};
use crate::audio::{self, DEFAULT_SLICE_MS};
use crate::Result;

/// Message type as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadType {
    /// A complete utterance (or a silent caption)
    #[serde(rename = "audio")]
    Audio,
    /// One streamed fragment, or the end-of-stream marker
    #[serde(rename = "tts-audio-chunk")]
    AudioChunk,
}

/// What kind of payload a builder is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Whole,
    Fragment,
    EndOfStream,
}

/// Audio handed to a builder
#[derive(Debug, Clone, Copy)]
pub enum AudioInput<'a> {
    /// A synthesized artifact on disk
    File(&'a Path),
    /// Raw encoded bytes of one streamed fragment
    Fragment(&'a [u8]),
}

/// Audio plus display/animation metadata, tagged with its delivery slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub kind: PayloadType,
    /// Base64 audio; `None` for silence, empty for an end-of-stream marker
    pub audio: Option<String>,
    /// Normalized loudness per slice, for lip sync
    pub volumes: Vec<f32>,
    /// Slice length of `volumes` in milliseconds
    pub slice_length: u32,
    pub display_text: DisplayText,
    pub actions: Option<Actions>,
    pub forwarded: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub eos: bool,
    pub position: Position,
    pub fragment: u32,
}

impl Payload {
    /// A caption with no audio
    #[must_use]
    pub fn silent(segment: &Segment) -> Self {
        Self {
            kind: PayloadType::Audio,
            audio: None,
            volumes: Vec::new(),
            slice_length: DEFAULT_SLICE_MS,
            display_text: segment.display.clone(),
            actions: segment.actions.clone(),
            forwarded: false,
            eos: false,
            position: 0,
            fragment: 0,
        }
    }

    /// Record the slot this payload is delivered at
    #[must_use]
    pub fn at(mut self, slot: Slot) -> Self {
        self.position = slot.position;
        self.fragment = slot.fragment;
        self
    }

    /// True for a payload that carries no audio at all
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        self.audio.is_none()
    }
}

/// Builds payloads from synthesized audio
pub trait PayloadBuilder: Send + Sync {
    /// Build a payload for `segment`
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be decoded
    fn build(&self, audio: Option<AudioInput<'_>>, segment: &Segment, kind: PayloadKind)
    -> Result<Payload>;
}

/// Default builder: re-encodes artifacts to WAV and computes a volume envelope
#[derive(Debug, Clone, Copy)]
pub struct AudioPayloadBuilder {
    slice_ms: u32,
}

impl Default for AudioPayloadBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SLICE_MS)
    }
}

impl AudioPayloadBuilder {
    #[must_use]
    pub const fn new(slice_ms: u32) -> Self {
        Self { slice_ms }
    }
}

impl PayloadBuilder for AudioPayloadBuilder {
    fn build(
        &self,
        audio: Option<AudioInput<'_>>,
        segment: &Segment,
        kind: PayloadKind,
    ) -> Result<Payload> {
        let mut payload = Payload::silent(segment);
        payload.slice_length = self.slice_ms;

        match (kind, audio) {
            (PayloadKind::EndOfStream, _) => {
                payload.kind = PayloadType::AudioChunk;
                payload.audio = Some(String::new());
                payload.eos = true;
            }
            (PayloadKind::Fragment, audio) => {
                payload.kind = PayloadType::AudioChunk;
                payload.forwarded = true;
                payload.audio = match audio {
                    Some(AudioInput::Fragment(bytes)) => Some(encode(bytes)),
                    Some(AudioInput::File(path)) => Some(encode(&std::fs::read(path)?)),
                    None => None,
                };
            }
            (PayloadKind::Whole, None) => {}
            (PayloadKind::Whole, Some(input)) => {
                let decoded = match input {
                    AudioInput::File(path) => audio::decode_file(path)?,
                    AudioInput::Fragment(bytes) => audio::decode_bytes(bytes)?,
                };
                payload.volumes =
                    audio::volume_envelope(&decoded.samples, decoded.sample_rate, self.slice_ms)?;
                let wav = audio::samples_to_wav(&decoded.samples, decoded.sample_rate)?;
                payload.audio = Some(encode(&wav));
            }
        }

        Ok(payload)
    }
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
