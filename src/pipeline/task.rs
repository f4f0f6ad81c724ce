//! One segment's synthesis, from backend call to queued payload(s)
//!
//! A task never fails outward: every backend or decode error degrades to a
//! silent payload at the segment's own position so delivery keeps moving.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;

use super::payload::{AudioInput, Payload, PayloadBuilder, PayloadKind};
use super::segment::Segment;
use super::sender::{QueueSender, Queued};
use super::sequencer::{Position, Slot};
use crate::tts::{AudioArtifact, StreamSynthesizer, SynthesisBackend, cache_file_stem};
use crate::{Error, Result};

/// Everything a synthesis task needs, moved into the spawned future
pub struct SynthesisJob {
    pub segment: Segment,
    pub position: Position,
    pub backend: SynthesisBackend,
    pub builder: Arc<dyn PayloadBuilder>,
    pub queue: QueueSender,
    pub stream: bool,
}

/// Releases an artifact when dropped, including when the task is aborted
struct ArtifactGuard {
    backend: SynthesisBackend,
    artifact: AudioArtifact,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.backend.release(&self.artifact);
    }
}

impl SynthesisJob {
    /// Drive the segment to completion
    pub async fn run(self) {
        match &self.backend {
            SynthesisBackend::Streaming(engine) if self.backend.streams(self.stream) => {
                let engine = Arc::clone(engine);
                self.run_streaming(engine.as_ref()).await;
            }
            _ => self.run_whole_file().await,
        }
    }

    async fn run_whole_file(&self) {
        let stem = cache_file_stem();
        tracing::debug!(
            position = self.position,
            text = %self.segment.tts_text,
            "generating audio"
        );

        match self.backend.synthesize(&self.segment.tts_text, &stem).await {
            Ok(artifact) => {
                let guard = ArtifactGuard {
                    backend: self.backend.clone(),
                    artifact,
                };
                let payload = self
                    .build_from_file(guard.artifact.path.clone())
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(
                            position = self.position,
                            error = %e,
                            "failed to prepare audio payload, sending silent"
                        );
                        Payload::silent(&self.segment)
                    });
                self.enqueue(Slot::whole(self.position), payload);
                drop(guard);
            }
            Err(e) => {
                tracing::error!(
                    position = self.position,
                    backend = self.backend.name(),
                    error = %e,
                    "speech synthesis failed, sending silent"
                );
                self.enqueue(Slot::whole(self.position), Payload::silent(&self.segment));
            }
        }
    }

    /// Decode, analyse and re-encode an artifact on the blocking pool
    async fn build_from_file(&self, path: PathBuf) -> Result<Payload> {
        let builder = Arc::clone(&self.builder);
        let segment = self.segment.clone();
        tokio::task::spawn_blocking(move || {
            builder.build(Some(AudioInput::File(&path)), &segment, PayloadKind::Whole)
        })
        .await
        .map_err(|e| Error::Audio(format!("payload build did not finish: {e}")))?
    }

    async fn run_streaming(&self, engine: &dyn StreamSynthesizer) {
        let mut fragments = match engine.synthesize_stream(&self.segment.tts_text).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    position = self.position,
                    backend = engine.name(),
                    error = %e,
                    "streamed synthesis failed to start, sending silent"
                );
                self.enqueue(Slot::whole(self.position), Payload::silent(&self.segment));
                return;
            }
        };

        let mut index = 0_u32;
        while let Some(chunk) = fragments.next().await {
            let built = chunk.and_then(|bytes| {
                self.builder.build(
                    Some(AudioInput::Fragment(&bytes)),
                    &self.segment,
                    PayloadKind::Fragment,
                )
            });

            match built {
                Ok(payload) => {
                    self.enqueue(Slot::fragment(self.position, index), payload);
                    index += 1;
                }
                Err(e) if index == 0 => {
                    tracing::error!(
                        position = self.position,
                        error = %e,
                        "streamed synthesis failed before any audio, sending silent"
                    );
                    self.enqueue(Slot::whole(self.position), Payload::silent(&self.segment));
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        position = self.position,
                        fragments = index,
                        error = %e,
                        "streamed synthesis cut short"
                    );
                    break;
                }
            }
        }

        let eos = self
            .builder
            .build(None, &self.segment, PayloadKind::EndOfStream)
            .unwrap_or_else(|_| {
                let mut marker = Payload::silent(&self.segment);
                marker.eos = true;
                marker
            });
        self.enqueue(Slot::end_of_stream(self.position, index), eos);
        tracing::debug!(position = self.position, fragments = index, "stream complete");
    }

    fn enqueue(&self, slot: Slot, payload: Payload) {
        if self.queue.send(Queued::new(slot, payload)).is_err() {
            tracing::debug!(slot = %slot, "sender gone, dropping payload");
        }
    }
}
