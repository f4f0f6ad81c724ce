//! Shared test utilities

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use companion_voice::audio::samples_to_wav;
use companion_voice::pipeline::{AudioPayloadBuilder, ManagerConfig, Transport, TtsTaskManager};
use companion_voice::tts::{
    AudioArtifact, CacheFile, FileSynthesizer, FragmentStream, StreamSynthesizer,
    SynthesisBackend, cache_file_path, remove_cached,
};
use companion_voice::{Error, Result};

pub const SAMPLE_RATE: u32 = 16_000;

/// 50ms of a quiet sine tone encoded as WAV
pub fn tone_wav() -> Vec<u8> {
    let samples: Vec<f32> = (0..SAMPLE_RATE / 20)
        .map(|i| 0.3 * (i as f32 * 0.05).sin())
        .collect();
    samples_to_wav(&samples, SAMPLE_RATE).expect("failed to encode tone")
}

/// Scriptable engine that writes real WAV files into a temp directory
///
/// Files are written before the simulated latency, so a task aborted while
/// "synthesizing" exercises the same cleanup path as a real request.
pub struct FakeTts {
    dir: PathBuf,
    latency: HashMap<String, Duration>,
    failing: HashSet<String>,
    fragments: HashMap<String, usize>,
    fail_after: HashMap<String, usize>,
    prefers_streaming: bool,
    calls: AtomicUsize,
    released: AtomicUsize,
}

impl FakeTts {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            latency: HashMap::new(),
            failing: HashSet::new(),
            fragments: HashMap::new(),
            fail_after: HashMap::new(),
            prefers_streaming: false,
            calls: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, text: &str, millis: u64) -> Self {
        self.latency
            .insert(text.to_string(), Duration::from_millis(millis));
        self
    }

    pub fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// Number of fragments streamed for `text` (default 1)
    pub fn with_fragments(mut self, text: &str, count: usize) -> Self {
        self.fragments.insert(text.to_string(), count);
        self
    }

    /// Stream `count` fragments for `text`, then an error
    pub fn failing_after(mut self, text: &str, count: usize) -> Self {
        self.fail_after.insert(text.to_string(), count);
        self
    }

    pub fn preferring_streaming(mut self) -> Self {
        self.prefers_streaming = true;
        self
    }

    /// Backend calls made so far, streamed or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Audio files still present in the cache directory
    pub fn files_left(&self) -> usize {
        std::fs::read_dir(&self.dir).map_or(0, |entries| entries.count())
    }

    async fn simulate(&self, text: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.latency.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(text) {
            return Err(Error::Tts(format!("scripted failure for {text:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl FileSynthesizer for FakeTts {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn synthesize(&self, text: &str, file_stem: &str) -> Result<AudioArtifact> {
        let file = CacheFile::new(cache_file_path(&self.dir, file_stem, "wav")?);
        std::fs::write(file.path(), tone_wav())?;
        self.simulate(text).await?;
        Ok(AudioArtifact::new(file.persist()))
    }

    fn release(&self, artifact: &AudioArtifact) {
        self.released.fetch_add(1, Ordering::SeqCst);
        remove_cached(artifact.path());
    }
}

#[async_trait]
impl StreamSynthesizer for FakeTts {
    async fn synthesize_stream(&self, text: &str) -> Result<FragmentStream> {
        self.simulate(text).await?;

        let mut chunks: Vec<Result<Vec<u8>>> = Vec::new();
        if let Some(&good) = self.fail_after.get(text) {
            chunks.extend((0..good).map(|i| Ok(vec![i as u8; 8])));
            chunks.push(Err(Error::Tts("stream dropped".to_string())));
        } else {
            let count = self.fragments.get(text).copied().unwrap_or(1);
            chunks.extend((0..count).map(|i| Ok(vec![i as u8; 8])));
        }

        Ok(stream::iter(chunks)
            .then(|chunk| async move {
                tokio::task::yield_now().await;
                chunk
            })
            .boxed())
    }

    fn prefers_streaming(&self) -> bool {
        self.prefers_streaming
    }
}

/// Transport that records every frame as JSON
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<serde_json::Value>>,
    fail_after: Option<usize>,
    fail_next: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept `count` frames, then fail every send
    pub fn failing_after(count: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after: Some(count),
            ..Self::default()
        })
    }

    /// Fail the first send only, then accept everything
    pub fn failing_once() -> Arc<Self> {
        Arc::new(Self {
            fail_next: AtomicBool::new(true),
            ..Self::default()
        })
    }

    /// Sends attempted, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<serde_json::Value> {
        self.frames.lock().unwrap().clone()
    }

    /// Audio payloads only, in delivery order
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.frames()
            .into_iter()
            .filter(|f| matches!(f["type"].as_str(), Some("audio" | "tts-audio-chunk")))
            .collect()
    }

    /// `(position, fragment)` of every payload, in delivery order
    pub fn slots(&self) -> Vec<(u64, u64)> {
        self.payloads()
            .iter()
            .map(|p| {
                (
                    p["position"].as_u64().unwrap(),
                    p["fragment"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    /// Caption text of every payload, in delivery order
    pub fn captions(&self) -> Vec<String> {
        self.payloads()
            .iter()
            .map(|p| p["display_text"]["text"].as_str().unwrap().to_string())
            .collect()
    }

    /// Frame `type` (plus `text` for control frames), in delivery order
    pub fn kinds(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| {
                let kind = f["type"].as_str().unwrap_or_default();
                match f["text"].as_str() {
                    Some(text) if kind == "control" => format!("control:{text}"),
                    _ => kind.to_string(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Transport("connection reset".to_string()));
        }
        let mut frames = self.frames.lock().unwrap();
        if self.fail_after.is_some_and(|limit| frames.len() >= limit) {
            return Err(Error::Transport("client went away".to_string()));
        }
        frames.push(serde_json::from_str(&message)?);
        Ok(())
    }
}

pub fn whole_file(engine: &Arc<FakeTts>) -> SynthesisBackend {
    SynthesisBackend::WholeFile(Arc::clone(engine) as Arc<dyn FileSynthesizer>)
}

pub fn streaming(engine: &Arc<FakeTts>) -> SynthesisBackend {
    SynthesisBackend::Streaming(Arc::clone(engine) as Arc<dyn StreamSynthesizer>)
}

pub fn manager(
    backend: SynthesisBackend,
    transport: &Arc<RecordingTransport>,
    stream: bool,
) -> TtsTaskManager {
    TtsTaskManager::new(
        backend,
        Arc::new(AudioPayloadBuilder::default()),
        Arc::clone(transport) as Arc<dyn Transport>,
        ManagerConfig { stream },
    )
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
