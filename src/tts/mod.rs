//! Text-to-speech backends
//!
//! Backends come in two capability flavours. Every backend can render a whole
//! utterance to a cached audio file ([`FileSynthesizer`]); some can also emit
//! audio incrementally as a stream of fragments ([`StreamSynthesizer`]).
//! [`SynthesisBackend`] carries which of the two a configured engine offers so
//! the delivery pipeline can pick a mode without probing at runtime.

mod cache;
pub mod dia;
pub mod openai_compat;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use cache::{CacheFile, cache_file_path, cache_file_stem, remove_cached};
pub use dia::DiaTts;
pub use openai_compat::OpenAiCompatTts;

use crate::config::{TtsConfig, TtsProvider};
use crate::Result;

/// A synthesized audio file owned by whoever holds it until released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub path: PathBuf,
}

impl AudioArtifact {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lazy, finite sequence of encoded audio fragments
pub type FragmentStream = BoxStream<'static, Result<Vec<u8>>>;

/// Renders a whole utterance to a file
#[async_trait]
pub trait FileSynthesizer: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &'static str;

    /// Synthesize `text` into a new cache file named after `file_stem`
    ///
    /// # Errors
    ///
    /// Returns error on timeout, connection failure, non-success status or an
    /// empty response. No file is left behind on error.
    async fn synthesize(&self, text: &str, file_stem: &str) -> Result<AudioArtifact>;

    /// Delete an artifact previously returned by [`synthesize`](Self::synthesize)
    fn release(&self, artifact: &AudioArtifact) {
        remove_cached(artifact.path());
    }
}

/// Additionally renders an utterance as incremental fragments
#[async_trait]
pub trait StreamSynthesizer: FileSynthesizer {
    /// Start synthesis and return the fragment stream
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn synthesize_stream(&self, text: &str) -> Result<FragmentStream>;

    /// Whether the engine itself asks for streaming delivery
    fn prefers_streaming(&self) -> bool {
        false
    }
}

/// A configured engine and the delivery capability it advertises
#[derive(Clone)]
pub enum SynthesisBackend {
    WholeFile(Arc<dyn FileSynthesizer>),
    Streaming(Arc<dyn StreamSynthesizer>),
}

impl SynthesisBackend {
    /// Engine name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WholeFile(engine) => engine.name(),
            Self::Streaming(engine) => engine.name(),
        }
    }

    /// Whether fragments should be streamed given the manager-level toggle
    #[must_use]
    pub fn streams(&self, manager_stream: bool) -> bool {
        match self {
            Self::WholeFile(_) => false,
            Self::Streaming(engine) => manager_stream || engine.prefers_streaming(),
        }
    }

    /// Whole-file synthesis, available on every backend
    ///
    /// # Errors
    ///
    /// Propagates the engine's synthesis error
    pub async fn synthesize(&self, text: &str, file_stem: &str) -> Result<AudioArtifact> {
        match self {
            Self::WholeFile(engine) => engine.synthesize(text, file_stem).await,
            Self::Streaming(engine) => engine.synthesize(text, file_stem).await,
        }
    }

    /// Release an artifact through the engine that produced it
    pub fn release(&self, artifact: &AudioArtifact) {
        match self {
            Self::WholeFile(engine) => engine.release(artifact),
            Self::Streaming(engine) => engine.release(artifact),
        }
    }
}

impl std::fmt::Debug for SynthesisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::WholeFile(_) => "WholeFile",
            Self::Streaming(_) => "Streaming",
        };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}

/// Build the configured backend
///
/// # Errors
///
/// Returns error if the provider configuration is invalid
pub fn build_backend(config: &TtsConfig) -> Result<SynthesisBackend> {
    let backend = match config.provider {
        TtsProvider::OpenAiCompat => SynthesisBackend::Streaming(Arc::new(OpenAiCompatTts::new(
            &config.openai_compat,
            config.cache_dir.clone(),
            config.timeout,
            config.stream,
        )?)),
        TtsProvider::Dia => SynthesisBackend::WholeFile(Arc::new(DiaTts::new(
            &config.dia,
            config.cache_dir.clone(),
            config.timeout,
        )?)),
    };

    tracing::info!(backend = ?backend, "TTS backend ready");
    Ok(backend)
}
