//! OpenAI-compatible `/v1/audio/speech` client
//!
//! Works against AllTalk, OpenAI and any server exposing the same request
//! shape. The response body is either saved to a cache file or forwarded as
//! it arrives, one network chunk per fragment.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::{AudioArtifact, CacheFile, FileSynthesizer, FragmentStream, StreamSynthesizer, cache_file_path};
use crate::config::OpenAiCompatConfig;
use crate::{Error, Result};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
    speed: f64,
}

/// OpenAI-compatible speech synthesis client
pub struct OpenAiCompatTts {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    response_format: String,
    speed: f64,
    cache_dir: PathBuf,
    stream: bool,
}

impl OpenAiCompatTts {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URL is empty or the HTTP client cannot be built
    pub fn new(
        config: &OpenAiCompatConfig,
        cache_dir: PathBuf,
        timeout: Duration,
        stream: bool,
    ) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            return Err(Error::Config("TTS api_url must not be empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        tracing::info!(
            url = %config.api_url,
            voice = %config.voice,
            format = %config.response_format,
            "configured OpenAI-compatible TTS"
        );

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            response_format: config.response_format.clone(),
            speed: config.speed,
            cache_dir,
            stream,
        })
    }

    async fn request(&self, text: &str) -> Result<reqwest::Response> {
        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: &self.response_format,
            speed: self.speed,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("speech endpoint error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl FileSynthesizer for OpenAiCompatTts {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    async fn synthesize(&self, text: &str, file_stem: &str) -> Result<AudioArtifact> {
        tracing::debug!(text = %text, "requesting speech");
        let response = self.request(text).await?;

        let file = CacheFile::new(cache_file_path(
            &self.cache_dir,
            file_stem,
            &self.response_format,
        )?);
        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("speech endpoint returned an empty body".to_string()));
        }

        let mut out = tokio::fs::File::create(file.path()).await?;
        out.write_all(&audio).await?;
        out.flush().await?;

        Ok(AudioArtifact::new(file.persist()))
    }
}

#[async_trait]
impl StreamSynthesizer for OpenAiCompatTts {
    async fn synthesize_stream(&self, text: &str) -> Result<FragmentStream> {
        tracing::debug!(text = %text, "requesting streamed speech");
        let response = self.request(text).await?;

        Ok(response
            .bytes_stream()
            .filter(|chunk| futures::future::ready(chunk.as_ref().map_or(true, |b| !b.is_empty())))
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from))
            .boxed())
    }

    fn prefers_streaming(&self) -> bool {
        self.stream
    }
}
