//! Nari/Dia FastAPI TTS client

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::{AudioArtifact, CacheFile, FileSynthesizer, cache_file_path};
use crate::config::DiaConfig;
use crate::{Error, Result};

/// Request body for the Dia `/tts` endpoint
///
/// Generation parameters are only sent when configured so the server keeps
/// its own defaults otherwise.
#[derive(Debug, Serialize)]
struct DiaRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cfg_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cfg_filter_top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

/// Dia FastAPI speech synthesis client
pub struct DiaTts {
    client: reqwest::Client,
    config: DiaConfig,
    cache_dir: PathBuf,
}

impl DiaTts {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if `server_url` is empty or the HTTP client cannot be built
    pub fn new(config: &DiaConfig, cache_dir: PathBuf, timeout: Duration) -> Result<Self> {
        if config.server_url.trim().is_empty() {
            return Err(Error::Config("Dia server_url is required".to_string()));
        }

        tracing::info!(
            url = %config.server_url,
            prompt_id = config.prompt_id.as_deref().unwrap_or("server default"),
            "configured Dia TTS"
        );

        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            config: config.clone(),
            cache_dir,
        })
    }

    fn request_body<'a>(&'a self, text: &'a str) -> DiaRequest<'a> {
        DiaRequest {
            text,
            prompt_id: self.config.prompt_id.as_deref(),
            max_new_tokens: self.config.max_new_tokens,
            cfg_scale: self.config.cfg_scale,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            cfg_filter_top_k: self.config.cfg_filter_top_k,
            speed_factor: self.config.speed_factor,
            seed: self.config.seed,
        }
    }
}

#[async_trait]
impl FileSynthesizer for DiaTts {
    fn name(&self) -> &'static str {
        "dia"
    }

    async fn synthesize(&self, text: &str, file_stem: &str) -> Result<AudioArtifact> {
        if text.is_empty() {
            return Err(Error::Tts("refusing to synthesize empty text".to_string()));
        }

        let body = self.request_body(text);
        tracing::debug!(payload = ?body, "sending Dia request");

        let response = self
            .client
            .post(&self.config.server_url)
            .header("Accept", "audio/wav")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&detail)
                .ok()
                .and_then(|v| v.get("detail").map(ToString::to_string))
                .unwrap_or(detail);
            return Err(Error::Tts(format!("Dia server error {status}: {detail}")));
        }

        let file = CacheFile::new(cache_file_path(&self.cache_dir, file_stem, "wav")?);
        let mut out = tokio::fs::File::create(file.path()).await?;
        let mut body = response.bytes_stream();
        let mut written = 0_usize;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len();
        }
        out.flush().await?;

        if written == 0 {
            return Err(Error::Tts("Dia server returned an empty body".to_string()));
        }

        tracing::debug!(bytes = written, path = %file.path().display(), "saved Dia audio");
        Ok(AudioArtifact::new(file.persist()))
    }
}
