//! Configuration management for the companion backend
//!
//! Precedence is env > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Default interface to bind
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default WebSocket server port
pub const DEFAULT_PORT: u16 = 12393;

/// Default per-request TTS timeout
pub const DEFAULT_TTS_TIMEOUT: Duration = Duration::from_secs(120);

/// Companion backend configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Character presentation
    pub character: CharacterConfig,

    /// Speech synthesis configuration
    pub tts: TtsConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

/// How the character is presented on captions
#[derive(Debug, Clone)]
pub struct CharacterConfig {
    /// Character name shown with each caption
    pub name: String,

    /// Name used for the human side of the conversation
    pub human_name: String,

    /// Avatar image reference forwarded to the client
    pub avatar: Option<String>,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            name: "Mao".to_string(),
            human_name: "Human".to_string(),
            avatar: None,
        }
    }
}

/// Which TTS engine to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// OpenAI-compatible `/v1/audio/speech` (AllTalk, OpenAI)
    #[default]
    OpenAiCompat,
    /// Nari/Dia FastAPI server
    Dia,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alltalk" | "openai" | "openai_compat" | "openai-compat" => Ok(Self::OpenAiCompat),
            "dia" => Ok(Self::Dia),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Selected engine
    pub provider: TtsProvider,

    /// Stream fragments to the client as they are synthesized
    pub stream: bool,

    /// Timeout applied to every outbound TTS request
    pub timeout: Duration,

    /// Directory for temporary audio files
    pub cache_dir: PathBuf,

    /// OpenAI-compatible engine settings
    pub openai_compat: OpenAiCompatConfig,

    /// Dia engine settings
    pub dia: DiaConfig,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::default(),
            stream: false,
            timeout: DEFAULT_TTS_TIMEOUT,
            cache_dir: default_cache_dir(),
            openai_compat: OpenAiCompatConfig::default(),
            dia: DiaConfig::default(),
        }
    }
}

/// OpenAI-compatible speech endpoint settings
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// Full URL of the speech endpoint
    pub api_url: String,

    /// Bearer token, if the server requires one
    pub api_key: Option<String>,

    /// Model name (AllTalk requires one but ignores it)
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Audio container requested from the server (also the cache file extension)
    pub response_format: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f64,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:7851/v1/audio/speech".to_string(),
            api_key: None,
            model: "ignored".to_string(),
            voice: "nova".to_string(),
            response_format: "wav".to_string(),
            speed: 1.0,
        }
    }
}

/// Dia FastAPI settings; unset generation parameters use server defaults
#[derive(Debug, Clone, Default)]
pub struct DiaConfig {
    pub server_url: String,
    pub prompt_id: Option<String>,
    pub max_new_tokens: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub cfg_filter_top_k: Option<u32>,
    pub speed_factor: Option<f64>,
    pub seed: Option<u64>,
}

/// Default audio cache directory: `~/.cache/companion/audio` on Linux
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("cache"),
        |d| d.cache_dir().join("companion").join("audio"),
    )
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error on an unknown provider, out-of-range speed or zero timeout
    pub fn from_sources(
        fc: file::CompanionConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let host = env("COMPANION_HOST")
            .or(fc.server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = env("COMPANION_PORT")
            .and_then(|s| s.parse().ok())
            .or(fc.server.port)
            .unwrap_or(DEFAULT_PORT);

        let defaults = CharacterConfig::default();
        let character = CharacterConfig {
            name: fc.character.name.unwrap_or(defaults.name),
            human_name: fc.character.human_name.unwrap_or(defaults.human_name),
            avatar: fc.character.avatar,
        };

        let provider = match env("COMPANION_TTS_PROVIDER").or(fc.tts.provider) {
            Some(name) => name.parse()?,
            None => TtsProvider::default(),
        };

        let stream = env("COMPANION_TTS_STREAM")
            .and_then(|s| parse_bool(&s))
            .or(fc.tts.stream)
            .unwrap_or(false);

        let timeout = fc
            .tts
            .timeout_secs
            .map_or(DEFAULT_TTS_TIMEOUT, Duration::from_secs);
        if timeout.is_zero() {
            return Err(Error::Config("tts.timeout_secs must be positive".to_string()));
        }

        let cache_dir = env("COMPANION_CACHE_DIR")
            .or(fc.tts.cache_dir)
            .map_or_else(default_cache_dir, PathBuf::from);

        let oa_defaults = OpenAiCompatConfig::default();
        let oa = fc.tts.openai_compat;
        let openai_compat = OpenAiCompatConfig {
            api_url: env("COMPANION_TTS_URL")
                .filter(|_| provider == TtsProvider::OpenAiCompat)
                .or(oa.api_url)
                .unwrap_or(oa_defaults.api_url),
            api_key: env("COMPANION_TTS_API_KEY").or(oa.api_key),
            model: oa.model.unwrap_or(oa_defaults.model),
            voice: oa.voice.unwrap_or(oa_defaults.voice),
            response_format: oa.response_format.unwrap_or(oa_defaults.response_format),
            speed: oa.speed.unwrap_or(oa_defaults.speed),
        };
        if !(0.25..=4.0).contains(&openai_compat.speed) {
            return Err(Error::Config(format!(
                "tts speed {} out of range 0.25..=4.0",
                openai_compat.speed
            )));
        }

        let dia_file = fc.tts.dia;
        let dia = DiaConfig {
            server_url: env("COMPANION_TTS_URL")
                .filter(|_| provider == TtsProvider::Dia)
                .or(dia_file.server_url)
                .unwrap_or_default(),
            prompt_id: dia_file.prompt_id,
            max_new_tokens: dia_file.max_new_tokens,
            cfg_scale: dia_file.cfg_scale,
            temperature: dia_file.temperature,
            top_p: dia_file.top_p,
            cfg_filter_top_k: dia_file.cfg_filter_top_k,
            speed_factor: dia_file.speed_factor,
            seed: dia_file.seed,
        };
        if provider == TtsProvider::Dia && dia.server_url.is_empty() {
            return Err(Error::Config(
                "tts.dia.server_url is required for the dia provider".to_string(),
            ));
        }

        Ok(Self {
            server: ServerConfig { host, port },
            character,
            tts: TtsConfig {
                provider,
                stream,
                timeout,
                cache_dir,
                openai_compat,
                dia,
            },
        })
    }
}
