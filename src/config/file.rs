//! TOML configuration file loading
//!
//! Supports `~/.config/companion/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CompanionConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Character shown to the user
    #[serde(default)]
    pub character: CharacterFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Interface to bind
    pub host: Option<String>,

    /// WebSocket server port
    pub port: Option<u16>,
}

/// Character presentation
#[derive(Debug, Default, Deserialize)]
pub struct CharacterFileConfig {
    pub name: Option<String>,
    pub human_name: Option<String>,
    pub avatar: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Provider: "alltalk", "openai_compat" or "dia"
    pub provider: Option<String>,

    /// Stream audio fragments instead of whole files
    pub stream: Option<bool>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Directory for temporary audio files
    pub cache_dir: Option<String>,

    #[serde(default)]
    pub openai_compat: OpenAiCompatFileConfig,

    #[serde(default)]
    pub dia: DiaFileConfig,
}

/// OpenAI-compatible speech endpoint (AllTalk, OpenAI)
#[derive(Debug, Default, Deserialize)]
pub struct OpenAiCompatFileConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub response_format: Option<String>,
    pub speed: Option<f64>,
}

/// Dia FastAPI endpoint
#[derive(Debug, Default, Deserialize)]
pub struct DiaFileConfig {
    pub server_url: Option<String>,
    pub prompt_id: Option<String>,
    pub max_new_tokens: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub cfg_filter_top_k: Option<u32>,
    pub speed_factor: Option<f64>,
    pub seed: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CompanionConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CompanionConfigFile {
    let Some(path) = config_file_path() else {
        return CompanionConfigFile::default();
    };

    if !path.exists() {
        return CompanionConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            CompanionConfigFile::default()
        }
    }
}

/// Read and parse a specific config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> crate::Result<CompanionConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/companion/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("companion").join("config.toml"))
}
