//! Configuration for the voice bridge
//!
//! Configuration comes from a YAML file, environment variables and `.env`
//! values. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_bridge::config::BridgeConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Environment variables only
//! let config = BridgeConfig::from_env()?;
//!
//! // YAML file with environment variables as the base
//! let config = BridgeConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Signaling against {}", config.signaling_url);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::openai::{
    DEFAULT_SYNTHESIS_INSTRUCTIONS, DEFAULT_TRANSCRIPTION_MODEL, OPENAI_CONTROL_CHANNEL_LABEL,
    OPENAI_REALTIME_SIGNALING_URL, OpenAIRealtimeModel,
};

pub const DEFAULT_CREDENTIAL_URL: &str = "http://localhost:3000/api/realtime/token";
pub const DEFAULT_CHAT_URL: &str = "http://localhost:3000/api/chat";
pub const DEFAULT_CREDENTIAL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SIGNALING_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 60_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Bridge configuration
///
/// Contains everything needed to run a voice session:
/// - Collaborator endpoints (credential, signaling, chat)
/// - Realtime session settings (model, voice, transcription, ICE)
/// - Request context forwarded to the chat backend
/// - Timeouts for every suspension point with a network round trip
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    // Endpoints
    pub credential_url: String,
    pub signaling_url: String,
    pub chat_url: String,

    // Realtime session
    pub model: String,
    pub voice: Option<String>,
    pub transcription_model: String,
    pub instructions: Option<String>,
    pub control_channel_label: String,
    pub synthesis_instructions: String,
    pub ice_servers: Vec<String>,

    // Chat request context
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,

    // Timeouts
    pub credential_timeout: Duration,
    pub signaling_timeout: Duration,
    pub backend_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            credential_url: DEFAULT_CREDENTIAL_URL.to_string(),
            signaling_url: OPENAI_REALTIME_SIGNALING_URL.to_string(),
            chat_url: DEFAULT_CHAT_URL.to_string(),
            model: OpenAIRealtimeModel::default().as_str().to_string(),
            voice: None,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            instructions: None,
            control_channel_label: OPENAI_CONTROL_CHANNEL_LABEL.to_string(),
            synthesis_instructions: DEFAULT_SYNTHESIS_INSTRUCTIONS.to_string(),
            ice_servers: Vec::new(),
            user_id: None,
            conversation_id: None,
            credential_timeout: Duration::from_millis(DEFAULT_CREDENTIAL_TIMEOUT_MS),
            signaling_timeout: Duration::from_millis(DEFAULT_SIGNALING_TIMEOUT_MS),
            backend_timeout: Duration::from_millis(DEFAULT_BACKEND_TIMEOUT_MS),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// `.env` values are expected to be loaded into the environment by the
    /// binary at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load(Self::default())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variables as
    /// the base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load(Self::default())?;
        yaml_config.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Check endpoint URLs, timeouts, the channel label, model and voice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_http_url("credential_url", &self.credential_url)?;
        validation::validate_http_url("signaling_url", &self.signaling_url)?;
        validation::validate_http_url("chat_url", &self.chat_url)?;
        validation::validate_timeout("credential_timeout", self.credential_timeout)?;
        validation::validate_timeout("signaling_timeout", self.signaling_timeout)?;
        validation::validate_timeout("backend_timeout", self.backend_timeout)?;
        validation::validate_non_empty("control_channel_label", &self.control_channel_label)?;
        validation::validate_non_empty("transcription_model", &self.transcription_model)?;
        validation::validate_model("model", &self.model)?;
        if let Some(voice) = &self.voice {
            validation::validate_voice("voice", voice)?;
        }
        Ok(())
    }
}
