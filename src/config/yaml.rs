use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::{BridgeConfig, ConfigError};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything left
/// out keeps its environment or default value.
///
/// # Example YAML structure
/// ```yaml
/// endpoints:
///   credential_url: "http://localhost:3000/api/realtime/token"
///   signaling_url: "https://api.openai.com/v1/realtime"
///   chat_url: "http://localhost:3000/api/chat"
///
/// realtime:
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "alloy"
///   transcription_model: "whisper-1"
///   instructions: "Keep answers short."
///   control_channel_label: "oai-events"
///   synthesis_instructions: "Please generate audio for the last assistant message."
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///
/// chat:
///   user_id: "user-123"
///   conversation_id: "conv-456"
///
/// timeouts:
///   credential_ms: 10000
///   signaling_ms: 15000
///   backend_ms: 60000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub endpoints: Option<EndpointsYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub chat: Option<ChatYaml>,
    pub timeouts: Option<TimeoutsYaml>,
}

/// Collaborator endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsYaml {
    pub credential_url: Option<String>,
    pub signaling_url: Option<String>,
    pub chat_url: Option<String>,
}

/// Realtime session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub transcription_model: Option<String>,
    pub instructions: Option<String>,
    pub control_channel_label: Option<String>,
    pub synthesis_instructions: Option<String>,
    pub ice_servers: Option<Vec<String>>,
}

/// Chat request context from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChatYaml {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Timeouts in milliseconds from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    pub credential_ms: Option<u64>,
    pub signaling_ms: Option<u64>,
    pub backend_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Override `config` with every value present in this file.
    pub fn apply(self, config: &mut BridgeConfig) {
        if let Some(endpoints) = self.endpoints {
            if let Some(v) = endpoints.credential_url {
                config.credential_url = v;
            }
            if let Some(v) = endpoints.signaling_url {
                config.signaling_url = v;
            }
            if let Some(v) = endpoints.chat_url {
                config.chat_url = v;
            }
        }

        if let Some(realtime) = self.realtime {
            if let Some(v) = realtime.model {
                config.model = v;
            }
            if realtime.voice.is_some() {
                config.voice = realtime.voice;
            }
            if let Some(v) = realtime.transcription_model {
                config.transcription_model = v;
            }
            if realtime.instructions.is_some() {
                config.instructions = realtime.instructions;
            }
            if let Some(v) = realtime.control_channel_label {
                config.control_channel_label = v;
            }
            if let Some(v) = realtime.synthesis_instructions {
                config.synthesis_instructions = v;
            }
            if let Some(v) = realtime.ice_servers {
                config.ice_servers = v;
            }
        }

        if let Some(chat) = self.chat {
            if chat.user_id.is_some() {
                config.user_id = chat.user_id;
            }
            if chat.conversation_id.is_some() {
                config.conversation_id = chat.conversation_id;
            }
        }

        if let Some(timeouts) = self.timeouts {
            if let Some(ms) = timeouts.credential_ms {
                config.credential_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = timeouts.signaling_ms {
                config.signaling_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = timeouts.backend_ms {
                config.backend_timeout = Duration::from_millis(ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml() {
        let config = YamlConfig::from_str("").unwrap();
        assert!(config.endpoints.is_none());
        assert!(config.realtime.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_base_values() {
        let yaml = YamlConfig::from_str("realtime:\n  model: \"gpt-4o-mini-realtime-preview\"\n")
            .unwrap();
        let mut config = BridgeConfig::default();
        yaml.apply(&mut config);

        assert_eq!(config.model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.control_channel_label, "oai-events");
        assert_eq!(config.chat_url, BridgeConfig::default().chat_url);
    }

    #[test]
    fn test_zero_timeout_is_applied_then_rejected() {
        let yaml = YamlConfig::from_str("timeouts:\n  signaling_ms: 0\n").unwrap();
        let mut config = BridgeConfig::default();
        yaml.apply(&mut config);
        assert_eq!(config.signaling_timeout, Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
