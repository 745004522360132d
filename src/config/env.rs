use std::env;
use std::time::Duration;

use super::{BridgeConfig, ConfigError};

pub(crate) const ENV_KEYS: &[&str] = &[
    "VOICE_BRIDGE_CREDENTIAL_URL",
    "VOICE_BRIDGE_SIGNALING_URL",
    "VOICE_BRIDGE_CHAT_URL",
    "VOICE_BRIDGE_MODEL",
    "VOICE_BRIDGE_VOICE",
    "VOICE_BRIDGE_TRANSCRIPTION_MODEL",
    "VOICE_BRIDGE_INSTRUCTIONS",
    "VOICE_BRIDGE_ICE_SERVERS",
    "VOICE_BRIDGE_USER_ID",
    "VOICE_BRIDGE_CONVERSATION_ID",
    "VOICE_BRIDGE_CREDENTIAL_TIMEOUT_MS",
    "VOICE_BRIDGE_SIGNALING_TIMEOUT_MS",
    "VOICE_BRIDGE_BACKEND_TIMEOUT_MS",
];

/// Non-empty value of `key`, if set.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ConfigError::invalid(key, format!("{raw:?} is not a number: {e}")))
        })
        .transpose()
}

/// Overlay environment variables on `config`.
pub(crate) fn load(mut config: BridgeConfig) -> Result<BridgeConfig, ConfigError> {
    if let Some(v) = var("VOICE_BRIDGE_CREDENTIAL_URL") {
        config.credential_url = v;
    }
    if let Some(v) = var("VOICE_BRIDGE_SIGNALING_URL") {
        config.signaling_url = v;
    }
    if let Some(v) = var("VOICE_BRIDGE_CHAT_URL") {
        config.chat_url = v;
    }
    if let Some(v) = var("VOICE_BRIDGE_MODEL") {
        config.model = v;
    }
    if let Some(v) = var("VOICE_BRIDGE_VOICE") {
        config.voice = Some(v);
    }
    if let Some(v) = var("VOICE_BRIDGE_TRANSCRIPTION_MODEL") {
        config.transcription_model = v;
    }
    if let Some(v) = var("VOICE_BRIDGE_INSTRUCTIONS") {
        config.instructions = Some(v);
    }
    if let Some(v) = var("VOICE_BRIDGE_ICE_SERVERS") {
        config.ice_servers = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = var("VOICE_BRIDGE_USER_ID") {
        config.user_id = Some(v);
    }
    if let Some(v) = var("VOICE_BRIDGE_CONVERSATION_ID") {
        config.conversation_id = Some(v);
    }
    if let Some(d) = millis("VOICE_BRIDGE_CREDENTIAL_TIMEOUT_MS")? {
        config.credential_timeout = d;
    }
    if let Some(d) = millis("VOICE_BRIDGE_SIGNALING_TIMEOUT_MS")? {
        config.signaling_timeout = d;
    }
    if let Some(d) = millis("VOICE_BRIDGE_BACKEND_TIMEOUT_MS")? {
        config.backend_timeout = d;
    }
    Ok(config)
}
