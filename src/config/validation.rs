use std::time::Duration;

use url::Url;

use super::ConfigError;
use crate::core::realtime::openai::{OpenAIRealtimeModel, OpenAIRealtimeVoice};

/// The value must parse as an absolute http(s) URL.
pub(super) fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::invalid(key, format!("{value:?} is not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::invalid(
            key,
            format!("unsupported scheme {other:?}, expected http or https"),
        )),
    }
}

pub(super) fn validate_timeout(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(key, "timeout must be greater than zero"));
    }
    Ok(())
}

pub(super) fn validate_non_empty(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(key, "must not be empty"));
    }
    Ok(())
}

pub(super) fn validate_model(key: &str, value: &str) -> Result<(), ConfigError> {
    match OpenAIRealtimeModel::parse(value) {
        Some(_) => Ok(()),
        None => Err(ConfigError::invalid(key, format!("unknown realtime model {value:?}"))),
    }
}

pub(super) fn validate_voice(key: &str, value: &str) -> Result<(), ConfigError> {
    if OpenAIRealtimeVoice::parse(value).is_some() {
        return Ok(());
    }
    let known: Vec<&str> = OpenAIRealtimeVoice::all().iter().map(|v| v.as_str()).collect();
    Err(ConfigError::invalid(
        key,
        format!("unknown voice {value:?}, expected one of {}", known.join(", ")),
    ))
}
