//! Runtime configuration, loaded from a TOML file next to the binary.
//!
//! Every field has a default so a missing file (or a partial one) still
//! yields a working local setup.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Conversational agent endpoint.
    pub ws_url: String,
    /// Bearer token sent on the upgrade request. Empty means unauthenticated.
    pub ws_token: String,
    /// Stable client identity; a fresh UUID is generated when left empty.
    pub client_id: String,
    pub capture_device: String,
    pub playback_device: String,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    /// Outbound chunk size in samples.
    pub chunk_samples: usize,
    pub system_prompt: String,
    /// Currency assumed for spoken prices.
    pub currency: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "wss://127.0.0.1:9073/voice".to_string(),
            ws_token: String::new(),
            client_id: String::new(),
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            chunk_samples: 4096,
            system_prompt: default_system_prompt(),
            currency: "EUR".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

fn default_system_prompt() -> String {
    "You are a voice assistant helping the user catalogue their belongings. \
     Guide them one item at a time: ask for the item's name, then how many \
     they have, then optionally its category, brand, location, condition, \
     purchase price and resale value. Keep questions short and ask one thing \
     at a time. Once you have at least a name and a quantity, call the \
     addItem tool to record the item, confirm it briefly, and move on to the \
     next item."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_wire_rates() {
        let config = Config::default();
        assert_eq!(config.capture_sample_rate, 16_000);
        assert_eq!(config.playback_sample_rate, 24_000);
        assert_eq!(config.chunk_samples, 4096);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let config: Config = toml::from_str("ws_url = \"wss://example.org/voice\"").unwrap();
        assert_eq!(config.ws_url, "wss://example.org/voice");
        assert_eq!(config.capture_device, "default");
        assert_eq!(config.chunk_samples, 4096);
    }
}
