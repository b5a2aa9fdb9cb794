//! SFU Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Interval between keyframe solicitation sweeps (milliseconds)
    pub keyframe_interval_ms: u64,
    /// ICE server URLs handed to every peer connection (empty = host candidates only)
    pub ice_servers: Vec<String>,
    /// Capacity of each peer's outbound signaling queue
    pub signaling_buffer: usize,
    /// Largest accepted signaling frame (bytes)
    pub max_message_size: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            keyframe_interval_ms: 3000,
            ice_servers: Vec::new(),
            signaling_buffer: 64,
            max_message_size: 64 * 1024,
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub const fn keyframe_interval(&self) -> Duration {
        Duration::from_millis(self.keyframe_interval_ms)
    }

    /// Check the configuration for values the SFU cannot run with.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.keyframe_interval_ms == 0 {
            errors.push("sfu.keyframe_interval_ms must be greater than 0".to_string());
        }
        if self.signaling_buffer == 0 {
            errors.push("sfu.signaling_buffer must be greater than 0".to_string());
        }
        if self.max_message_size < 1024 {
            errors.push("sfu.max_message_size must be at least 1024 bytes".to_string());
        }
        for url in &self.ice_servers {
            if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
                errors.push(format!("sfu.ice_servers entry has unsupported scheme: {url}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SfuConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keyframe_interval(), Duration::from_secs(3));
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = SfuConfig {
            keyframe_interval_ms: 0,
            ice_servers: vec!["http://example.com".to_string()],
            signaling_buffer: 0,
            max_message_size: 16,
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
    }
}
