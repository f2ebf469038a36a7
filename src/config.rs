//! Configuration management for CrabStream
//!
//! Provides configuration loading, saving and validation for ICE servers and
//! session negotiation settings.

use crate::errors::StreamError;
use crate::webrtc::peer::{IceServer, RtcConfiguration};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrabStreamConfig {
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// STUN URLs, all placed in a single ICE server entry
    pub stun_servers: Vec<String>,
    /// TURN entries of the form `<scheme>:<user>@<host>:<port>`.
    /// Only the first entry is used.
    pub turn_servers: Vec<String>,
    pub turn_username: String,
    pub turn_password: String,
}

/// Session negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label of the primary control data channel
    pub control_channel_label: String,
    /// MIME type pinned on the outgoing video sender
    pub video_codec: String,
    /// Audio clock rate used when a sample does not declare one
    pub default_audio_clock_rate: u32,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            turn_username: String::new(),
            turn_password: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_channel_label: "input".to_string(),
            video_codec: "video/H264".to_string(),
            default_audio_clock_rate: crate::timing::DEFAULT_AUDIO_CLOCK_RATE,
        }
    }
}

impl IceConfig {
    /// Derive the relay URL from the first configured TURN entry.
    ///
    /// `turn:user@relay.example.com:3478` becomes `turn:relay.example.com:3478`.
    pub fn turn_url(&self) -> Result<String, StreamError> {
        let entry = self
            .turn_servers
            .first()
            .ok_or_else(|| StreamError::Config("no TURN server configured".to_string()))?;

        let (scheme, _) = entry.split_once(':').ok_or_else(|| {
            StreamError::Config(format!("TURN entry '{}' has no URL scheme", entry))
        })?;
        let (_, host) = entry.split_once('@').ok_or_else(|| {
            StreamError::Config(format!("TURN entry '{}' is missing '<user>@'", entry))
        })?;

        if scheme.is_empty() || host.is_empty() {
            return Err(StreamError::Config(format!(
                "malformed TURN entry '{}'",
                entry
            )));
        }

        if self.turn_servers.len() > 1 {
            log::warn!(
                "{} TURN servers configured, only the first one is used",
                self.turn_servers.len()
            );
        }

        Ok(format!("{}:{}", scheme, host))
    }

    /// Build the transport configuration: one STUN entry and one TURN entry.
    pub fn rtc_configuration(&self) -> Result<RtcConfiguration, StreamError> {
        let turn_url = self.turn_url()?;

        Ok(RtcConfiguration {
            ice_servers: vec![
                IceServer {
                    urls: self.stun_servers.clone(),
                    username: None,
                    credential: None,
                },
                IceServer {
                    urls: vec![turn_url],
                    username: Some(self.turn_username.clone()),
                    credential: Some(self.turn_password.clone()),
                },
            ],
        })
    }
}

impl CrabStreamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| StreamError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabStreamConfig = toml::from_str(&contents)
            .map_err(|e| StreamError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StreamError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StreamError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| StreamError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabstream.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.ice.stun_servers.is_empty() {
            return Err(StreamError::Config("at least one STUN server is required".to_string()));
        }
        self.ice.turn_url()?;

        if self.session.control_channel_label.is_empty() {
            return Err(StreamError::Config("control channel label must not be empty".to_string()));
        }
        match self.session.video_codec.split_once('/') {
            Some(("video", codec)) if !codec.is_empty() => {}
            _ => {
                return Err(StreamError::Config(format!(
                    "video codec '{}' is not a video MIME type",
                    self.session.video_codec
                )))
            }
        }
        if self.session.default_audio_clock_rate == 0 {
            return Err(StreamError::Config("default audio clock rate must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_turn() -> CrabStreamConfig {
        let mut config = CrabStreamConfig::default();
        config.ice.turn_servers = vec!["turn:alice@relay.example.com:3478".to_string()];
        config.ice.turn_username = "alice".to_string();
        config.ice.turn_password = "secret".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = CrabStreamConfig::default();
        assert_eq!(config.session.control_channel_label, "input");
        assert_eq!(config.session.video_codec, "video/H264");
        assert_eq!(config.session.default_audio_clock_rate, 48000);
        assert!(config.ice.turn_servers.is_empty());
    }

    #[test]
    fn test_rtc_configuration_uses_first_turn_entry() {
        let mut config = config_with_turn();
        config
            .ice
            .turn_servers
            .push("turns:bob@backup.example.com:5349".to_string());

        let rtc = config.ice.rtc_configuration().unwrap();
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[0].urls, config.ice.stun_servers);
        assert!(rtc.ice_servers[0].username.is_none());
        assert_eq!(rtc.ice_servers[1].urls, vec!["turn:relay.example.com:3478"]);
        assert_eq!(rtc.ice_servers[1].username.as_deref(), Some("alice"));
        assert_eq!(rtc.ice_servers[1].credential.as_deref(), Some("secret"));
    }

    #[test]
    fn test_turns_scheme_is_preserved() {
        let mut config = config_with_turn();
        config.ice.turn_servers = vec!["turns:alice@relay.example.com:443?transport=tcp".to_string()];
        assert_eq!(
            config.ice.turn_url().unwrap(),
            "turns:relay.example.com:443?transport=tcp"
        );
    }

    #[test]
    fn test_missing_turn_server_fails() {
        let config = CrabStreamConfig::default();
        let err = config.ice.rtc_configuration().unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }

    #[test]
    fn test_malformed_turn_entry_fails() {
        let mut config = CrabStreamConfig::default();
        config.ice.turn_servers = vec!["relay.example.com".to_string()];
        assert!(config.ice.turn_url().is_err());

        config.ice.turn_servers = vec!["turn:relay.example.com:3478".to_string()];
        assert!(config.ice.turn_url().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(config_with_turn().validate().is_ok());
        assert!(CrabStreamConfig::default().validate().is_err());

        let mut bad_codec = config_with_turn();
        bad_codec.session.video_codec = "audio/opus".to_string();
        assert!(bad_codec.validate().is_err());

        let mut bad_rate = config_with_turn();
        bad_rate.session.default_audio_clock_rate = 0;
        assert!(bad_rate.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("crabstream.toml");

        let config = config_with_turn();
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = CrabStreamConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.ice.turn_servers, config.ice.turn_servers);
        assert_eq!(loaded.session.video_codec, config.session.video_codec);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&config_with_turn()).unwrap();
        assert!(toml_string.contains("[ice]"));
        assert!(toml_string.contains("[session]"));
        assert!(toml_string.contains("turn_servers"));
        assert!(toml_string.contains("control_channel_label"));
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let config: CrabStreamConfig = toml::from_str(
            r#"
            [ice]
            stun_servers = ["stun:stun.example.com:3478"]
            turn_servers = ["turn:u@turn.example.com:3478"]
            turn_username = "u"
            turn_password = "p"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.control_channel_label, "input");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_fill_missing_fields() {
        let config: CrabStreamConfig = toml::from_str(
            r#"
            [ice]
            turn_servers = ["turn:u@turn.example.com:3478"]
            turn_username = "u"

            [session]
            video_codec = "video/VP8"
            "#,
        )
        .unwrap();
        assert_eq!(config.ice.stun_servers, IceConfig::default().stun_servers);
        assert!(config.ice.turn_password.is_empty());
        assert_eq!(config.session.video_codec, "video/VP8");
        assert_eq!(config.session.control_channel_label, "input");
        assert_eq!(config.session.default_audio_clock_rate, 48_000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CrabStreamConfig::load_from_file("nonexistent_crabstream.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().session.video_codec, "video/H264");
    }
}
