use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_PORT, ModInfo, TransportOptions};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Session settings. Missing keys in a settings file fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Empty means no password.
    pub password: String,
    pub max_players: usize,
    pub port: u16,
    /// Include remote addresses in log lines.
    pub log_ips: bool,
    pub enable_nat_punch: bool,
    pub reuse_packet_readers: bool,
    pub use_native_sockets: bool,
    pub ping_interval_ms: u32,
    pub disconnect_timeout_ms: u32,
    pub build_version: u16,
    pub mods: Vec<ModInfo>,
}

impl Default for Settings {
    fn default() -> Self {
        let transport = TransportOptions::default();
        Self {
            password: String::new(),
            max_players: 4,
            port: DEFAULT_PORT,
            log_ips: false,
            enable_nat_punch: transport.enable_nat_punch,
            reuse_packet_readers: transport.reuse_packet_readers,
            use_native_sockets: transport.use_native_sockets,
            ping_interval_ms: transport.ping_interval_ms,
            disconnect_timeout_ms: transport.disconnect_timeout_ms,
            build_version: 0,
            mods: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reads settings from `path`, writing the defaults there first if the
    /// file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            return Self::load(path);
        }

        let settings = Self::default();
        std::fs::write(path, settings.to_toml()?).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("created default settings file {}", path.display());
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// The subset of settings a running transport can pick up live.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            enable_nat_punch: self.enable_nat_punch,
            reuse_packet_readers: self.reuse_packet_readers,
            use_native_sockets: self.use_native_sockets,
            ping_interval_ms: self.ping_interval_ms,
            disconnect_timeout_ms: self.disconnect_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            password = "hunter2"
            max_players = 8

            [[mods]]
            name = "Multiplayer"
            version = "0.1.0"
            "#,
        )
        .unwrap();

        assert_eq!(settings.password, "hunter2");
        assert_eq!(settings.max_players, 8);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.mods, vec![ModInfo::new("Multiplayer", "0.1.0")]);
        assert!(settings.has_password());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let settings = Settings {
            log_ips: true,
            enable_nat_punch: true,
            mods: vec![ModInfo::new("a", "1")],
            ..Settings::default()
        };
        let text = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml(&text).unwrap(), settings);
    }

    #[test]
    fn test_transport_options_follow_settings() {
        let settings = Settings {
            enable_nat_punch: true,
            reuse_packet_readers: false,
            use_native_sockets: false,
            ping_interval_ms: 250,
            disconnect_timeout_ms: 900,
            ..Settings::default()
        };
        let options = settings.transport_options();
        assert!(options.enable_nat_punch);
        assert!(!options.reuse_packet_readers);
        assert!(!options.use_native_sockets);
        assert_eq!(options.ping_interval_ms, 250);
        assert_eq!(options.disconnect_timeout_ms, 900);
    }

    #[test]
    fn test_bad_types_are_reported() {
        assert!(matches!(
            Settings::from_toml("max_players = \"lots\""),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let path = std::env::temp_dir()
            .join(format!("railsync-settings-{}.toml", std::process::id()));
        std::fs::remove_file(&path).ok();

        let created = Settings::load_or_create(&path).unwrap();
        assert_eq!(created, Settings::default());
        assert_eq!(Settings::load(&path).unwrap(), created);

        std::fs::remove_file(&path).unwrap();
    }
}
