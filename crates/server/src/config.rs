use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use railsync::{ServerInfo, Settings, SettingsError};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub tick_rate: u32,
    pub settings_path: PathBuf,
    pub overrides: Overrides,
}

/// Command line values that win over the settings file, including after a
/// reload.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub password: Option<String>,
    pub max_players: Option<usize>,
}

impl Overrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(password) = &self.password {
            settings.password = password.clone();
        }
        if let Some(max_players) = self.max_players {
            settings.max_players = max_players;
        }
    }
}

/// Names the reloaded values the running server keeps until a restart. The
/// build identity a login is checked against is fixed at startup.
pub fn restart_only_changes(running: &ServerInfo, reloaded: &Settings) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if running.build_version != reloaded.build_version {
        changed.push("build_version");
    }
    if running.mods != reloaded.mods {
        changed.push("mods");
    }
    changed
}

/// Polls the settings file's modification time.
pub struct SettingsWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl SettingsWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            modified: modified_time(path),
        }
    }

    /// Returns freshly loaded settings when the file changed since the last
    /// call. A file that fails to parse is reported once per change.
    pub fn poll(&mut self) -> Option<Result<Settings, SettingsError>> {
        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.modified {
            return None;
        }
        self.modified = modified;
        Some(Settings::load(&self.path))
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
