//! Application state management

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use lanlobby_core::{ChatHistory, ChatMessage, LobbyConfig, Result};

use crate::display;

/// Lines kept for `/history`
const HISTORY_LIMIT: usize = 500;

const CONFIG_FILE: &str = "lanlobby.toml";

/// Main application state
pub struct AppState {
    pub config: LobbyConfig,
    pub history: ChatHistory,
}

impl AppState {
    /// Load config from `config_path`, or from the platform config directory
    /// if present there, else use defaults.
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => LobbyConfig::load(path)?,
            None => match Self::default_config_path() {
                Some(path) => LobbyConfig::load_or_default(&path)?,
                None => LobbyConfig::default(),
            },
        };

        Ok(Self::with_config(config))
    }

    pub fn with_config(config: LobbyConfig) -> Self {
        Self {
            config,
            history: ChatHistory::new(HISTORY_LIMIT),
        }
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "lanlobby", "lanlobby")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Show a chat line and keep it for `/history`
    pub fn record(&mut self, msg: ChatMessage) {
        display::print_chat(&msg);
        self.history.push(msg);
    }

    pub fn replay_history(&self) {
        for msg in self.history.iter() {
            display::print_chat(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session_port = 4100\nmax_connections = 4").unwrap();

        let state = AppState::new(Some(file.path())).unwrap();
        assert_eq!(state.config.session_port, 4100);
        assert_eq!(state.config.max_connections, 4);
        assert_eq!(state.config.discovery_port, 26367);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppState::new(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = AppState::with_config(LobbyConfig::default());
        for i in 0..(HISTORY_LIMIT + 10) {
            state.history.push(ChatMessage::new(i as u64, "a", "x"));
        }
        assert_eq!(state.history.len(), HISTORY_LIMIT);
        assert_eq!(state.history.iter().next().unwrap().timestamp_ms, 10);
    }
}
