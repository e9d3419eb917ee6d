use std::{collections::HashMap, fs, path::Path};

use mirror_core::{
    render::{CHAT_HEADER, DEFAULT_PROMPT, GAME_CHAT_HEADER, MOVES_HEADER},
    MirrorTarget, DEFAULT_RING_CAPACITY,
};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "mirror.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub contract: String,
    pub account: String,
    pub user_title: String,
    pub ring_capacity: usize,
    pub chat_header: String,
    pub moves_header: String,
    pub game_chat_header: String,
    pub prompt: String,
    /// Zero disables the simulated peer.
    pub peer_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            contract: "0x5fbdb2315678afecb367f032d93f642f64180aa3".into(),
            account: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
            user_title: "guest".into(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            chat_header: CHAT_HEADER.into(),
            moves_header: MOVES_HEADER.into(),
            game_chat_header: GAME_CHAT_HEADER.into(),
            prompt: DEFAULT_PROMPT.into(),
            peer_interval_ms: 0,
        }
    }
}

impl Settings {
    pub fn header_for(&self, target: MirrorTarget) -> &str {
        match target {
            MirrorTarget::ChatRoom => &self.chat_header,
            MirrorTarget::Moves { .. } => &self.moves_header,
            MirrorTarget::GameChat { .. } => &self.game_chat_header,
        }
    }

    fn apply(&mut self, key: &str, value: String) {
        match key {
            "contract" => self.contract = value,
            "account" => self.account = value,
            "user_title" => self.user_title = value,
            "chat_header" => self.chat_header = value,
            "moves_header" => self.moves_header = value,
            "game_chat_header" => self.game_chat_header = value,
            "prompt" => self.prompt = value,
            "ring_capacity" => match value.trim().parse::<usize>() {
                Ok(parsed) => self.ring_capacity = parsed,
                Err(_) => warn!(key, value = %value, "config: ignoring invalid number"),
            },
            "peer_interval_ms" => match value.trim().parse::<u64>() {
                Ok(parsed) => self.peer_interval_ms = parsed,
                Err(_) => warn!(key, value = %value, "config: ignoring invalid number"),
            },
            _ => warn!(key, "config: ignoring unknown key"),
        }
    }
}

const KEYS: [&str; 9] = [
    "contract",
    "account",
    "user_title",
    "ring_capacity",
    "chat_header",
    "moves_header",
    "game_chat_header",
    "prompt",
    "peer_interval_ms",
];

pub fn load_settings(path: &Path) -> Settings {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Defaults, then the file at `path` if it exists, then `MIRROR_<KEY>` and `APP__<KEY>`.
pub fn load_settings_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => {
                for (key, value) in file_cfg {
                    let value = match value {
                        toml::Value::String(v) => v,
                        other => other.to_string(),
                    };
                    settings.apply(&key, value);
                }
            }
            Err(err) => warn!(path = %path.display(), error = %err, "config: unreadable file ignored"),
        }
    }

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(v) = env(&format!("MIRROR_{upper}")) {
            settings.apply(key, v);
        }
        if let Some(v) = env(&format!("APP__{upper}")) {
            settings.apply(key, v);
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
