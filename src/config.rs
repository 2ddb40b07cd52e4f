//! Bridge configuration: backend credentials and model selection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub gemini_api_key: String,
    /// Model behind the live bidirectional audio socket.
    #[serde(default = "default_live_model")]
    pub live_model: String,
    /// Primary model for one-shot phrase translations.
    #[serde(default = "default_oneshot_model")]
    pub oneshot_model: String,
    /// Fallback when the primary runs into quota or is unavailable.
    #[serde(default = "default_oneshot_fallback")]
    pub oneshot_fallback: String,
}

fn default_live_model() -> String {
    "gemini-2.5-flash-native-audio-preview-12-2025".to_string()
}

fn default_oneshot_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_oneshot_fallback() -> String {
    "gemini-2.5-flash-lite".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            live_model: default_live_model(),
            oneshot_model: default_oneshot_model(),
            oneshot_fallback: default_oneshot_fallback(),
        }
    }
}

impl Config {
    pub fn has_credentials(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }
}

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir().unwrap_or_default().join("bazaar-bridge");
    let _ = std::fs::create_dir_all(&config_dir);
    config_dir.join("config.json")
}

/// Load config from disk, falling back to defaults on any problem.
pub fn load_config() -> Config {
    load_from(&get_config_path())
}

pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return Config::default(),
    };

    match serde_json::from_str(&data) {
        Ok(c) => c,
        Err(_) => Config::default(),
    }
}

/// Save config to disk
pub fn save_config(config: &Config) {
    save_to(config, &get_config_path());
}

pub fn save_to(config: &Config, path: &Path) {
    if let Ok(data) = serde_json::to_string_pretty(config) {
        let _ = std::fs::write(path, data);
    }
}
