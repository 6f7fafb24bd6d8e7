use config::{Config, ConfigError, Environment, File};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Agent endpoint and credentials.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AgentSettings {
    pub ws_url: String,
    pub base_url: String,
    pub username: String,
    pub robot_key: String,
    pub robot_token: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            base_url: "https://agents.dyna.ai".to_string(),
            username: String::new(),
            robot_key: String::new(),
            robot_token: String::new(),
        }
    }
}

/// Per-exchange supervision knobs.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChatSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_secs: u64,
    pub record_timing: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 40,
            max_retries: 3,
            retry_secs: 3,
            record_timing: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub console_level: String,
    pub file_level: String,
    pub log_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            console_level: "info".to_string(),
            file_level: "debug".to_string(),
            log_path: "/tmp/cybertron-chat.log".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub chat: ChatSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from the optional YAML file at `SETTINGS_FILE_PATH`
    /// (default `settings.yaml`), overlaid with `CYBERTRON__*` environment
    /// variables, e.g. `CYBERTRON__AGENT__ROBOT_KEY`.
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings_path = std::env::var("SETTINGS_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("settings.yaml"));

        let mut builder = Config::builder();
        if settings_path.exists() {
            debug!("Loading settings from {:?}", settings_path);
            builder = builder.add_source(File::from(settings_path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("CYBERTRON")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
