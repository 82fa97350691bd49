//! Handles settings for the application. Configuration is written in
//! `settings.toml`.
//!
//! Every scheduler and dispatcher knob lives here and is passed into the
//! constructors; there is no ambient global configuration.
use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct Reminders {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_cadence")]
    pub cadence_seconds: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff")]
    pub backoff_seconds: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_cadence() -> u64 {
    60
}

fn default_pool_size() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub telegram: Option<Telegram>,
    pub reminders: Option<Reminders>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings"))
            .build()?;

        settings.try_deserialize()
    }
}
