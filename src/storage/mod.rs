//! Storage module for configuration and settings.

pub mod config;
pub mod settings;

pub use config::{AppConfig, ConfigError};
pub use settings::{
    MemorySettingsStore, SettingsError, SettingsPatch, SettingsStore, SleepSettings,
    TomlSettingsStore,
};
