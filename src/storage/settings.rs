//! Persisted sleep preferences.
//!
//! The controller never reads these itself; callers turn them into a
//! [`SessionRequest`](crate::audio::SessionRequest).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Loudest volume allowed while the safe-volume cap is enabled.
pub const SAFE_VOLUME_CAP: f32 = 0.6;

/// Shortest selectable session, in minutes.
pub const MIN_DURATION_MINUTES: u32 = 1;

/// Longest selectable session, in minutes.
pub const MAX_DURATION_MINUTES: u32 = 180;

/// Stored user preferences for the next session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepSettings {
    /// Catalog id or file path of the selected sound
    pub selected_sound_id: String,
    /// Session length (1-180)
    pub duration_minutes: u32,
    /// Requested volume (0.0 - 1.0)
    pub volume: f32,
    /// Limit playback volume to [`SAFE_VOLUME_CAP`]
    pub safe_volume_cap_enabled: bool,
    /// Last modification timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            selected_sound_id: "rain".to_string(),
            duration_minutes: 30,
            volume: 0.5,
            safe_volume_cap_enabled: true,
            updated_at: None,
        }
    }
}

impl SleepSettings {
    /// Validate a session length in minutes.
    pub fn validate_duration_minutes(minutes: u32) -> bool {
        (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes)
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_minutes.saturating_mul(60)
    }

    /// Volume to play at, after the safe-volume cap.
    pub fn effective_volume(&self) -> f32 {
        let volume = crate::audio::clamp_volume(self.volume);
        if self.safe_volume_cap_enabled {
            volume.min(SAFE_VOLUME_CAP)
        } else {
            volume
        }
    }

    /// Apply a partial update. Nothing changes when validation fails.
    pub fn apply(&mut self, patch: SettingsPatch) -> Result<(), SettingsError> {
        if let Some(minutes) = patch.duration_minutes {
            if !Self::validate_duration_minutes(minutes) {
                return Err(SettingsError::InvalidDuration(minutes));
            }
        }
        if let Some(sound) = &patch.selected_sound_id {
            if sound.trim().is_empty() {
                return Err(SettingsError::EmptySound);
            }
        }

        if let Some(sound) = patch.selected_sound_id {
            self.selected_sound_id = sound;
        }
        if let Some(minutes) = patch.duration_minutes {
            self.duration_minutes = minutes;
        }
        if let Some(volume) = patch.volume {
            self.volume = crate::audio::clamp_volume(volume);
        }
        if let Some(enabled) = patch.safe_volume_cap_enabled {
            self.safe_volume_cap_enabled = enabled;
        }
        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// Partial settings update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub selected_sound_id: Option<String>,
    pub duration_minutes: Option<u32>,
    pub volume: Option<f32>,
    pub safe_volume_cap_enabled: Option<bool>,
}

/// Settings persistence.
pub trait SettingsStore: Send + Sync {
    /// Current settings, defaults when nothing is stored
    fn read(&self) -> Result<SleepSettings, SettingsError>;

    /// Merge `patch` into the stored settings and return the result
    fn write(&self, patch: SettingsPatch) -> Result<SleepSettings, SettingsError>;
}

/// Settings kept in a TOML file.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, settings: &SleepSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::IoError(e.to_string()))?;
        }

        let content = toml::to_string_pretty(settings)
            .map_err(|e| SettingsError::SerializeError(e.to_string()))?;

        std::fs::write(&self.path, content).map_err(|e| SettingsError::IoError(e.to_string()))?;

        Ok(())
    }
}

impl SettingsStore for TomlSettingsStore {
    fn read(&self) -> Result<SleepSettings, SettingsError> {
        if !self.path.exists() {
            return Ok(SleepSettings::default());
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|e| SettingsError::IoError(e.to_string()))?;

        let settings: SleepSettings =
            toml::from_str(&content).map_err(|e| SettingsError::ParseError(e.to_string()))?;

        if !SleepSettings::validate_duration_minutes(settings.duration_minutes) {
            tracing::warn!(
                "Stored duration {} min out of range, using default",
                settings.duration_minutes
            );
            return Ok(SleepSettings {
                duration_minutes: SleepSettings::default().duration_minutes,
                ..settings
            });
        }

        Ok(settings)
    }

    fn write(&self, patch: SettingsPatch) -> Result<SleepSettings, SettingsError> {
        let mut settings = self.read()?;
        settings.apply(patch)?;
        self.save(&settings)?;
        tracing::debug!("Saved settings to {}", self.path.display());
        Ok(settings)
    }
}

/// Settings kept in memory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<SleepSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: SleepSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn read(&self) -> Result<SleepSettings, SettingsError> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn write(&self, patch: SettingsPatch) -> Result<SleepSettings, SettingsError> {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        settings.apply(patch)?;
        Ok(settings.clone())
    }
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Duration must be between 1 and 180 minutes, got {0}")]
    InvalidDuration(u32),

    #[error("No sound selected")]
    EmptySound,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
