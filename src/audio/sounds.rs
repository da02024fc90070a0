//! Built-in ambient sound catalog.

use super::{AudioError, SoundSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One entry of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientSound {
    /// Stable id stored in settings
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Asset file name inside the assets directory
    pub file: &'static str,
}

/// Sounds shipped with the application.
pub const BUILTIN_SOUNDS: &[AmbientSound] = &[
    AmbientSound {
        id: "rain",
        name: "Gentle Rain",
        file: "rain.mp3",
    },
    AmbientSound {
        id: "ocean",
        name: "Ocean Waves",
        file: "ocean.mp3",
    },
    AmbientSound {
        id: "forest",
        name: "Night Forest",
        file: "forest.mp3",
    },
    AmbientSound {
        id: "stream",
        name: "Mountain Stream",
        file: "stream.mp3",
    },
    AmbientSound {
        id: "fireplace",
        name: "Fireplace",
        file: "fireplace.mp3",
    },
    AmbientSound {
        id: "fan",
        name: "Box Fan",
        file: "fan.wav",
    },
    AmbientSound {
        id: "white-noise",
        name: "White Noise",
        file: "white_noise.wav",
    },
    AmbientSound {
        id: "brown-noise",
        name: "Brown Noise",
        file: "brown_noise.wav",
    },
];

/// Sound library settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundLibraryConfig {
    /// Directory holding the asset files; relative paths are resolved
    /// against the data directory
    pub assets_dir: PathBuf,
    /// Sound used when settings name nothing usable
    pub default_sound: String,
}

impl Default for SoundLibraryConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("sounds"),
            default_sound: "rain".to_string(),
        }
    }
}

/// Resolves sound ids to playable sources.
#[derive(Debug, Clone)]
pub struct SoundLibrary {
    assets_dir: PathBuf,
}

impl SoundLibrary {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
        }
    }

    /// Build from config, anchoring a relative assets dir at `data_dir`.
    pub fn from_config(config: &SoundLibraryConfig, data_dir: &Path) -> Self {
        if config.assets_dir.is_absolute() {
            Self::new(config.assets_dir.clone())
        } else {
            Self::new(data_dir.join(&config.assets_dir))
        }
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn catalog(&self) -> &'static [AmbientSound] {
        BUILTIN_SOUNDS
    }

    pub fn find(&self, id: &str) -> Option<&'static AmbientSound> {
        BUILTIN_SOUNDS.iter().find(|sound| sound.id == id)
    }

    /// Resolve a catalog id, or a path to an audio file, to a source.
    pub fn resolve(&self, id_or_path: &str) -> Result<SoundSource, AudioError> {
        if let Some(sound) = self.find(id_or_path) {
            return Ok(SoundSource::file(sound.id, self.assets_dir.join(sound.file)));
        }

        let path = Path::new(id_or_path);
        if path.extension().is_some() {
            return Ok(SoundSource::file(id_or_path, path));
        }

        Err(AudioError::SoundNotFound(id_or_path.to_string()))
    }
}
