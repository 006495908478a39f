use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharacterPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// not used by the camera, carried through for other consumers
    pub scale: f32,
}
impl Default for CharacterPosition {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, scale: 1.0 }
    }
}
impl CharacterPosition {
    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterRotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub lighting_intensity: f32,
    pub fixed_character_position: bool,
    /// saved camera position
    pub character_position: CharacterPosition,
    /// saved orbit target
    pub character_rotation: CharacterRotation,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            lighting_intensity: 1.0,
            fixed_character_position: false,
            character_position: CharacterPosition::default(),
            character_rotation: CharacterRotation::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub lighting_intensity: Option<f32>,
    pub fixed_character_position: Option<bool>,
    pub character_position: Option<CharacterPosition>,
    pub character_rotation: Option<CharacterRotation>,
}
impl SettingsPatch {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = self.lighting_intensity {
            settings.lighting_intensity = v;
        }
        if let Some(v) = self.fixed_character_position {
            settings.fixed_character_position = v;
        }
        if let Some(v) = self.character_position {
            settings.character_position = v;
        }
        if let Some(v) = self.character_rotation {
            settings.character_rotation = v;
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Arc<Settings>;
    fn set(&self, patch: SettingsPatch);
    /// Every later `set` delivers the resulting snapshot to the receiver.
    fn subscribe(&self) -> Receiver<Arc<Settings>>;
}

pub struct SharedSettings {
    current: ArcSwap<Settings>,
    // also serializes writers
    subscribers: Mutex<Vec<Sender<Arc<Settings>>>>,
}

impl SharedSettings {
    pub fn new(initial: Settings) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Reads persisted settings, falling back to defaults when the file does
    /// not exist yet.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::info!("no settings at {}, using defaults", path.display());
            return Ok(Self::new(Settings::default()));
        }
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = serde_json::from_str(&text)?;
        Ok(Self::new(settings))
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        save_settings(&self.get(), path)
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    let text = serde_json::to_string_pretty(settings)?;
    fs::write(path, text).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl SettingsStore for SharedSettings {
    fn get(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    fn set(&self, patch: SettingsPatch) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = Settings::clone(&self.current.load());
        patch.apply(&mut next);
        let next = Arc::new(next);
        self.current.store(next.clone());
        subscribers.retain(|tx| tx.send(next.clone()).is_ok());
    }

    fn subscribe(&self) -> Receiver<Arc<Settings>> {
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(tx);
        rx
    }
}
