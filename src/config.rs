use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const BASE_PATH_ENV: &str = "BASE_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// vertical field of view, degrees
    pub fovy: f32,
    pub znear: f32,
    pub zfar: f32,
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub screen_space_panning: bool,
}
impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fovy: 20.0,
            znear: 0.1,
            zfar: 20.0,
            position: [0.0, 1.3, 2.0],
            target: [0.0, 1.3, 0.0],
            screen_space_panning: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub directional_factor: f32,
    pub ambient_factor: f32,
    /// normalized on use
    pub directional_direction: [f32; 3],
}
impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            directional_factor: 1.8,
            ambient_factor: 1.2,
            directional_direction: [1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// played once when a model appears
    pub intro_url: String,
    /// looped after the intro
    pub default_url: String,
    /// seconds
    pub crossfade: f32,
}
impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            intro_url: "/vrma/vbox-appearing-7KKFBBJ2.vrma".to_string(),
            default_url: "/vrma/vbox-waiting-I3CZ3FBD.vrma".to_string(),
            crossfade: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// prefix prepended to every asset URL
    pub base_path: String,
    pub animation: AnimationConfig,
    pub camera: CameraConfig,
    pub lighting: LightingConfig,
    /// x translation applied to every loaded model's root
    pub model_offset_x: f32,
    /// frames to wait after a model attaches before framing the camera on it
    pub camera_reset_delay_frames: u32,
}
impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            animation: AnimationConfig::default(),
            camera: CameraConfig::default(),
            lighting: LightingConfig::default(),
            model_offset_x: -0.2,
            camera_reset_delay_frames: 1,
        }
    }
}

impl ViewerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ViewerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides `base_path` from the environment when the variable is set.
    pub fn with_env(mut self) -> Self {
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            self.base_path = base_path;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.animation.crossfade < 0.0 {
            return Err(ConfigError::NegativeCrossfade(self.animation.crossfade));
        }
        Ok(())
    }

    pub fn build_url(&self, path: &str) -> String {
        build_url(&self.base_path, path)
    }
}

/// Prefixes an absolute asset path with the deployment base path.
pub fn build_url(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        return path.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
