use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a binary glTF container: {0}")]
    Glb(String),
    #[error("glTF decode error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("malformed extension JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model has no humanoid bone mapping")]
    MissingHumanoid,
    #[error("loader worker went away before answering")]
    WorkerGone,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible graphics adapter found")]
    NoAdapter,
    #[error("could not open graphics device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("surface frame unavailable: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("crossfade window must be non-negative, got {0}")]
    NegativeCrossfade(f32),
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("model {url} failed to load: {source}")]
    ModelLoad {
        url: String,
        #[source]
        source: LoadError,
    },
}
