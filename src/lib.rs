pub mod animation;
pub mod app;
pub mod asset_loader;
pub mod camera;
pub mod config;
pub mod error;
pub mod model;
pub mod renderer;
pub mod scene_tree;
pub mod settings;
pub mod viewer;
pub mod vrm;

pub use app::{run, RunOptions};
pub use viewer::Viewer;
