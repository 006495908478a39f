use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use vrm_viewer::{
    config::ViewerConfig,
    settings::{SettingsPatch, SettingsStore, SharedSettings},
    RunOptions,
};

#[derive(Parser, Debug)]
#[command(version, about = "Desktop VRM avatar viewer")]
struct Args {
    /// Model URL, resolved against the asset directory
    model: Option<String>,

    /// Directory that asset URLs are resolved against
    #[arg(long, default_value = "public")]
    assets: PathBuf,

    /// JSON viewer config; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where settings are loaded from and saved to
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Override the stored lighting intensity
    #[arg(long)]
    lighting: Option<f32>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => ViewerConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => ViewerConfig::default(),
    }
    .with_env();

    let settings = SharedSettings::load(&args.settings).context("loading settings")?;
    if let Some(lighting) = args.lighting {
        settings.set(SettingsPatch {
            lighting_intensity: Some(lighting.max(0.0)),
            ..Default::default()
        });
    }

    vrm_viewer::run(RunOptions {
        config,
        settings: Arc::new(settings),
        settings_path: Some(args.settings),
        asset_root: args.assets,
        model_url: args.model,
    })
}
