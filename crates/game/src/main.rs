mod gameplay;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engine::app::{run_app, FileTextureProvider, Scene, Stage, StageConfig, TextureQueue};

const CONFIG_FILE: &str = "skylark.json";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = StageConfig::load(Path::new(CONFIG_FILE))?;
    let asset_root = engine::resolve_asset_root(config.asset_root.as_deref())?;
    info!(title = %config.window_title, "starting");

    let textures = TextureQueue::new(Arc::new(FileTextureProvider::new(asset_root)));
    let mut stage = Stage::new(config.window_width, config.window_height, textures);
    stage.set_pick_debug(config.pick_debug_overlay);
    stage.switch_scene(Box::new(Scene::new(Box::new(gameplay::MenuBehavior::new()))));

    run_app(config, stage)?;
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(startup_error) => {
            error!(error = %startup_error, "startup_failed");
            ExitCode::FAILURE
        }
    }
}
