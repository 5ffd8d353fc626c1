pub mod app;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Environment override for the asset root directory.
pub const ROOT_ENV_VAR: &str = "SKYLARK_ROOT";

const ASSET_DIR_NAME: &str = "assets";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("asset root {} does not exist or is not a directory", .path.display())]
    InvalidRoot { path: PathBuf },
    #[error("no assets/ directory found from {} upward", .searched_from.display())]
    MissingRoot { searched_from: PathBuf },
    #[error("could not determine the current directory")]
    CurrentDir(#[source] std::io::Error),
}

/// Resolves the directory textures are loaded from. Precedence: explicit
/// config path, then the `SKYLARK_ROOT` environment variable, then an
/// `assets/` directory found by walking up from the current directory.
pub fn resolve_asset_root(config_root: Option<&Path>) -> Result<PathBuf, StartupError> {
    if let Some(path) = config_root {
        return checked_root(path.to_path_buf());
    }
    if let Ok(env_root) = std::env::var(ROOT_ENV_VAR) {
        return checked_root(PathBuf::from(env_root));
    }
    let start = std::env::current_dir().map_err(StartupError::CurrentDir)?;
    find_asset_dir_upward(&start).ok_or(StartupError::MissingRoot {
        searched_from: start,
    })
}

fn checked_root(path: PathBuf) -> Result<PathBuf, StartupError> {
    if path.is_dir() {
        info!(root = %path.display(), "asset_root_resolved");
        Ok(path)
    } else {
        Err(StartupError::InvalidRoot { path })
    }
}

fn find_asset_dir_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(ASSET_DIR_NAME);
        if candidate.is_dir() {
            info!(root = %candidate.display(), "asset_root_resolved");
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}
