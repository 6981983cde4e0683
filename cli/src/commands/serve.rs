use anyhow::{Context, Result};
use api::{start_server, ApiConfig, AppState};
use std::path::Path;
use tracing::info;

use crate::logging;
use crate::utils::env_paths::EnvPaths;

/// Run the API server until it stops.
pub async fn execute(config_path: Option<&Path>, port: Option<u16>, verbose: bool) -> Result<()> {
    let env_paths = EnvPaths::load()?;
    let _guard = logging::init_server_logging(&env_paths, verbose)?;

    let config_path = config_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("KEYSTONE_CONFIG").map(Into::into))
        .or_else(|| Some(env_paths.config_file()).filter(|path| path.exists()));
    let mut config = super::load_config(config_path.as_deref())?;
    if let Some(port) = port {
        config.server.port = port;
    }

    info!("Starting Keystone with {} resource(s)", config.resources.len());
    let state = AppState::initialize(&config)
        .await
        .context("Failed to initialize application state")?;

    start_server(state, ApiConfig::from(&config.server))
        .await
        .context("API server stopped")?;
    Ok(())
}
