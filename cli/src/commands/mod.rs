pub mod admin;
pub mod health;
pub mod serve;
pub mod sign;

use anyhow::{Context, Result};
use api::KeystoneConfig;
use std::path::Path;

/// Loads the configuration the same way the server does.
pub fn load_config(path: Option<&Path>) -> Result<KeystoneConfig> {
    KeystoneConfig::load_from_env(path).context("Failed to load configuration")
}
