use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Directories the CLI reads from and writes to, each overridable through
/// the environment. Relative values resolve against a base directory.
#[derive(Debug, Clone)]
pub struct EnvPaths {
    pub data_path: PathBuf,
    pub configuration_path: PathBuf,
}

fn resolve(var_name: &str, default: &str, base: &Path) -> PathBuf {
    let path = env::var_os(var_name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default));
    if path.is_relative() {
        base.join(path)
    } else {
        path
    }
}

impl EnvPaths {
    /// Resolves against the working directory after reading `.env`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let cwd = env::current_dir().context("Failed to get current directory")?;
        Ok(Self::load_with_base(&cwd))
    }

    pub fn load_with_base(base: &Path) -> Self {
        Self {
            data_path: resolve("DATA_PATH", "data", base),
            configuration_path: resolve("CONFIGURATION_PATH", "config", base),
        }
    }

    /// Daily log files from `keystone serve`.
    pub fn logs_path(&self) -> PathBuf {
        self.data_path.join("logs")
    }

    /// The configuration file read when neither `--config` nor
    /// `KEYSTONE_CONFIG` is given.
    pub fn config_file(&self) -> PathBuf {
        self.configuration_path.join("keystone.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Tests below mutate process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_env_paths_with_base_dir() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::remove_var("DATA_PATH");
        env::remove_var("CONFIGURATION_PATH");

        let temp_dir = TempDir::new().unwrap();
        let base_path = temp_dir.path().to_path_buf();
        let paths = EnvPaths::load_with_base(&base_path);

        assert_eq!(paths.data_path, base_path.join("data"));
        assert_eq!(paths.logs_path(), base_path.join("data/logs"));
        assert_eq!(paths.config_file(), base_path.join("config/keystone.yaml"));
    }

    #[test]
    fn test_env_paths_with_absolute_env_vars() {
        let _guard = ENV_MUTEX.lock().unwrap();

        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("custom_data");
        env::set_var("DATA_PATH", &data);
        env::remove_var("CONFIGURATION_PATH");

        let paths = EnvPaths::load_with_base(Path::new("/unused"));
        assert_eq!(paths.data_path, data);
        assert_eq!(paths.configuration_path, PathBuf::from("/unused/config"));

        env::remove_var("DATA_PATH");
    }
}
