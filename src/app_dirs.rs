use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "wordrow";

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    /// `$HOME/.local/state/wordrow`, or the platform data dir without a HOME.
    pub fn state_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            Some(
                PathBuf::from(home)
                    .join(".local")
                    .join("state")
                    .join(APP_NAME),
            )
        } else {
            ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_local_dir().to_path_buf())
        }
    }

    pub fn db_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("library.db"))
    }

    pub fn log_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("wordrow.log"))
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.json"))
    }
}

/// Paths for one run: the defaults, or everything under a single directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub db: PathBuf,
    pub config: PathBuf,
    pub log: PathBuf,
}

impl DataPaths {
    pub fn resolve(data_dir: Option<&Path>) -> Self {
        match data_dir {
            Some(dir) => Self::under(dir),
            None => Self {
                db: AppDirs::db_path().unwrap_or_else(|| PathBuf::from("wordrow.db")),
                config: AppDirs::config_path()
                    .unwrap_or_else(|| PathBuf::from("wordrow_config.json")),
                log: AppDirs::log_path().unwrap_or_else(|| PathBuf::from("wordrow.log")),
            },
        }
    }

    pub fn under(dir: &Path) -> Self {
        Self {
            db: dir.join("library.db"),
            config: dir.join("config.json"),
            log: dir.join("wordrow.log"),
        }
    }
}
