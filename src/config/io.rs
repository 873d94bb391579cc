use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::info;
use std::fs::OpenOptions;
use std::str;

use crate::config::types::ScaleConfig;
use crate::error::ConfigError;

// bookoo-bridge.json in an os dependent standard directory, such as ~/.config on linux
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "bookoo", "bookoo-bridge").map(|dirs| {
        dirs.config_dir().join("bookoo-bridge.json")
    })
}

fn get_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

/// Holds the config file open; locking it keeps a second bridge for the same
/// scale from starting, a scale accepts only one central.
pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    path: PathBuf,
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn open_sync(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = get_config_path(explicit)?;
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        let inner = ConfigIOInner { path, file };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).path.clone()
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    /// An empty (freshly created) file reads as the default config.
    pub async fn read(&self) -> Result<ScaleConfig, ConfigError> {
        let mut file = self.get_file()?;

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        parse_config(&content)
    }
}

pub fn parse_config(content: &[u8]) -> Result<ScaleConfig, ConfigError> {
    let content = str::from_utf8(content)?;
    if content.trim().is_empty() {
        return Ok(ScaleConfig::default());
    }

    Ok(serde_json::from_str(content)?)
}
