//! Settings document service.
//!
//! # Design
//! - Owns `config.json`; a missing file yields defaults and unknown fields are ignored.
//! - Every mutation persists the whole document before the change is published.
//! - Reads hand out copies, never references into the live settings.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::UserSettings;
use crate::validate::validate_speed_limit;

/// File name of the settings document inside the data directory.
pub const SETTINGS_FILE: &str = "config.json";

/// Persistent, validated access to [`UserSettings`].
pub struct SettingsService {
    path: PathBuf,
    settings: RwLock<UserSettings>,
}

impl SettingsService {
    /// Load settings from `<data_dir>/config.json`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or an existing
    /// document cannot be read or decoded.
    pub async fn open(data_dir: &Path) -> ConfigResult<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| ConfigError::io("create_dir", data_dir.to_path_buf(), source))?;
        let path = data_dir.join(SETTINGS_FILE);
        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings document missing; using defaults");
                UserSettings::default()
            }
            Err(source) => return Err(ConfigError::io("read", path, source)),
        };
        Ok(Self {
            path,
            settings: RwLock::new(settings),
        })
    }

    /// Copy of the current settings.
    pub async fn snapshot(&self) -> UserSettings {
        self.settings.read().await.clone()
    }

    /// Set the download cap in KiB/s.
    ///
    /// # Errors
    ///
    /// Returns an error for an out-of-range value or when persisting fails.
    pub async fn set_download_speed(&self, kib_per_sec: i64) -> ConfigResult<UserSettings> {
        let value = validate_speed_limit("max_download_speed", kib_per_sec)?;
        self.update(|settings| settings.max_download_speed = value)
            .await
    }

    /// Set the upload cap in KiB/s.
    ///
    /// # Errors
    ///
    /// Returns an error for an out-of-range value or when persisting fails.
    pub async fn set_upload_speed(&self, kib_per_sec: i64) -> ConfigResult<UserSettings> {
        let value = validate_speed_limit("max_upload_speed", kib_per_sec)?;
        self.update(|settings| settings.max_upload_speed = value)
            .await
    }

    /// Set the default destination directory.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty path or when persisting fails.
    pub async fn set_default_dir(&self, path: &str) -> ConfigResult<UserSettings> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidField {
                section: "settings",
                field: "default_download_dir",
                value: None,
                reason: "empty",
            });
        }
        let owned = trimmed.to_string();
        self.update(move |settings| settings.default_download_dir = owned)
            .await
    }

    /// Restore and persist the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting fails.
    pub async fn reset(&self) -> ConfigResult<UserSettings> {
        let settings = self
            .update(|settings| *settings = UserSettings::default())
            .await?;
        info!("settings reset to defaults");
        Ok(settings)
    }

    async fn update<F>(&self, apply: F) -> ConfigResult<UserSettings>
    where
        F: FnOnce(&mut UserSettings) + Send,
    {
        let mut guard = self.settings.write().await;
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next).await?;
        *guard = next.clone();
        Ok(next)
    }

    async fn persist(&self, settings: &UserSettings) -> ConfigResult<()> {
        let bytes = serde_json::to_vec_pretty(settings)
            .map_err(|source| ConfigError::Encode { source })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|source| ConfigError::io("write", self.path.clone(), source))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[tokio::test]
    async fn missing_document_yields_defaults() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let service = SettingsService::open(dir.path()).await?;
        assert_eq!(service.snapshot().await, UserSettings::default());
        assert!(!dir.path().join(SETTINGS_FILE).exists());
        Ok(())
    }

    #[tokio::test]
    async fn mutations_persist_and_reload() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let service = SettingsService::open(dir.path()).await?;
        service.set_download_speed(2_048).await?;
        service.set_upload_speed(64).await?;
        service.set_default_dir(" /srv/media ").await?;

        let reloaded = SettingsService::open(dir.path()).await?.snapshot().await;
        assert_eq!(reloaded.max_download_speed, 2_048);
        assert_eq!(reloaded.max_upload_speed, 64);
        assert_eq!(reloaded.default_download_dir, "/srv/media");

        service.reset().await?;
        let reloaded = SettingsService::open(dir.path()).await?.snapshot().await;
        assert_eq!(reloaded, UserSettings::default());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_values_leave_settings_untouched() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let service = SettingsService::open(dir.path()).await?;
        assert!(service.set_download_speed(-5).await.is_err());
        assert!(service.set_upload_speed(500_000).await.is_err());
        assert!(service.set_default_dir("  ").await.is_err());
        assert_eq!(service.snapshot().await, UserSettings::default());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_document_is_reported() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(SETTINGS_FILE), b"[not an object")?;
        assert!(matches!(
            SettingsService::open(dir.path()).await,
            Err(ConfigError::Parse { .. })
        ));
        Ok(())
    }
}
