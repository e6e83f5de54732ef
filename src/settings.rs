// Durable key→value store for the license key and watermark text.
//
// Stored as JSON under the platform config dir, loaded tolerantly: a missing
// or corrupt file falls back to defaults so a bad write can never brick the
// app. Both credential fields are written in a single save; the store is
// either fully activated or not activated at all.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted document. Absent keys stay absent on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_text: Option<String>,
}

pub fn settings_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("Aquamark").join("settings.json")
}

/// In-memory view of the settings file plus its location.
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Open the store at the default platform location.
    pub fn open() -> Self {
        Self::at(settings_path())
    }

    /// Open the store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = load_settings(&path);
        Self { path, settings }
    }

    pub fn license_key(&self) -> Option<&str> {
        self.settings.license_key.as_deref()
    }

    pub fn watermark_text(&self) -> Option<&str> {
        self.settings.watermark_text.as_deref()
    }

    /// Activated means both values are present and non-empty.
    pub fn has_credentials(&self) -> bool {
        self.settings
            .license_key
            .as_deref()
            .is_some_and(|k| !k.is_empty())
            && self
                .settings
                .watermark_text
                .as_deref()
                .is_some_and(|t| !t.is_empty())
    }

    /// Write both credential fields in one save.
    pub fn set_credentials(&mut self, license_key: &str, watermark_text: &str) -> Result<(), SettingsError> {
        self.settings.license_key = Some(license_key.to_owned());
        self.settings.watermark_text = Some(watermark_text.to_owned());
        self.save()
    }

    /// Replace the watermark text, leaving the license key untouched.
    pub fn set_watermark_text(&mut self, watermark_text: &str) -> Result<(), SettingsError> {
        self.settings.watermark_text = Some(watermark_text.to_owned());
        self.save()
    }

    fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let data = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.path, data).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable settings file, using defaults");
            return Settings::default();
        }
    };
    match serde_json::from_str(&data) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
            Settings::default()
        }
    }
}
