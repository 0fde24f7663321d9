//! Durable local preferences
//!
//! A small JSON file for the handful of settings that survive sessions.
//! Currently that is one flag: the desktop health-alert opt-in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::NotificationsConfig;

/// Settings persisted across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Whether the user opted in to desktop health notifications
    #[serde(default)]
    pub desktop_health_alerts: bool,
}

/// Preference persistence failures
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("failed to write preferences to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode preferences: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed preference store.
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(config: &NotificationsConfig) -> Self {
        let path = config
            .preferences_path
            .clone()
            .unwrap_or_else(default_preferences_path);
        Self { path }
    }

    /// Load preferences; a missing or unreadable file yields defaults.
    pub fn load(&self) -> Preferences {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %self.path.display(), error = %err, "corrupt preferences file, using defaults");
                Preferences::default()
            }),
            Err(_) => Preferences::default(),
        }
    }

    /// Persist preferences, creating parent directories as needed.
    pub fn save(&self, preferences: &Preferences) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PrefsError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        let encoded = serde_json::to_string_pretty(preferences)?;
        std::fs::write(&self.path, encoded).map_err(|source| PrefsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn default_preferences_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("switchboard").join("preferences.json"))
        .unwrap_or_else(|| PathBuf::from(".switchboard-preferences.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> PreferenceStore {
        PreferenceStore::new(&NotificationsConfig {
            preferences_path: Some(dir.join("prefs.json")),
            recipient_email: None,
        })
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store
            .save(&Preferences {
                desktop_health_alerts: true,
            })
            .unwrap();
        assert!(store.load().desktop_health_alerts);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{nope").unwrap();

        let store = PreferenceStore::new(&NotificationsConfig {
            preferences_path: Some(path),
            recipient_email: None,
        });
        assert_eq!(store.load(), Preferences::default());
    }
}
