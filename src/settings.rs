use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::error::TimelineResult;
use crate::timeline::{TimelineConfig, TimelineConfigOverrides};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredSettings {
    defaults: TimelineConfig,
    users: HashMap<String, TimelineConfigOverrides>,
}

/// System-wide timeline defaults plus per-user overrides, kept in a JSON
/// file. Without a path the store lives in memory only.
pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<StoredSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            StoredSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    pub fn in_memory(defaults: TimelineConfig) -> Self {
        Self {
            path: None,
            data: RwLock::new(StoredSettings {
                defaults,
                users: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoredSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoredSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn defaults(&self) -> TimelineConfig {
        self.read().defaults.clone()
    }

    pub fn update_defaults(&self, defaults: TimelineConfig) -> Result<()> {
        let mut guard = self.write();
        guard.defaults = defaults;
        self.persist(&guard)
    }

    pub fn user_overrides(&self, user_id: &str) -> Option<TimelineConfigOverrides> {
        self.read().users.get(user_id).cloned()
    }

    pub fn set_user_overrides(&self, user_id: &str, overrides: TimelineConfigOverrides) -> Result<()> {
        let mut guard = self.write();
        guard.users.insert(user_id.to_string(), overrides);
        self.persist(&guard)
    }

    pub fn clear_user_overrides(&self, user_id: &str) -> Result<()> {
        let mut guard = self.write();
        if guard.users.remove(user_id).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }

    /// Defaults with the user's overrides applied, validated.
    pub fn resolve_config(&self, user_id: &str) -> TimelineResult<TimelineConfig> {
        let config = {
            let guard = self.read();
            match guard.users.get(user_id) {
                Some(overrides) => guard.defaults.with_overrides(overrides),
                None => guard.defaults.clone(),
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn persist(&self, data: &StoredSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = read_settings(path)?;
        *self.write() = data;
        Ok(())
    }
}

fn read_settings(path: &Path) -> Result<StoredSettings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))
}
