use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::identity::{generate_devices, DEVICE_POOL_SIZE};
use super::types::{Credential, PersistedSettings, Region};
use super::xmltv::write_atomic;

pub const MAX_CREDENTIALS: usize = 4;

/// What an update actually changed, so the caller knows whether sessions
/// must be dropped.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub credentials_changed: bool,
    pub regions_changed: bool,
    pub settings: PersistedSettings,
}

// ── SettingsStore – wraps all persisted state ──────────────────────────────────

pub struct SettingsStore {
    data: Arc<RwLock<PersistedSettings>>,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Load from disk synchronously (file is small – safe to block on startup).
    /// A missing or mis-sized device pool is regenerated and written back so
    /// the same fingerprints survive restarts. An unparseable file is copied
    /// aside and never overwritten here.
    pub fn load(data_dir: PathBuf) -> Self {
        let file_path = data_dir.join("settings.json");
        let (mut data, writable) = match std::fs::read_to_string(&file_path) {
            Ok(raw) => match serde_json::from_str::<PersistedSettings>(&raw) {
                Ok(data) => (data, true),
                Err(e) => {
                    warn!("[settings] unreadable settings file, using defaults: {e}");
                    back_up(&file_path);
                    (PersistedSettings::default(), false)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (PersistedSettings::default(), true),
            Err(e) => {
                error!("[settings] read error: {e}");
                (PersistedSettings::default(), false)
            }
        };

        if data.devices.len() != DEVICE_POOL_SIZE {
            info!("[settings] generating device pool of {DEVICE_POOL_SIZE}");
            data.devices = generate_devices(DEVICE_POOL_SIZE);
            if writable {
                write_blocking(&file_path, &data);
            }
        }

        Self {
            data: Arc::new(RwLock::new(data)),
            file_path,
        }
    }

    async fn save(&self) {
        let data = self.data.read().await;
        match serde_json::to_string_pretty(&*data) {
            Ok(json) => {
                if let Some(parent) = self.file_path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = write_atomic(&self.file_path, json.as_bytes()).await {
                    error!("[settings] write error: {e}");
                }
            }
            Err(e) => error!("[settings] serialize error: {e}"),
        }
    }

    pub async fn get_settings(&self) -> PersistedSettings {
        self.data.read().await.clone()
    }

    pub async fn credentials(&self) -> Vec<Credential> {
        self.data.read().await.credentials.clone()
    }

    pub async fn devices(&self) -> Vec<String> {
        self.data.read().await.devices.clone()
    }

    /// Selected regions, de-duplicated, in selection order.
    pub async fn active_regions(&self) -> Vec<Region> {
        let data = self.data.read().await;
        let mut regions: Vec<Region> = Vec::with_capacity(data.regions.len());
        for region in &data.regions {
            if !regions.contains(region) {
                regions.push(*region);
            }
        }
        regions
    }

    pub async fn update(
        &self,
        regions: Option<Vec<Region>>,
        credentials: Option<Vec<Credential>>,
    ) -> SettingsChange {
        let (credentials_changed, regions_changed) = {
            let mut data = self.data.write().await;

            let regions_changed = match regions {
                Some(regions) if regions != data.regions => {
                    data.regions = regions;
                    true
                }
                _ => false,
            };

            let credentials_changed = match credentials {
                Some(credentials) => {
                    let credentials: Vec<Credential> = credentials
                        .into_iter()
                        .map(|c| Credential {
                            username: c.username.trim().to_string(),
                            password: c.password,
                        })
                        .filter(Credential::is_complete)
                        .take(MAX_CREDENTIALS)
                        .collect();
                    if credentials != data.credentials {
                        data.credentials = credentials;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            (credentials_changed, regions_changed)
        };

        if credentials_changed || regions_changed {
            self.save().await;
        }

        SettingsChange {
            credentials_changed,
            regions_changed,
            settings: self.data.read().await.clone(),
        }
    }
}

fn backup_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

fn back_up(file_path: &Path) {
    let backup = backup_path(file_path);
    match std::fs::copy(file_path, &backup) {
        Ok(_) => warn!("[settings] kept a copy of the unreadable file at {}", backup.display()),
        Err(e) => error!("[settings] backup error: {e}"),
    }
}

/// Blocking twin of `xmltv::write_atomic`, for use before the runtime is busy.
fn write_blocking(file_path: &Path, data: &PersistedSettings) {
    let json = match serde_json::to_string_pretty(data) {
        Ok(json) => json,
        Err(e) => {
            error!("[settings] serialize error: {e}");
            return;
        }
    };
    if let Some(parent) = file_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let tmp = file_path.with_extension("json.tmp");
    let written = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, file_path));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        error!("[settings] write error: {e}");
    }
}
