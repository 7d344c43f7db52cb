use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::server::upstream::Endpoints;

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_EPG_INTERVAL_MINS: u64 = 120;

/// Runtime configuration, read once at startup from the environment (and a
/// `.env` file when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub epg_interval: Duration,
    pub endpoints: Endpoints,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = var("PLUTO_DATA_DIR").map(PathBuf::from).unwrap_or_else(default_data_dir);
        let output_dir = var("PLUTO_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.clone());

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            boot_url: var("PLUTO_BOOT_URL").unwrap_or(defaults.boot_url),
            channels_url: var("PLUTO_CHANNELS_URL").unwrap_or(defaults.channels_url),
            stitcher_url: var("PLUTO_STITCHER_URL").unwrap_or(defaults.stitcher_url),
        };

        let interval_mins: u64 = parsed(var("PLUTO_EPG_INTERVAL_MINS"), "PLUTO_EPG_INTERVAL_MINS", DEFAULT_EPG_INTERVAL_MINS);

        Self {
            port: parsed(var("PLUTO_PORT"), "PLUTO_PORT", DEFAULT_PORT),
            data_dir,
            output_dir,
            epg_interval: Duration::from_secs(interval_mins.max(1) * 60),
            endpoints,
        }
    }
}

fn parsed<T: FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{key}={raw} is not valid, using default");
            default
        }),
        None => default,
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pluto-channels")
}
