use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory URL `/` maps onto; `/profile` is served from `<storage_root>/profile`
    pub storage_root: PathBuf,
    pub max_upload_bytes: usize,
    pub warmup_on_start: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("SERVER_PORT", "8080")?,
            storage_root: try_load("STORAGE_ROOT", ".")?,
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", "20971520")?,
            warmup_on_start: try_load("WARMUP_ON_START", "true")?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Environment misconfigured: {key}={raw:?} ({e})")
    })
}
