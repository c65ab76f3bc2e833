use std::sync::Arc;

use anyhow::{Context, Result};
use thumbnail_cache::{AssetLayout, ThumbnailConfig, ThumbnailStore};

use super::config::Config;

pub struct State {
    pub config: Config,
    pub store: Arc<ThumbnailStore>,
}

impl State {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let layout = AssetLayout::new(&config.storage_root).with_context(|| {
            format!("Failed to resolve storage root {}", config.storage_root.display())
        })?;
        let store = Arc::new(ThumbnailStore::new(layout, ThumbnailConfig::default()));

        Ok(Arc::new(Self { config, store }))
    }
}
