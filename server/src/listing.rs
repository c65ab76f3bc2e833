//! Directory listings and paging shared by the image and file endpoints

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::Deserialize;
use thumbnail_cache::AssetLayout;
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 60;

#[derive(Debug, Clone)]
pub struct AssetMeta {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Walk `root` for files accepted by `keep`, never descending into `pruned` directories.
/// Unreadable entries are skipped.
pub fn collect_assets(
    layout: &AssetLayout,
    root: &Path,
    pruned: &[PathBuf],
    keep: impl Fn(&str) -> bool,
) -> Vec<AssetMeta> {
    if !root.is_dir() {
        return Vec::new();
    }

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir() && pruned.iter().any(|dir| entry.path() == dir))
    });

    let mut assets = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !keep(name) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Some(url) = layout.path_to_url(entry.path()) else {
            continue;
        };

        assets.push(AssetMeta {
            name: name.to_string(),
            url,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    sort_newest_first(&mut assets);
    assets
}

/// Newest first; ties broken by URL, descending
pub fn sort_newest_first(assets: &mut [AssetMeta]) {
    assets.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.url.cmp(&a.url)));
}

/// `pageNum`/`pageSize` query parameters. Unparseable values fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    #[serde(rename = "pageNum")]
    pub page_num: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<String>,
}

impl Paging {
    /// Slice of a `total`-element listing this page covers
    pub fn window(&self, total: usize) -> Range<usize> {
        let page_num = parse_positive(self.page_num.as_deref()).unwrap_or(1);
        let page_size = parse_positive(self.page_size.as_deref())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);

        let start = (page_num - 1).saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        start..end
    }
}

fn parse_positive(raw: Option<&str>) -> Option<usize> {
    raw?.trim().parse::<usize>().ok().filter(|value| *value >= 1)
}

pub fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
