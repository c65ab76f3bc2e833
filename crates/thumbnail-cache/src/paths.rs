//! Asset layout and untrusted-path resolution
//!
//! Every asset is addressed by a URL-style path rooted at `/profile/upload/`. This module
//! maps those paths onto the storage root, decides which of them are thumbnail-eligible,
//! and confines externally supplied paths to a single category subtree before anything
//! touches the disk.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Public mount point of every uploaded asset
pub const UPLOAD_PREFIX: &str = "/profile/upload/";
/// Originals that may be thumbnailed
pub const IMAGE_PREFIX: &str = "/profile/upload/image/";
/// Opaque blobs, never thumbnailed
pub const FILE_PREFIX: &str = "/profile/upload/file/";
/// Derived thumbnails, owned by the cache manager
pub const THUMB_PREFIX: &str = "/profile/upload/thumb/";
/// Every thumbnail is a JPEG
pub const THUMB_EXTENSION: &str = "jpg";

/// Raster formats the decoder is handed
const RASTER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
/// Formats classified as images on upload and in listings
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "svg"];

/// Subtree an externally supplied path is allowed to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetCategory {
    Image,
    File,
}

impl AssetCategory {
    pub fn url_prefix(&self) -> &'static str {
        match self {
            AssetCategory::Image => IMAGE_PREFIX,
            AssetCategory::File => FILE_PREFIX,
        }
    }

    /// Category an uploaded file of this name is stored under
    pub fn for_file_name(name: &str) -> Self {
        if is_image_extension(name) {
            AssetCategory::Image
        } else {
            AssetCategory::File
        }
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetCategory::Image => write!(f, "image"),
            AssetCategory::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AssetPathError {
    #[error("asset path is empty")]
    EmptyInput,
    #[error("asset path is outside the {0} subtree")]
    OutOfScope(AssetCategory),
}

/// A path that passed [`AssetLayout::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    /// Canonical URL-style path, safe to echo back in responses
    pub url: String,
    /// Absolute filesystem path, strictly inside the category root
    pub path: PathBuf,
}

/// How the cache manager should treat a given asset URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Not an original raster image; served as-is
    Ineligible,
    /// Already a derived thumbnail; served as-is
    AlreadyThumbnail,
    /// An original with a derived thumbnail location
    Eligible { source_url: String, thumb_url: String },
}

/// Maps asset URLs onto a storage root.
///
/// The storage root is the directory URL `/` corresponds to, so `/profile/upload/image/a.png`
/// lives at `<storage_root>/profile/upload/image/a.png`.
#[derive(Debug, Clone)]
pub struct AssetLayout {
    storage_root: PathBuf,
}

impl AssetLayout {
    /// Create a layout over `storage_root`, made absolute against the working directory
    pub fn new(storage_root: impl AsRef<Path>) -> io::Result<Self> {
        let root = storage_root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };

        Ok(Self {
            storage_root: normalize_lexically(&absolute),
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.url_to_path(UPLOAD_PREFIX)
    }

    pub fn thumb_dir(&self) -> PathBuf {
        self.url_to_path(THUMB_PREFIX)
    }

    pub fn category_dir(&self, category: AssetCategory) -> PathBuf {
        self.url_to_path(category.url_prefix())
    }

    /// Filesystem location of an already-cleaned URL path
    pub fn url_to_path(&self, url: &str) -> PathBuf {
        let relative = url.trim_start_matches('/').trim_end_matches('/');
        self.storage_root.join(relative)
    }

    /// URL path of a file below the storage root; `None` for foreign or non UTF-8 paths
    pub fn path_to_url(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.storage_root).ok()?;
        let mut url = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    url.push('/');
                    url.push_str(part.to_str()?);
                }
                _ => return None,
            }
        }
        if url.is_empty() {
            return None;
        }
        Some(url)
    }

    /// Confine an untrusted path to `category`'s subtree.
    ///
    /// The lexical prefix test on the cleaned URL only filters out the obvious cases; the
    /// component-wise ancestor check on the absolute path is what guarantees containment.
    pub fn resolve(
        &self,
        raw: &str,
        category: AssetCategory,
    ) -> Result<ResolvedAsset, AssetPathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AssetPathError::EmptyInput);
        }

        let url = clean_url(&format!("/{}", trimmed.trim_start_matches('/')));
        if !url.starts_with(category.url_prefix()) {
            return Err(AssetPathError::OutOfScope(category));
        }

        let category_root = normalize_lexically(&self.category_dir(category));
        let target = normalize_lexically(&self.url_to_path(&url));
        if target == category_root || !target.starts_with(&category_root) {
            return Err(AssetPathError::OutOfScope(category));
        }

        Ok(ResolvedAsset { url, path: target })
    }
}

/// Decide whether `url` has a derived thumbnail and where it lives
pub fn classify(url: &str) -> Eligibility {
    let cleaned = clean_url(url);
    if cleaned.starts_with(THUMB_PREFIX) {
        return Eligibility::AlreadyThumbnail;
    }

    let Some(relative) = cleaned.strip_prefix(IMAGE_PREFIX) else {
        return Eligibility::Ineligible;
    };
    if relative.is_empty() || !is_thumbnailable_extension(relative) {
        return Eligibility::Ineligible;
    }

    let stem = match relative.rfind('.') {
        Some(dot) => &relative[..dot],
        None => relative,
    };
    let thumb_url = format!("{THUMB_PREFIX}{stem}.{THUMB_EXTENSION}");

    Eligibility::Eligible {
        source_url: cleaned,
        thumb_url,
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether `name` is classified as an image (upload routing, listings)
pub fn is_image_extension(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether `name` is a raster format the thumbnail pipeline accepts
pub fn is_thumbnailable_extension(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| RASTER_EXTENSIONS.contains(&ext.as_str()))
}

/// Lexically clean a slash-separated path: collapse `.`, `..` and repeated separators.
/// `..` never climbs above the root of a rooted path.
pub fn clean_url(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Collapse `.` and `..` of an absolute path without consulting the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("/profile//upload/./image/a.png"), "/profile/upload/image/a.png");
        assert_eq!(clean_url("/profile/upload/image/../../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_url("/../.."), "/");
        assert_eq!(clean_url("a/../../b"), "../b");
        assert_eq!(clean_url(""), ".");
        assert_eq!(clean_url("/profile/upload/image/"), "/profile/upload/image");
    }

    #[test]
    fn test_resolve_accepts_paths_inside_category() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let layout = AssetLayout::new(temp_dir.path())?;

        let resolved = layout.resolve("  /profile/upload/image/2024/a.png ", AssetCategory::Image)?;
        assert_eq!(resolved.url, "/profile/upload/image/2024/a.png");
        assert!(resolved.path.starts_with(layout.category_dir(AssetCategory::Image)));
        assert_ne!(resolved.path, layout.category_dir(AssetCategory::Image));
        assert!(resolved.path.ends_with("profile/upload/image/2024/a.png"));

        // Leading slash is optional, inner dot segments are collapsed
        let resolved = layout.resolve("profile/upload/file/./x/../b.pdf", AssetCategory::File)?;
        assert_eq!(resolved.url, "/profile/upload/file/b.pdf");
        Ok(())
    }

    #[test]
    fn test_resolve_rejects_traversal() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let layout = AssetLayout::new(temp_dir.path())?;

        for raw in [
            "/profile/upload/image/../../../etc/passwd",
            "/profile/upload/image/../file/a.txt",
            "/profile/upload/image/../../upload/image",
            "//etc/passwd",
            "/profile/upload/image/..",
        ] {
            assert_eq!(
                layout.resolve(raw, AssetCategory::Image),
                Err(AssetPathError::OutOfScope(AssetCategory::Image)),
                "{raw} should be rejected"
            );
        }
        Ok(())
    }

    #[test]
    fn test_resolve_rejects_empty_root_and_wrong_category() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let layout = AssetLayout::new(temp_dir.path())?;

        assert_eq!(layout.resolve("   ", AssetCategory::File), Err(AssetPathError::EmptyInput));
        assert!(layout.resolve("/profile/upload/image/", AssetCategory::Image).is_err());
        assert!(layout.resolve("/profile/upload/image/a.png", AssetCategory::File).is_err());
        assert!(layout.resolve("/profile/upload/thumb/a.jpg", AssetCategory::Image).is_err());
        Ok(())
    }

    #[test]
    fn test_relative_storage_root_is_made_absolute() -> anyhow::Result<()> {
        let layout = AssetLayout::new("./data/../storage")?;
        assert!(layout.storage_root().is_absolute());
        assert!(layout.storage_root().ends_with("storage"));
        assert!(!layout.storage_root().to_string_lossy().contains(".."));
        Ok(())
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("/profile/upload/image/a.png"),
            Eligibility::Eligible {
                source_url: "/profile/upload/image/a.png".to_string(),
                thumb_url: "/profile/upload/thumb/a.jpg".to_string(),
            }
        );
        assert_eq!(
            classify("/profile/upload/image/2024/05/Photo.JPEG"),
            Eligibility::Eligible {
                source_url: "/profile/upload/image/2024/05/Photo.JPEG".to_string(),
                thumb_url: "/profile/upload/thumb/2024/05/Photo.jpg".to_string(),
            }
        );
        assert_eq!(classify("/profile/upload/thumb/a.jpg"), Eligibility::AlreadyThumbnail);
        assert_eq!(classify("/profile/upload/file/a.png"), Eligibility::Ineligible);
        assert_eq!(classify("/profile/upload/image/logo.svg"), Eligibility::Ineligible);
        assert_eq!(classify("/static/a.png"), Eligibility::Ineligible);
        assert_eq!(classify("/profile/upload/image/../file/a.png"), Eligibility::Ineligible);
    }

    #[test]
    fn test_extension_gating() {
        assert!(is_image_extension("a.SVG"));
        assert!(!is_thumbnailable_extension("a.svg"));
        assert!(is_thumbnailable_extension("a.WebP"));
        assert!(!is_image_extension("report.pdf"));
        assert!(!is_image_extension("noext"));
        assert_eq!(AssetCategory::for_file_name("a.gif"), AssetCategory::Image);
        assert_eq!(AssetCategory::for_file_name("a.zip"), AssetCategory::File);
    }

    #[test]
    fn test_path_url_round_trip() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let layout = AssetLayout::new(temp_dir.path())?;

        let path = layout.url_to_path("/profile/upload/image/a b.png");
        assert_eq!(layout.path_to_url(&path).as_deref(), Some("/profile/upload/image/a b.png"));
        assert_eq!(layout.path_to_url(Path::new("/somewhere/else")), None);
        Ok(())
    }
}
