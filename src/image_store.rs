//! Object storage holding the image files themselves.
//!
//! The backing store only ever sees image names; the bytes live here, under
//! one directory per device class.

use async_trait::async_trait;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::device::DeviceClass;
use crate::error::{Error, Result};

/// Sidecar files written by directory-listing tools, never served.
const SIDECAR_SUFFIX: &str = ".alist";

static IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[^/\\]+\.(jpe?g|png|gif|bmp|webp)$").expect("image name pattern compiles")
});

/// Bare file name with an image extension.
pub fn is_image_name(name: &str) -> bool {
    name != "." && name != ".." && IMAGE_NAME.is_match(name)
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Image names stored for `class`, sorted.
    async fn list(&self, class: DeviceClass) -> Result<Vec<String>>;

    /// Store `bytes` as `name`, replacing any existing object.
    async fn put(&self, class: DeviceClass, name: &str, bytes: &[u8]) -> Result<()>;

    /// Delete `name`. Returns false if it did not exist.
    async fn delete(&self, class: DeviceClass, name: &str) -> Result<bool>;
}

/// Images on the local filesystem at `{root}/{class}/{name}`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn class_dir(&self, class: DeviceClass) -> PathBuf {
        self.root.join(class.as_str())
    }

    fn object_path(&self, class: DeviceClass, name: &str) -> Result<PathBuf> {
        if !is_image_name(name) {
            return Err(Error::InvalidRequest(format!(
                "'{}' is not a valid image file name",
                name
            )));
        }
        Ok(self.class_dir(class).join(name))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn list(&self, class: DeviceClass) -> Result<Vec<String>> {
        let dir = self.class_dir(class);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(device = %class, dir = %dir.display(), "Image directory missing, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::ImageStore(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    async fn put(&self, class: DeviceClass, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(class, name)?;
        tokio::fs::create_dir_all(self.class_dir(class)).await?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::ImageStore(format!("Failed to write {}: {}", path.display(), e)))?;

        info!(device = %class, image = %name, bytes = bytes.len(), "Stored image");
        Ok(())
    }

    async fn delete(&self, class: DeviceClass, name: &str) -> Result<bool> {
        let path = self.object_path(class, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(device = %class, image = %name, "Deleted image");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::ImageStore(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_image_name_pattern() {
        for ok in ["a.jpg", "b.JPEG", "sunset 01.png", "x.webp", "y.bmp", "z.gif"] {
            assert!(is_image_name(ok), "{ok} should be accepted");
        }
        for bad in ["a.txt", "noext", "../a.jpg", "dir/a.jpg", "dir\\a.png", ".jpg", "a.jpg.alist"] {
            assert!(!is_image_name(bad), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_put_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsImageStore::new(dir.path());

        store.put(DeviceClass::Pc, "b.jpg", b"b").await.unwrap();
        store.put(DeviceClass::Pc, "a.png", b"a").await.unwrap();
        store.put(DeviceClass::Mobile, "m.jpg", b"m").await.unwrap();

        assert_eq!(store.list(DeviceClass::Pc).await.unwrap(), vec!["a.png", "b.jpg"]);
        assert!(store.delete(DeviceClass::Pc, "a.png").await.unwrap());
        assert!(!store.delete(DeviceClass::Pc, "a.png").await.unwrap());
        assert_eq!(store.list(DeviceClass::Pc).await.unwrap(), vec!["b.jpg"]);
        assert_eq!(store.list(DeviceClass::Mobile).await.unwrap(), vec!["m.jpg"]);
    }

    #[tokio::test]
    async fn test_listing_skips_sidecars_and_directories() {
        let dir = TempDir::new().unwrap();
        let pc = dir.path().join("pc");
        std::fs::create_dir_all(pc.join("nested")).unwrap();
        std::fs::write(pc.join("keep.jpg"), b"x").unwrap();
        std::fs::write(pc.join("index.alist"), b"x").unwrap();

        let store = FsImageStore::new(dir.path());
        assert_eq!(store.list(DeviceClass::Pc).await.unwrap(), vec!["keep.jpg"]);
    }

    #[tokio::test]
    async fn test_missing_class_directory_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = FsImageStore::new(dir.path());
        assert!(store.list(DeviceClass::Mobile).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsImageStore::new(dir.path());
        let err = store
            .put(DeviceClass::Pc, "../escape.jpg", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
