use std::io::{self, ErrorKind};
use std::path::PathBuf;

use async_trait::async_trait;

/// Storage for uploaded hotel and room images, addressed by key.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Remove one stored image. Removing a key that is not there succeeds.
    async fn delete(&self, key: &str) -> io::Result<()>;
}

/// The storage key of an image URL: everything after the last `/`.
pub fn image_key(url: &str) -> Option<&str> {
    url.rsplit('/').next().filter(|k| !k.is_empty())
}

/// Images stored as flat files in one upload directory.
#[derive(Debug, Clone)]
pub struct DiskImageStore {
    root: PathBuf,
}

impl DiskImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let bad = key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\', '\0'])
            || key.contains("..");
        if bad {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid image key: {key:?}"),
            ));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ImageStore for DiskImageStore {
    async fn delete(&self, key: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_uploads").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn key_is_last_url_segment() {
        assert_eq!(image_key("https://utfs.io/f/abc123.png"), Some("abc123.png"));
        assert_eq!(image_key("abc123.png"), Some("abc123.png"));
        assert_eq!(image_key("https://utfs.io/f/"), None);
        assert_eq!(image_key(""), None);
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = test_dir("delete_removes_file");
        let file = dir.join("room.png");
        std::fs::write(&file, b"png").unwrap();

        let store = DiskImageStore::new(&dir);
        store.delete("room.png").await.unwrap();
        assert!(!file.exists());
        // second delete is a no-op
        store.delete("room.png").await.unwrap();
    }

    #[tokio::test]
    async fn delete_rejects_traversal() {
        let dir = test_dir("delete_rejects_traversal");
        let outside = dir.parent().unwrap().join("keep.txt");
        std::fs::write(&outside, b"keep").unwrap();

        let store = DiskImageStore::new(&dir);
        for key in ["../keep.txt", "a/b.png", ".hidden", "", "..\\keep.txt"] {
            let err = store.delete(key).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "key {key:?}");
        }
        assert!(outside.exists());
    }
}
