use log::{debug, warn};
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Error, Result};
use crate::storage::temporary_sibling;

/// Byte store holding data files.
///
/// `write` must give atomic visibility: a reader sees either no file or the whole file.
pub trait FileStore: Send + Sync {
    fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()>;
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    fn delete(&self, path: &Path) -> std::io::Result<()>;
    /// Removes `path` if it is an empty directory.
    fn remove_dir(&self, path: &Path) -> std::io::Result<()>;
}

/// File store over the local file system.
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    /// Writes into a hidden temporary sibling, then renames it into place.
    fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = temporary_sibling(path);
        match std::fs::write(&tmp_path, bytes) {
            // A failed insert may have removed the empty directory in between.
            Err(error) if error.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&tmp_path, bytes)?;
            }
            other => other?,
        }
        std::fs::rename(&tmp_path, path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp_path);
        })
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn delete(&self, path: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
        match std::fs::remove_dir(path) {
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

/// Writes a file, retrying transient faults up to `attempts` tries in total.
///
/// Returns: Ok or Serialization once the fault is permanent or attempts are exhausted
pub fn write_with_retry(
    store: &dyn FileStore,
    path: &Path,
    bytes: &[u8],
    attempts: u32,
) -> Result<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.write(path, bytes) {
            Ok(()) => return Ok(()),
            Err(error) if is_transient(error.kind()) && attempt < attempts => {
                warn!(
                    "Transient fault writing {} (attempt {attempt}/{attempts}): {error}",
                    path.display()
                );
                attempt += 1;
            }
            Err(error) => {
                return Err(Error::Serialization(format!(
                    "Failed to write {}: {error}",
                    path.display()
                )));
            }
        }
    }
}

/// Deletes files that will never be committed. Failures are logged, not returned.
pub fn discard_files<'a>(store: &dyn FileStore, paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        if let Err(error) = store.delete(path) {
            warn!(
                "Couldn't remove uncommitted file ({}). Remove it manually: {}",
                path.display(),
                error
            );
        }
    }
}

/// Removes directories created for partitions that were never committed.
///
/// `dirs` must be ordered deepest first. A directory that still has entries is kept.
pub fn discard_directories<'a>(store: &dyn FileStore, dirs: impl IntoIterator<Item = &'a Path>) {
    for dir in dirs {
        if let Err(error) = store.remove_dir(dir) {
            debug!("Keeping directory {}: {}", dir.display(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` writes with the given kind.
    struct FlakyStore {
        failures: AtomicU32,
        kind: ErrorKind,
    }

    impl FileStore for FlakyStore {
        fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(std::io::Error::from(self.kind));
            }
            LocalFileStore.write(path, bytes)
        }

        fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
            LocalFileStore.read(path)
        }

        fn delete(&self, path: &Path) -> std::io::Result<()> {
            LocalFileStore.delete(path)
        }

        fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
            LocalFileStore.remove_dir(path)
        }
    }

    #[test]
    fn test_local_write_is_atomic_rename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("file");
        LocalFileStore.write(&path, b"data").unwrap();

        assert_eq!(LocalFileStore.read(&path).unwrap(), b"data");
        assert!(!temporary_sibling(&path).exists());

        LocalFileStore.delete(&path).unwrap();
        LocalFileStore.delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_discard_directories_keeps_non_empty() {
        let dir = TempDir::new().unwrap();
        let outer = dir.path().join("a=1");
        let empty = outer.join("b=2");
        let busy = outer.join("b=3");
        std::fs::create_dir_all(&empty).unwrap();
        LocalFileStore.write(&busy.join("file"), b"data").unwrap();

        let missing = outer.join("b=4");
        discard_directories(
            &LocalFileStore,
            [
                empty.as_path(),
                busy.as_path(),
                missing.as_path(),
                outer.as_path(),
            ],
        );

        assert!(!empty.exists());
        assert!(busy.join("file").exists());
        assert!(outer.exists());
    }

    #[test]
    fn test_transient_faults_are_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        let store = FlakyStore {
            failures: AtomicU32::new(2),
            kind: ErrorKind::Interrupted,
        };

        write_with_retry(&store, &path, b"data", 3).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_retries_are_bounded() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore {
            failures: AtomicU32::new(5),
            kind: ErrorKind::TimedOut,
        };

        let result = write_with_retry(&store, &dir.path().join("file"), b"data", 3);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_permanent_fault_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore {
            failures: AtomicU32::new(1),
            kind: ErrorKind::PermissionDenied,
        };

        let path = dir.path().join("file");
        assert!(write_with_retry(&store, &path, b"data", 3).is_err());
        assert!(!path.exists());
    }
}
