use std::io::Write;
use std::path::{Path, PathBuf};

/// Manages the watchdog data directory layout.
///
/// Everything the process persists lives under a single directory (default
/// `.interface-watchdog/`). This struct names each well-known file.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `.interface-watchdog/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the restart checkpoint.
    pub fn checkpoint(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    /// Path to the status snapshot file.
    pub fn status(&self) -> PathBuf {
        self.root.join("status.json")
    }

    /// Path to the singleton lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Create the directory if it does not exist.
    /// Returns Ok(true) if it was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        Ok(created)
    }

    /// Take the exclusive process lock on this directory.
    ///
    /// The lock is held for as long as the returned file stays open.
    pub fn acquire_lock(&self) -> std::io::Result<std::fs::File> {
        use fs2::FileExt;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock())?;
        file.try_lock_exclusive()?;
        Ok(file)
    }
}

/// Replace `path` with `contents` so readers never observe a partial write.
///
/// Writes a temporary file in the same directory, flushes it, then renames
/// it over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_paths() {
        let dd = DataDir::new(".interface-watchdog");
        assert_eq!(dd.root(), Path::new(".interface-watchdog"));
        assert_eq!(
            dd.checkpoint(),
            PathBuf::from(".interface-watchdog/checkpoint.json")
        );
        assert_eq!(dd.status(), PathBuf::from(".interface-watchdog/status.json"));
        assert_eq!(dd.lock(), PathBuf::from(".interface-watchdog/lock"));
    }

    #[test]
    fn test_init_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path().join("data"));

        assert!(dd.init().unwrap());
        assert!(dd.root().exists());
        assert!(!dd.init().unwrap());
    }

    #[test]
    fn test_second_lock_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path());

        let held = dd.acquire_lock().unwrap();
        assert!(dd.acquire_lock().is_err());
        drop(held);
        assert!(dd.acquire_lock().is_ok());
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp file should be renamed away");
    }

    #[test]
    fn test_write_atomic_to_nonexistent_dir_fails() {
        let result = write_atomic(Path::new("/nonexistent/dir/state.json"), b"x");
        assert!(result.is_err());
    }
}
