use std::path::{Path, PathBuf};

/// A temporary file that is unlinked when the guard is dropped, whether the
/// pipeline that produced it finished or bailed out halfway.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    /// Reserve a uniquely named path in `dir`. Nothing is created on disk.
    pub fn new_in(dir: &Path, prefix: &str, extension: &str) -> Self {
        let name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4().simple(), extension);
        Self { path: dir.join(name) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed temp file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove temp file {}: {}", self.path.display(), e),
        }
    }
}
