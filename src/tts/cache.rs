//! Temporary audio cache files

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::Result;

/// Unique, sortable cache file stem: `YYYYmmdd_HHMMSS_<8 hex>`
#[must_use]
pub fn cache_file_stem() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        &id[..8]
    )
}

/// Path for a cache file, creating the cache directory if needed
///
/// # Errors
///
/// Returns error if the cache directory cannot be created
pub fn cache_file_path(dir: &Path, stem: &str, extension: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.join(format!("{stem}.{extension}")))
}

/// Remove a cache file, logging instead of failing
pub fn remove_cached(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "audio cache file cleaned"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove audio cache file"
        ),
    }
}

/// A cache file that is deleted on drop unless [`persist`](Self::persist)ed
///
/// Backends write through one of these so that an error or a cancelled
/// request never leaves a partial file behind.
#[derive(Debug)]
pub struct CacheFile {
    path: Option<PathBuf>,
}

impl CacheFile {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Path of the file being written
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Keep the file and hand ownership of it to the caller
    #[must_use]
    pub fn persist(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for CacheFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_cached(&path);
        }
    }
}
