use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{IoResultExt, Result};

/// scratch directory where the input archive is expanded and the output
/// archive is assembled
///
/// the directory is removed when the guard drops, on normal and error exits
/// alike; [`Staging::keep`] dissolves the guard for post-mortem inspection.
pub struct Staging {
    dir: Option<tempfile::TempDir>,
    path: PathBuf,
}

impl Staging {
    /// create a fresh staging directory
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("imgsquash-")
            .tempdir()
            .with_path("<tempdir>")?;
        let path = dir.path().to_path_buf();
        debug!("staging directory {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// staging root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// retain the directory on exit instead of deleting it
    pub fn keep(mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            let _ = dir.keep();
        }
        debug!("retaining staging directory {}", self.path.display());
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let staging = Staging::new().unwrap();
        let path = staging.path().to_path_buf();
        assert!(path.is_dir());
        drop(staging);
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_when_requested() {
        let staging = Staging::new().unwrap();
        let path = staging.keep();
        assert!(path.is_dir());
        std::fs::remove_dir_all(&path).unwrap();
    }
}
