//! Throwaway feature trees.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory holding `.feature` files; removed on drop.
#[derive(Debug)]
pub struct FeatureDir {
    dir: TempDir,
}

impl FeatureDir {
    /// Create an empty tree.
    ///
    /// # Panics
    ///
    /// Panics when the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create feature dir"),
        }
    }

    /// Write `source` to `relative`, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written.
    pub fn write(&self, relative: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create feature parent");
        }
        fs::write(&path, source).expect("write feature file");
        path
    }

    /// Builder form of [`Self::write`].
    #[must_use]
    pub fn with(self, relative: &str, source: &str) -> Self {
        self.write(relative, source);
        self
    }

    /// Root of the tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Root of the tree as a string argument.
    #[must_use]
    pub fn arg(&self) -> String {
        self.dir.path().display().to_string()
    }
}

impl Default for FeatureDir {
    fn default() -> Self {
        Self::new()
    }
}
