//! Per-calculation scratch directories.
//!
//! Each engine run happens in a fresh directory named
//! `{name}_XXXXXX_{suffix}_{calc}` under the configured base directory, so
//! concurrent calculations never share files. With `remove` set the
//! directory is deleted when the [`ScratchDir`] is dropped, whether the
//! calculation succeeded or not; otherwise it is left on disk.

use crate::error::Result;
use log::debug;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};

/// A scratch directory with a keep/remove policy.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a uniquely named directory inside `base`.
    pub fn create(base: &Path, name: &str, suffix: &str, calc: &str, remove: bool) -> Result<Self> {
        let prefix = format!("{}_", name);
        let tail = format!("_{}_{}", suffix, calc);
        let dir = Builder::new().prefix(&prefix).suffix(&tail).tempdir_in(base)?;
        debug!("Created scratch directory {}", dir.path().display());

        if remove {
            let path = dir.path().to_path_buf();
            Ok(Self { dir: Some(dir), path })
        } else {
            Ok(Self {
                path: dir.keep(),
                dir: None,
            })
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `file` inside the directory.
    pub fn join(&self, file: &str) -> PathBuf {
        self.path.join(file)
    }

    /// Whether the directory is deleted at the end of the calculation.
    pub fn removes(&self) -> bool {
        self.dir.is_some()
    }

    /// Ends the calculation: deletes the directory or reports where it stays.
    pub fn finish(self) -> Result<Option<PathBuf>> {
        match self.dir {
            Some(dir) => {
                dir.close()?;
                Ok(None)
            }
            None => {
                debug!("Keeping scratch directory {}", self.path.display());
                Ok(Some(self.path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_and_removal() {
        let base = TempDir::new().unwrap();
        let scratch = ScratchDir::create(base.path(), "water", "orca_PBE", "SPE", true).unwrap();
        let dir_name = scratch.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(dir_name.starts_with("water_"));
        assert!(dir_name.ends_with("_orca_PBE_SPE"));

        let path = scratch.path().to_path_buf();
        assert!(path.is_dir());
        assert_eq!(scratch.finish().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_directory_survives_drop() {
        let base = TempDir::new().unwrap();
        let path = {
            let scratch = ScratchDir::create(base.path(), "water", "xtb", "OPT", false).unwrap();
            assert!(!scratch.removes());
            let path = scratch.path().to_path_buf();
            assert_eq!(scratch.finish().unwrap(), Some(path.clone()));
            path
        };
        assert!(path.is_dir());
    }

    #[test]
    fn test_unique_directories() {
        let base = TempDir::new().unwrap();
        let a = ScratchDir::create(base.path(), "m", "s", "SPE", true).unwrap();
        let b = ScratchDir::create(base.path(), "m", "s", "SPE", true).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
