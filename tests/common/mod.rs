//! Shared fixtures for the facade tests: a temporary workspace holding fake
//! engine executables, a scratch base and a report directory.

#![allow(dead_code)]

use qcflow::engines::EngineContext;
use qcflow::settings::{Settings, SettingsManager};
use qcflow::{Geometry, Molecule};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn scratch_base(&self) -> PathBuf {
        self.path().join("scratch")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.path().join("reports")
    }

    /// Writes an executable `/bin/sh` script standing in for an engine.
    pub fn fake_engine(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Settings pointing every engine at `exe`, with two cores and the
    /// workspace scratch and report directories.
    pub fn settings(&self, configure: impl FnOnce(&mut Settings)) -> SettingsManager {
        let mut settings = Settings::default();
        settings.general.default_ncores = 2;
        settings.scratch.base_dir = self.scratch_base().to_string_lossy().to_string();
        settings.report.directory = self.report_dir().to_string_lossy().to_string();
        configure(&mut settings);
        SettingsManager::from_settings(settings)
    }

    pub fn context(&self, configure: impl FnOnce(&mut Settings)) -> EngineContext {
        EngineContext::new(self.settings(configure))
    }

    /// Directories left in the scratch base.
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.scratch_base()) {
            Ok(entries) => {
                let mut dirs: Vec<PathBuf> = entries
                    .map(|e| e.unwrap().path())
                    .filter(|p| p.is_dir())
                    .collect();
                dirs.sort();
                dirs
            }
            Err(_) => Vec::new(),
        }
    }

    /// The only directory left in the scratch base.
    pub fn kept_scratch(&self) -> PathBuf {
        let dirs = self.scratch_dirs();
        assert_eq!(dirs.len(), 1, "expected one scratch directory, found {:?}", dirs);
        dirs[0].clone()
    }
}

pub fn hydrogen(name: &str) -> Molecule {
    let geometry = Geometry::new(
        vec!["H".to_string(), "H".to_string()],
        vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.74],
    )
    .unwrap();
    Molecule::new(name, geometry, 0, 1).unwrap()
}

pub fn propane(name: &str) -> Molecule {
    let geometry = Geometry::new(
        vec!["C".to_string(), "C".to_string(), "C".to_string()],
        vec![0.0, 0.0, 0.0, 1.54, 0.0, 0.0, 3.08, 0.0, 0.0],
    )
    .unwrap();
    Molecule::new(name, geometry, 0, 1).unwrap()
}
