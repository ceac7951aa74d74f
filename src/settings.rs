//! Configuration management for qcflow.
//!
//! Settings are read from INI files with hierarchical precedence:
//!
//! 1. Local configuration (`./qcflow_config.cfg`)
//! 2. User configuration (`~/.config/qcflow/qcflow_config.cfg`)
//! 3. System configuration (`/etc/qcflow/qcflow_config.cfg`)
//! 4. Built-in defaults
//!
//! Each file only overrides the keys it actually contains, so a local file
//! with a single `[executables] orca = ...` line keeps everything else from
//! the user and system layers.
//!
//! ```ini
//! [executables]
//! orca = /opt/orca/orca
//! xtb =
//! crest =
//! dftbplus =
//! mpirun =
//! dftb_param_dir = /opt/dftb/slakos
//!
//! [general]
//! default_ncores = 0
//! default_maxcore = 750
//! mpi_flags =
//! timeout = 0
//!
//! [scratch]
//! base_dir =
//! remove_tdir = true
//!
//! [report]
//! enabled = true
//! directory = output_files
//!
//! [logging]
//! level = info
//! ```

use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// File name searched in the local, user and system configuration directories.
pub const CONFIG_FILE_NAME: &str = "qcflow_config.cfg";

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Main configuration structure containing all program settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Locations of the external engines
    pub executables: ExecutableSettings,
    /// Resource defaults
    pub general: GeneralSettings,
    /// Scratch directory policy
    pub scratch: ScratchSettings,
    /// Report side-channel
    pub report: ReportSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Paths of the external executables. Empty means "look up on `PATH`".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutableSettings {
    /// ORCA binary; ORCA must be called by its full path for parallel runs
    pub orca: String,
    /// xTB binary
    pub xtb: String,
    /// CREST binary
    pub crest: String,
    /// DFTB+ binary
    pub dftbplus: String,
    /// MPI launcher used by DFTB+ in `mpi` mode
    pub mpirun: String,
    /// Slater-Koster parameter root; empty falls back to `DFTBPLUS_PARAM_DIR`
    pub dftb_param_dir: String,
}

/// Resource defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralSettings {
    /// Default core count, 0 uses every available core (default: 0)
    pub default_ncores: usize,
    /// Default memory per core in MB (default: 750)
    pub default_maxcore: u32,
    /// Extra flags handed to ORCA / mpirun (default: empty)
    pub mpi_flags: String,
    /// Engine timeout in seconds, 0 waits forever (default: 0)
    pub timeout: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            default_ncores: 0,
            default_maxcore: crate::job::DEFAULT_MAXCORE,
            mpi_flags: String::new(),
            timeout: 0,
        }
    }
}

/// Scratch directory policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScratchSettings {
    /// Parent of every scratch directory, empty is the current directory
    pub base_dir: String,
    /// Remove scratch directories after a successful parse (default: true)
    pub remove_tdir: bool,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            remove_tdir: true,
        }
    }
}

/// Report side-channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSettings {
    /// Copy logs and append summaries (default: true)
    pub enabled: bool,
    /// Report directory (default: "output_files")
    pub directory: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "output_files".to_string(),
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

type Section = HashMap<String, Option<String>>;

/// Configuration manager that handles loading and accessing program settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the system, user and local files, in that order.
    ///
    /// A file that fails to parse is skipped with a warning.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();

        let candidates = [
            ("system", Self::get_system_config_path()),
            ("user", Self::get_user_config_path()),
            ("local", Some(PathBuf::from(CONFIG_FILE_NAME))),
        ];
        for (layer, path) in candidates {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            match settings.apply_file(&path) {
                Ok(()) => {
                    config_source = format!("{} config ({})", layer, path.display());
                    debug!("Loaded {} configuration from: {}", layer, path.display());
                }
                Err(e) => warn!("Failed to load {} config from {}: {}", layer, path.display(), e),
            }
        }

        info!("Configuration loaded from: {}", config_source);
        Ok(Self {
            settings,
            config_source,
        })
    }

    /// Builds a manager from a single file layered over the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        settings.apply_file(path)?;
        Ok(Self {
            settings,
            config_source: format!("file ({})", path.display()),
        })
    }

    /// Wraps already built settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            config_source: "in-memory".to_string(),
        }
    }

    /// Returns the source of the loaded configuration.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Gets the executable settings.
    pub fn executables(&self) -> &ExecutableSettings {
        &self.settings.executables
    }

    /// Gets the general settings.
    pub fn general(&self) -> &GeneralSettings {
        &self.settings.general
    }

    /// Gets the scratch settings.
    pub fn scratch(&self) -> &ScratchSettings {
        &self.settings.scratch
    }

    /// Gets the report settings.
    pub fn report(&self) -> &ReportSettings {
        &self.settings.report
    }

    /// Gets the logging settings.
    pub fn logging(&self) -> &LoggingSettings {
        &self.settings.logging
    }

    /// Parent directory for scratch directories.
    pub fn scratch_base(&self) -> PathBuf {
        if self.settings.scratch.base_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.settings.scratch.base_dir)
        }
    }

    /// Engine timeout, `None` when waiting forever.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        match self.settings.general.timeout {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }

    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/qcflow").join(CONFIG_FILE_NAME))
        }
        #[cfg(windows)]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("qcflow").join(CONFIG_FILE_NAME))
        }
    }

    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME").ok().map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("qcflow")
                    .join(CONFIG_FILE_NAME)
            })
        }
        #[cfg(windows)]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("qcflow").join(CONFIG_FILE_NAME))
        }
    }

    /// Writes a commented configuration template holding the built-in defaults.
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, Self::generate_template_content())?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }

    fn generate_template_content() -> String {
        let defaults = Settings::default();
        format!(
            r#"# qcflow configuration file
#
# Files are loaded in this order, later files override earlier ones:
#
# 1. System config (/etc/qcflow/qcflow_config.cfg)
# 2. User config (~/.config/qcflow/qcflow_config.cfg)
# 3. Current working directory (./qcflow_config.cfg)
#
# Missing keys keep the built-in defaults shown below.

[executables]
# Full paths of the engines. Leave empty to search PATH.
# ORCA needs its full path for parallel runs; PATH lookup resolves it.
orca = {}
xtb = {}
crest = {}
dftbplus = {}
mpirun = {}

# Slater-Koster parameter root for DFTB+ (empty: $DFTBPLUS_PARAM_DIR)
dftb_param_dir = {}

[general]
# Default core count, 0 uses every available core
default_ncores = {}

# Default memory per core in MB (ORCA %maxcore)
default_maxcore = {}

# Extra flags passed to ORCA and mpirun, e.g. --bind-to none
mpi_flags = {}

# Kill an engine after this many seconds, 0 waits forever
timeout = {}

[scratch]
# Parent directory of the per-calculation scratch directories
base_dir = {}

# Remove scratch directories after successful calculations
remove_tdir = {}

[report]
# Copy every engine log and append a line to <name>.summary
enabled = {}
directory = {}

[logging]
# Log level: debug, info, warn, error
level = {}
"#,
            defaults.executables.orca,
            defaults.executables.xtb,
            defaults.executables.crest,
            defaults.executables.dftbplus,
            defaults.executables.mpirun,
            defaults.executables.dftb_param_dir,
            defaults.general.default_ncores,
            defaults.general.default_maxcore,
            defaults.general.mpi_flags,
            defaults.general.timeout,
            defaults.scratch.base_dir,
            defaults.scratch.remove_tdir,
            defaults.report.enabled,
            defaults.report.directory,
            defaults.logging.level,
        )
    }
}

impl Settings {
    /// Overrides the keys present in the INI file at `path`.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path)?;
        self.apply_str(&content)
    }

    /// Overrides the keys present in INI `content`.
    pub fn apply_str(&mut self, content: &str) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;
        let map = ini.get_map_ref();

        if let Some(section) = map.get("executables") {
            let exe = &mut self.executables;
            for (key, slot) in [
                ("orca", &mut exe.orca),
                ("xtb", &mut exe.xtb),
                ("crest", &mut exe.crest),
                ("dftbplus", &mut exe.dftbplus),
                ("mpirun", &mut exe.mpirun),
                ("dftb_param_dir", &mut exe.dftb_param_dir),
            ] {
                set_string(section, key, slot);
            }
        }
        if let Some(section) = map.get("general") {
            set_parsed(section, "default_ncores", &mut self.general.default_ncores)?;
            set_parsed(section, "default_maxcore", &mut self.general.default_maxcore)?;
            set_string(section, "mpi_flags", &mut self.general.mpi_flags);
            set_parsed(section, "timeout", &mut self.general.timeout)?;
            if self.general.default_maxcore == 0 {
                return Err(ConfigError::InvalidValue(
                    "default_maxcore must be greater than 0".to_string(),
                ));
            }
        }
        if let Some(section) = map.get("scratch") {
            set_string(section, "base_dir", &mut self.scratch.base_dir);
            set_parsed(section, "remove_tdir", &mut self.scratch.remove_tdir)?;
        }
        if let Some(section) = map.get("report") {
            set_parsed(section, "enabled", &mut self.report.enabled)?;
            set_string(section, "directory", &mut self.report.directory);
        }
        if let Some(section) = map.get("logging") {
            set_string(section, "level", &mut self.logging.level);
        }
        Ok(())
    }
}

fn set_string(section: &Section, key: &str, slot: &mut String) {
    if let Some(Some(value)) = section.get(key) {
        *slot = value.trim().to_string();
    }
}

fn set_parsed<T: FromStr>(section: &Section, key: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Some(Some(value)) = section.get(key) {
        if value.trim().is_empty() {
            return Ok(());
        }
        *slot = value.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("Invalid {}: {}", key, value))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        SettingsManager::create_template(&path).unwrap();
        let manager = SettingsManager::from_file(&path).unwrap();
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_layer_overrides_only_present_keys() {
        let mut settings = Settings::default();
        settings
            .apply_str("[general]\ndefault_maxcore = 2000\n[executables]\norca = /opt/orca/orca\n")
            .unwrap();
        settings.apply_str("[general]\ntimeout = 60\n").unwrap();

        assert_eq!(settings.general.default_maxcore, 2000);
        assert_eq!(settings.general.timeout, 60);
        assert_eq!(settings.executables.orca, "/opt/orca/orca");
        assert!(settings.scratch.remove_tdir);
    }

    #[test]
    fn test_invalid_values() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.apply_str("[scratch]\nremove_tdir = maybe\n"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            settings.apply_str("[general]\ndefault_maxcore = 0\n"),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_timeout_and_scratch_base() {
        let mut settings = Settings::default();
        let manager = SettingsManager::from_settings(settings.clone());
        assert!(manager.timeout().is_none());
        assert_eq!(manager.scratch_base(), PathBuf::from("."));

        settings.general.timeout = 5;
        settings.scratch.base_dir = "/tmp/qc".to_string();
        let manager = SettingsManager::from_settings(settings);
        assert_eq!(manager.timeout(), Some(std::time::Duration::from_secs(5)));
        assert_eq!(manager.scratch_base(), PathBuf::from("/tmp/qc"));
    }
}
