//! TOML configuration for the e2e runner

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default report folder when `output_folder` is absent or `true`
pub const DEFAULT_OUTPUT_FOLDER: &str = "tests_output";

/// Default completion-signal timeout for async testcases and hooks
pub const DEFAULT_ASYNC_HOOK_TIMEOUT_MS: u64 = 10_000;

/// Default config file looked up when none is given
pub const DEFAULT_CONFIG_FILE: &str = "otter_e2e.toml";

/// Runner settings loaded from a TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Report destination; `false` disables report writing
    pub output_folder: OutputFolder,

    /// Discovery roots used when no source is passed explicitly
    pub src_folders: Vec<PathBuf>,

    /// Suppress per-testcase console lines
    pub silent: bool,

    /// Print anything to the console at all
    pub output: bool,

    /// Open a backend session for e2e modules
    pub start_session: bool,

    /// Skip the rest of a module after its first failed or errored testcase
    pub skip_testcases_on_fail: bool,

    /// File extensions recognized as test modules
    pub module_extensions: Vec<String>,

    /// Module path patterns (substring) excluded from discovery
    pub exclude: Vec<String>,

    /// Only discover modules whose path contains this pattern
    pub filter: Option<String>,

    /// Values exposed to testcases, plus the async timeout
    pub globals: Globals,

    /// Backend session parameters
    #[serde(alias = "selenium")]
    pub backend: BackendSettings,
}

/// Where reports go
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutputFolder {
    /// No report files are written
    Disabled,
    /// Reports are written under this root
    Path(PathBuf),
}

/// Testcase-visible globals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Globals {
    /// Completion-signal timeout in milliseconds
    #[serde(alias = "asyncHookTimeout")]
    pub async_hook_timeout: u64,

    /// Everything else, passed through untouched
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Backend session parameters (opaque to the scheduler)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub host: String,
    pub port: u16,
    pub start_process: bool,
    pub browser_name: String,

    /// Backend-specific keys
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_folder: OutputFolder::default(),
            src_folders: Vec::new(),
            silent: true,
            output: true,
            start_session: true,
            skip_testcases_on_fail: false,
            module_extensions: vec!["yaml".to_string(), "yml".to_string()],
            exclude: Vec::new(),
            filter: None,
            globals: Globals::default(),
            backend: BackendSettings::default(),
        }
    }
}

impl Default for OutputFolder {
    fn default() -> Self {
        OutputFolder::Path(PathBuf::from(DEFAULT_OUTPUT_FOLDER))
    }
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            async_hook_timeout: DEFAULT_ASYNC_HOOK_TIMEOUT_MS,
            values: serde_json::Map::new(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4444,
            start_process: false,
            browser_name: "firefox".to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

impl<'de> Deserialize<'de> for OutputFolder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Path(PathBuf),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => OutputFolder::Disabled,
            Raw::Flag(true) => OutputFolder::default(),
            Raw::Path(path) => OutputFolder::Path(path),
        })
    }
}

impl OutputFolder {
    /// Report root, if reports are enabled
    pub fn path(&self) -> Option<&Path> {
        match self {
            OutputFolder::Disabled => None,
            OutputFolder::Path(path) => Some(path),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, OutputFolder::Disabled)
    }
}

impl Globals {
    /// The completion timeout as a `Duration`
    pub fn async_timeout(&self) -> Duration {
        Duration::from_millis(self.async_hook_timeout)
    }
}

impl Settings {
    /// Parse and validate settings from TOML text.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        settings.validate()
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()
    }

    /// Load from `path`, or from the default location if it exists, or fall back to defaults.
    ///
    /// An explicitly given path that fails to load is an error; a broken
    /// default file is only warned about.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(settings) => return Ok(settings),
                Err(e) => tracing::warn!("{}", e),
            }
        }
        Ok(Self::default())
    }

    /// Check cross-field constraints.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.globals.async_hook_timeout == 0 {
            return Err(ConfigError::Invalid(
                "globals.async_hook_timeout must be greater than zero".to_string(),
            ));
        }
        if self.module_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "module_extensions must list at least one extension".to_string(),
            ));
        }
        if let OutputFolder::Path(path) = &self.output_folder {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "output_folder must not be an empty path".to_string(),
                ));
            }
        }
        Ok(self)
    }

    /// Check if a module path matches any exclude pattern
    pub fn is_excluded(&self, module_path: &str) -> bool {
        self.exclude
            .iter()
            .any(|pattern| module_path.contains(pattern.as_str()))
    }

    /// Check if a module path passes the filter
    pub fn matches_filter(&self, module_path: &str) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| module_path.contains(filter.as_str()))
    }

    /// Check if a file extension marks a test module
    pub fn is_module_extension(&self, extension: &str) -> bool {
        self.module_extensions.iter().any(|ext| ext == extension)
    }
}
