//! Configuration management for the asset mirror.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides (`ASSET_MIRROR_<SECTION>__<KEY>`, e.g.
//! `ASSET_MIRROR_DOWNLOAD__WORKERS=8`).

use crate::manifest::{DateRange, ManifestFormat};
use crate::utils::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "ASSET_MIRROR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Prefix every asset key is appended to
    #[serde(default)]
    pub base_url: String,

    /// Appended to every key, for URLs and local file names
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Per-attempt request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Previously mirrored manifest; absent means mirror everything
    #[serde(default)]
    pub baseline: Option<PathBuf>,

    /// Newly published manifest. A directory selects its newest `*.xml`.
    #[serde(default)]
    pub candidate: Option<PathBuf>,

    #[serde(default = "default_element")]
    pub element: String,

    #[serde(default = "default_key_attr")]
    pub key_attr: String,

    #[serde(default = "default_version_attr")]
    pub version_attr: String,

    #[serde(default = "default_url_attr")]
    pub url_attr: String,

    /// Where the diff manifest is written; defaults to `<output_dir>/result.xml`
    #[serde(default)]
    pub diff_output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Inclusive lower bound, `YYYYMMDD`
    #[serde(default)]
    pub start: Option<String>,

    /// Inclusive upper bound, `YYYYMMDD`
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Fixed worker count; unset means size from system load
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Re-run retryable failures once after the first pass
    #[serde(default = "default_retry_sweep")]
    pub retry_sweep: bool,

    /// CPU sampling window
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Program run once per downloaded asset; unset disables extraction
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments; `{input}` and `{output}` are substituted
    #[serde(default)]
    pub args: Vec<String>,

    /// Defaults to `<output_dir>/exported`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_suffix() -> String {
    ".swf".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("asset-mirror/{}", env!("CARGO_PKG_VERSION"))
}

fn default_element() -> String {
    "f".to_string()
}

fn default_key_attr() -> String {
    "n".to_string()
}

fn default_version_attr() -> String {
    "v".to_string()
}

fn default_url_attr() -> String {
    "u".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("mirror")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_retry_sweep() -> bool {
    true
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_progress_interval_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            suffix: default_suffix(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            baseline: None,
            candidate: None,
            element: default_element(),
            key_attr: default_key_attr(),
            version_attr: default_version_attr(),
            url_attr: default_url_attr(),
            diff_output: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workers: None,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            retry_sweep: default_retry_sweep(),
            sample_interval_ms: default_sample_interval_ms(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Layer an optional TOML file and `ASSET_MIRROR_*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| MirrorError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| MirrorError::Config(e.to_string()))
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MirrorError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MirrorError::Config(e.to_string()))
    }

    /// Check everything a run depends on before any work starts.
    pub fn validate(&self) -> Result<()> {
        let base_url = self.remote.base_url.trim();
        if base_url.is_empty() {
            return Err(MirrorError::Config("remote.base_url must be set".to_string()));
        }
        reqwest::Url::parse(base_url).map_err(|e| {
            MirrorError::Config(format!("remote.base_url '{base_url}' is not a valid URL: {e}"))
        })?;

        if self.manifest.candidate.is_none() {
            return Err(MirrorError::Config("manifest.candidate must be set".to_string()));
        }
        if self.manifest.element.is_empty() || self.manifest.key_attr.is_empty() {
            return Err(MirrorError::Config(
                "manifest.element and manifest.key_attr must not be empty".to_string(),
            ));
        }

        if self.download.max_attempts == 0 {
            return Err(MirrorError::Config(
                "download.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.download.workers == Some(0) {
            return Err(MirrorError::Config(
                "download.workers must be at least 1".to_string(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(MirrorError::Config(
                "remote.timeout_secs must be at least 1".to_string(),
            ));
        }

        self.date_range()?;
        Ok(())
    }

    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::parse(self.filter.start.as_deref(), self.filter.end.as_deref())
    }

    pub fn manifest_format(&self) -> ManifestFormat {
        ManifestFormat {
            element: self.manifest.element.clone(),
            key_attr: self.manifest.key_attr.clone(),
            version_attr: self.manifest.version_attr.clone(),
            url_attr: self.manifest.url_attr.clone(),
        }
    }

    pub fn diff_output(&self) -> PathBuf {
        self.manifest
            .diff_output
            .clone()
            .unwrap_or_else(|| self.download.output_dir.join("result.xml"))
    }

    pub fn extract_output_dir(&self) -> PathBuf {
        self.extract
            .output_dir
            .clone()
            .unwrap_or_else(|| self.download.output_dir.join("exported"))
    }
}
