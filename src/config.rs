//! Configuration types for gkg-watch

use crate::error::{Error, Result};
use crate::types::StreamId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// English GKG pointer file
pub const PRIMARY_POINTER_URL: &str = "http://data.gdeltproject.org/gdeltv2/lastupdate.txt";

/// Multilingual GKG pointer file
pub const TRANSLATED_POINTER_URL: &str =
    "http://data.gdeltproject.org/gdeltv2/lastupdate-translation.txt";

/// Largest accepted `max_interval` (one day)
pub const MAX_INTERVAL_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Poll timing and back-off configuration
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Base interval between polls of one stream (default: 120 seconds)
    #[serde(default = "default_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Ceiling for the back-off interval (default: 1800 seconds)
    #[serde(default = "default_max_interval", with = "duration_serde")]
    pub max_interval: Duration,

    /// Multiplier applied to the interval after each failed cycle (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each sleep (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Keep polling at the base interval when the pointer file is malformed
    /// instead of backing off (default: false)
    #[serde(default)]
    pub ignore_malformed: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_interval: default_max_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
            ignore_malformed: false,
        }
    }
}

/// HTTP client settings
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for fetching a pointer file (default: 15 seconds)
    #[serde(default = "default_pointer_timeout", with = "duration_serde")]
    pub pointer_timeout: Duration,

    /// Timeout for a whole archive download (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pointer_timeout: default_pointer_timeout(),
            download_timeout: default_download_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Per-stream feed location and output layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pointer file URL
    pub pointer_url: String,

    /// Directory (relative to the output root) for downloaded archives
    pub archive_subdir: PathBuf,

    /// Directory (relative to the output root) for extracted members
    pub extract_subdir: PathBuf,

    /// Only pointer entries whose URL ends with this suffix are considered
    ///
    /// GDELT pointer files list the export, mentions and GKG archives of the
    /// same 15-minute slot; the suffix picks the GKG one.
    #[serde(default)]
    pub archive_suffix: Option<String>,
}

impl StreamConfig {
    /// Default layout for the English stream
    pub fn primary() -> Self {
        Self {
            pointer_url: PRIMARY_POINTER_URL.to_string(),
            archive_subdir: PathBuf::from("rawdata_en"),
            extract_subdir: PathBuf::from("csv_en"),
            archive_suffix: Some(".gkg.csv.zip".to_string()),
        }
    }

    /// Default layout for the multilingual stream
    pub fn translated() -> Self {
        Self {
            pointer_url: TRANSLATED_POINTER_URL.to_string(),
            archive_subdir: PathBuf::from("rawdata_tr"),
            extract_subdir: PathBuf::from("csv_tr"),
            archive_suffix: Some(".translation.gkg.csv.zip".to_string()),
        }
    }
}

/// Dedup state persistence
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding one JSON file per stream with the last accepted archive
    ///
    /// When unset, dedup state lives in memory only and a restart relies on
    /// the on-disk archive names to avoid downloading twice.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Main configuration for the watcher
///
/// Timing and HTTP settings are flattened so the JSON format stays flat:
///
/// ```json
/// { "output_dir": "data", "interval": 120, "extract": true, "ignore_malformed": false }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root output folder (default: "data")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Poll timing and back-off
    #[serde(flatten)]
    pub polling: PollingConfig,

    /// HTTP client settings
    #[serde(flatten)]
    pub http: HttpConfig,

    /// Extract downloaded archives (default: true)
    #[serde(default = "default_true")]
    pub extract: bool,

    /// Insert a `<YYYY>` level taken from the archive name between the output
    /// root and the stream sub-directories (default: true)
    #[serde(default = "default_true")]
    pub partition_by_year: bool,

    /// English stream
    #[serde(default = "StreamConfig::primary")]
    pub primary: StreamConfig,

    /// Multilingual stream
    #[serde(default = "StreamConfig::translated")]
    pub translated: StreamConfig,

    /// Dedup state persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            polling: PollingConfig::default(),
            http: HttpConfig::default(),
            extract: true,
            partition_by_year: true,
            primary: StreamConfig::primary(),
            translated: StreamConfig::translated(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file; missing keys take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings the workers rely on
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval.is_zero() {
            return Err(Error::config("interval", "interval must be greater than zero"));
        }
        if self.polling.max_interval < self.polling.interval {
            return Err(Error::config(
                "max_interval",
                "max_interval must not be smaller than interval",
            ));
        }
        if self.polling.max_interval > MAX_INTERVAL_LIMIT {
            return Err(Error::config(
                "max_interval",
                format!(
                    "max_interval must not exceed {} seconds",
                    MAX_INTERVAL_LIMIT.as_secs()
                ),
            ));
        }
        if !(self.polling.backoff_multiplier >= 1.0 && self.polling.backoff_multiplier.is_finite())
        {
            return Err(Error::config(
                "backoff_multiplier",
                "backoff_multiplier must be a finite number >= 1.0",
            ));
        }
        if self.http.pointer_timeout.is_zero() || self.http.download_timeout.is_zero() {
            return Err(Error::config("pointer_timeout", "timeouts must be greater than zero"));
        }
        for id in StreamId::ALL {
            let stream = self.stream(id);
            let key = match id {
                StreamId::Primary => "primary.pointer_url",
                StreamId::Translated => "translated.pointer_url",
            };
            match url::Url::parse(&stream.pointer_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => {
                    return Err(Error::config(
                        key,
                        format!("invalid pointer URL: {}", stream.pointer_url),
                    ));
                }
            }
        }
        if self.primary.archive_subdir == self.translated.archive_subdir
            || self.primary.extract_subdir == self.translated.extract_subdir
        {
            return Err(Error::config(
                "archive_subdir",
                "streams must write to distinct sub-directories",
            ));
        }
        Ok(())
    }

    /// Settings for one stream
    pub fn stream(&self, id: StreamId) -> &StreamConfig {
        match id {
            StreamId::Primary => &self.primary,
            StreamId::Translated => &self.translated,
        }
    }

    /// Directory an archive named `file_name` is stored in
    pub fn archive_dir(&self, id: StreamId, file_name: &str) -> PathBuf {
        self.partition_root(file_name)
            .join(&self.stream(id).archive_subdir)
    }

    /// Directory the members of archive `file_name` are extracted to
    pub fn extract_dir(&self, id: StreamId, file_name: &str) -> PathBuf {
        self.partition_root(file_name)
            .join(&self.stream(id).extract_subdir)
    }

    fn partition_root(&self, file_name: &str) -> PathBuf {
        match crate::utils::year_prefix(file_name) {
            Some(year) if self.partition_by_year => self.output_dir.join(year),
            _ => self.output_dir.clone(),
        }
    }
}

// Default value functions
fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(1800)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_pointer_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    concat!("gkg-watch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
