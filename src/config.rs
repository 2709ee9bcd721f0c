//! Configuration types for modpack-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Remote catalog connection settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog API (default: <https://api.curseforge.com>)
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    /// API key sent as `x-api-key` on every catalog request (None = anonymous)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Download behavior configuration (concurrency, verification)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent mod-file transfers (default: 6)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Verify downloads against catalog hashes when available (default: true)
    #[serde(default = "default_true")]
    pub validate: bool,

    /// Only verify files smaller than this many bytes (None = no size cap)
    ///
    /// Hashing very large files can dominate install time on slow disks;
    /// this cap limits verification to files below the threshold.
    #[serde(default)]
    pub validate_if_size_less_than: Option<u64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            validate: true,
            validate_if_size_less_than: None,
        }
    }
}

/// Retry behavior for transient catalog and transfer failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per entry (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Fixed weight each pipeline stage contributes to overall progress
///
/// The four weights must sum to 1.0. Within the download stage, weight is
/// split across entries proportionally to expected byte size when known.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StageWeights {
    /// Manifest resolution share (default: 0.10)
    #[serde(default = "default_resolve_weight")]
    pub resolve: f32,

    /// Overrides extraction share (default: 0.15)
    #[serde(default = "default_extract_weight")]
    pub extract: f32,

    /// Mod download share (default: 0.65)
    #[serde(default = "default_download_weight")]
    pub download: f32,

    /// Finalization share (default: 0.10)
    #[serde(default = "default_finalize_weight")]
    pub finalize: f32,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            resolve: default_resolve_weight(),
            extract: default_extract_weight(),
            download: default_download_weight(),
            finalize: default_finalize_weight(),
        }
    }
}

impl StageWeights {
    /// Sum of the base offsets of all stages before the download stage
    pub fn download_offset(&self) -> f32 {
        self.resolve + self.extract
    }

    /// Sum of the base offsets of all stages before finalization
    pub fn finalize_offset(&self) -> f32 {
        self.resolve + self.extract + self.download
    }
}

/// Top-level configuration for [`crate::ModpackInstaller`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Catalog connection settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Download concurrency and verification settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-stage progress weights
    #[serde(default)]
    pub stage_weights: StageWeights,

    /// Scratch directory for downloaded archives (None = system temp)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Config {
    /// Validate the configuration, returning the first offending setting
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".into(),
                key: Some("download.max_concurrent_downloads".into()),
            });
        }

        let w = &self.stage_weights;
        for (value, key) in [
            (w.resolve, "stage_weights.resolve"),
            (w.extract, "stage_weights.extract"),
            (w.download, "stage_weights.download"),
            (w.finalize, "stage_weights.finalize"),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config {
                    message: format!("stage weight {value} is outside [0, 1]"),
                    key: Some(key.into()),
                });
            }
        }
        let sum = w.resolve + w.extract + w.download + w.finalize;
        if (sum - 1.0).abs() > 1e-4 {
            return Err(Error::Config {
                message: format!("stage weights must sum to 1.0, got {sum}"),
                key: Some("stage_weights".into()),
            });
        }

        if self.catalog.base_url.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("base URL '{}' cannot be a base", self.catalog.base_url),
                key: Some("catalog.base_url".into()),
            });
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be >= 1.0".into(),
                key: Some("retry.backoff_multiplier".into()),
            });
        }

        Ok(())
    }
}

fn default_base_url() -> Url {
    // The literal is well-formed, so this cannot fail at runtime.
    #[allow(clippy::expect_used)]
    Url::parse("https://api.curseforge.com").expect("default base URL is valid")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrent() -> usize {
    6
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_resolve_weight() -> f32 {
    0.10
}

fn default_extract_weight() -> f32 {
    0.15
}

fn default_download_weight() -> f32 {
    0.65
}

fn default_finalize_weight() -> f32 {
    0.10
}

// Duration serialization helper (whole seconds)
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

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.download.max_concurrent_downloads = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(k), .. }
            if k == "download.max_concurrent_downloads"));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config = Config::default();
        config.stage_weights.download = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut config = Config::default();
        config.stage_weights.resolve = -0.1;
        config.stage_weights.download = 0.85;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_multiplier_below_one_is_rejected() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(k), .. }
            if k == "retry.backoff_multiplier"));
    }

    #[test]
    fn stage_offsets_follow_weights() {
        let weights = StageWeights::default();
        assert!((weights.download_offset() - 0.25).abs() < 1e-6);
        assert!((weights.finalize_offset() - 0.90).abs() < 1e-6);
    }

    #[test]
    fn empty_config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.download.max_concurrent_downloads, 6);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.catalog.base_url.as_str(), "https://api.curseforge.com/");
        config.validate().unwrap();
    }

    #[test]
    fn durations_round_trip_as_seconds() {
        let json = serde_json::to_value(RetryConfig::default()).unwrap();
        assert_eq!(json["initial_delay"], 1);
        assert_eq!(json["max_delay"], 30);

        let parsed: RetryConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.initial_delay, Duration::from_secs(1));
    }
}
