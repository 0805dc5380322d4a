use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The storage bucket holding the documents, used when none is configured.
pub const DEFAULT_BUCKET: &str = "insurance-documents";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "signed_url".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Lifetime of cached preview URLs.
///
/// These differ from [`DownloadUrlConfig`] in the [`Default`] implementation.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PreviewUrlConfig {
    /// Nominal lifetime of a signed preview URL, in seconds.
    pub expires_in: u64,
    /// Seconds subtracted from `expires_in` before a cached preview URL is refreshed.
    pub buffer_seconds: u64,
}

impl Default for PreviewUrlConfig {
    fn default() -> Self {
        Self {
            expires_in: 3600,
            buffer_seconds: 300,
        }
    }
}

/// Lifetime of cached download URLs.
///
/// These differ from [`PreviewUrlConfig`] in the [`Default`] implementation.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DownloadUrlConfig {
    /// Nominal lifetime of a signed download URL, in seconds.
    pub expires_in: u64,
    /// Seconds subtracted from `expires_in` before a cached download URL is refreshed.
    pub buffer_seconds: u64,
}

impl Default for DownloadUrlConfig {
    fn default() -> Self {
        Self {
            expires_in: 300,
            buffer_seconds: 30,
        }
    }
}

/// Expiration settings of one cache namespace, independent of the URL kind.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ExpirationPolicy {
    /// Nominal lifetime of a signed URL.
    pub expires_in: Duration,
    /// Safety margin subtracted from `expires_in`.
    pub buffer: Duration,
}

impl ExpirationPolicy {
    pub fn from_secs(expires_in: u64, buffer_seconds: u64) -> Self {
        Self {
            expires_in: Duration::from_secs(expires_in),
            buffer: Duration::from_secs(buffer_seconds),
        }
    }

    /// How long a freshly signed URL is handed out from the cache.
    ///
    /// This is zero when the buffer eats up the whole lifetime, in which case nothing is ever
    /// served from the cache, though concurrent requests are still coalesced.
    pub fn cache_lifetime(&self) -> Duration {
        self.expires_in.saturating_sub(self.buffer)
    }

    /// The expiration timestamp of an entry created at `now_ms`.
    pub fn expires_at_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.cache_lifetime().as_millis() as u64)
    }
}

impl From<PreviewUrlConfig> for ExpirationPolicy {
    fn from(config: PreviewUrlConfig) -> Self {
        Self::from_secs(config.expires_in, config.buffer_seconds)
    }
}

impl From<DownloadUrlConfig> for ExpirationPolicy {
    fn from(config: DownloadUrlConfig) -> Self {
        Self::from_secs(config.expires_in, config.buffer_seconds)
    }
}

/// Connection settings of the object storage signing API.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL of the storage API, e.g. `https://project.example/storage/v1`.
    pub url: Option<Url>,
    /// The token sent as bearer token and `apikey` header.
    pub token: Option<String>,
    /// Timeout of a single signing request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// File name suggested to browsers for download URLs.
    pub download_filename: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: env::var("STORAGE_URL").ok().and_then(|url| url.parse().ok()),
            token: env::var("STORAGE_TOKEN").ok(),
            timeout: Duration::from_secs(10),
            download_filename: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The bucket holding the objects.
    ///
    /// Raw keys starting with this bucket name are normalized to bucket-relative keys.
    pub bucket: String,

    /// Expiration of preview URLs.
    pub preview: PreviewUrlConfig,

    /// Expiration of download URLs.
    pub download: DownloadUrlConfig,

    /// The upstream signing API.
    pub storage: StorageConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.into(),
            preview: PreviewUrlConfig::default(),
            download: DownloadUrlConfig::default(),
            storage: StorageConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            )?,
            None => Config::default(),
        };
        config.validate();
        Ok(config)
    }

    fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse YAML")
    }

    /// Warns about settings that effectively disable caching.
    fn validate(&self) {
        for (name, policy) in self.uncached_namespaces() {
            tracing::warn!(
                namespace = name,
                expires_in = ?policy.expires_in,
                buffer = ?policy.buffer,
                "buffer is not shorter than the URL lifetime, URLs will never be served from cache"
            );
        }
    }

    /// Namespaces whose buffer leaves no time to serve a URL from cache.
    fn uncached_namespaces(&self) -> impl Iterator<Item = (&'static str, ExpirationPolicy)> {
        [
            ("preview", ExpirationPolicy::from(self.preview)),
            ("download", ExpirationPolicy::from(self.download)),
        ]
        .into_iter()
        .filter(|(_, policy)| policy.cache_lifetime().is_zero())
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
