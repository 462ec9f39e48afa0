use crate::codec::Level;
use crate::pool::DEFAULT_MAX_IDLE;
use serde::{Deserialize, Serialize};

/// Configuration of the gzip middleware.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// # use http_response_gzip::GzipConfig;
/// let config: GzipConfig = serde_json::from_str(r#"{"domains": ["*.example.com"]}"#).unwrap();
/// assert_eq!(config.level, 6);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GzipConfig {
    /// Compression level, from `0` (store only) to `9` (best compression).
    ///
    /// Default: 6
    pub level: i32,

    /// Host domains for which responses are compressed. Empty means all.
    ///
    /// A domain is an exact host (`www.example.com`), a prefix
    /// (`www.example.*`) or a suffix (`*.example.com`).
    ///
    /// Default: empty
    pub domains: Vec<String>,

    /// Number of released encoders kept for reuse.
    ///
    /// Default: 64
    pub max_idle: usize,
}

impl GzipConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level.
    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Adds a host domain pattern.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    /// Adds several host domain patterns.
    pub fn domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains.extend(domains.into_iter().map(Into::into));
        self
    }

    /// Sets how many released encoders are kept for reuse.
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            level: Level::DEFAULT.get() as i32,
            domains: Vec::new(),
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}
