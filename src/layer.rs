use crate::codec::Level;
use crate::config::GzipConfig;
use crate::domain::DomainMatcher;
use crate::error::ConfigError;
use crate::pool::{DEFAULT_MAX_IDLE, GzipPool};
use crate::service::Gzip;
use std::sync::Arc;
use tower::Layer;
use tracing::debug;

/// A layer that gzips response bodies.
///
/// The wrapped value may be a [`Handler`](crate::Handler), a
/// `tower::Service` over `http` types, or both. All services produced by
/// one layer share its domain rules and its encoder pool.
///
/// Because the response sink is replaced for the rest of the chain, anything
/// that rewrites the response on error must be wrapped *by* this layer, so
/// the rewritten body is compressed along with the rest.
#[derive(Debug, Clone)]
pub struct GzipLayer {
    matcher: Arc<DomainMatcher>,
    pool: Arc<GzipPool>,
}

impl GzipLayer {
    /// Creates a layer from `config`.
    ///
    /// Fails on a level outside `0..=9` or an empty domain pattern; both are
    /// configuration errors to be reported before serving.
    pub fn new(config: &GzipConfig) -> Result<Self, ConfigError> {
        let level = Level::new(config.level)?;
        let matcher = DomainMatcher::new(&config.domains)?;

        let (exact, prefix, suffix) = matcher.rule_counts();
        debug!(
            level = level.get(),
            exact,
            prefix,
            suffix,
            max_idle = config.max_idle,
            "gzip middleware configured"
        );

        Ok(Self {
            matcher: Arc::new(matcher),
            pool: Arc::new(GzipPool::new(level, config.max_idle)),
        })
    }

    /// Returns the encoder pool shared by this layer's services.
    pub fn pool(&self) -> &Arc<GzipPool> {
        &self.pool
    }

    /// Returns the compiled domain rules.
    pub fn matcher(&self) -> &DomainMatcher {
        &self.matcher
    }
}

impl Default for GzipLayer {
    /// Compresses every domain at the default level.
    fn default() -> Self {
        Self {
            matcher: Arc::new(DomainMatcher::default()),
            pool: Arc::new(GzipPool::new(Level::DEFAULT, DEFAULT_MAX_IDLE)),
        }
    }
}

impl<S> Layer<S> for GzipLayer {
    type Service = Gzip<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Gzip::new(inner, Arc::clone(&self.matcher), Arc::clone(&self.pool))
    }
}
