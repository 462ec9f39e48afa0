use crate::error::ConfigError;

/// Host allowlist compiled from domain patterns.
///
/// A pattern is one of:
/// - exact: `www.example.com`
/// - prefix: `www.example.*`
/// - suffix: `*.example.com`
///
/// An empty matcher accepts every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainMatcher {
    exact: Vec<String>,
    prefix: Vec<String>,
    suffix: Vec<String>,
}

impl DomainMatcher {
    /// Compiles `patterns`, failing on the first empty one.
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        for (index, pattern) in patterns.into_iter().enumerate() {
            let pattern = pattern.as_ref();
            if pattern.is_empty() {
                return Err(ConfigError::EmptyDomain { index });
            }

            // The suffix form wins, so `*.a.*` is a suffix rule.
            if let Some(stem) = pattern.strip_prefix('*').filter(|s| s.starts_with('.')) {
                matcher.suffix.push(stem.to_owned());
            } else if let Some(stem) = pattern.strip_suffix('*').filter(|s| s.ends_with('.')) {
                matcher.prefix.push(stem.to_owned());
            } else {
                matcher.exact.push(pattern.to_owned());
            }
        }
        Ok(matcher)
    }

    /// Returns whether no pattern is configured.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefix.is_empty() && self.suffix.is_empty()
    }

    /// Returns the number of exact, prefix and suffix rules.
    pub fn rule_counts(&self) -> (usize, usize, usize) {
        (self.exact.len(), self.prefix.len(), self.suffix.len())
    }

    /// Returns whether `host` is allowed.
    ///
    /// Exact rules are checked first, then prefix stems, then suffix stems.
    /// Matching is case-sensitive and `host` must not carry a port.
    pub fn matches(&self, host: &str) -> bool {
        if self.is_empty() {
            return true;
        }

        self.exact.iter().any(|exact| exact == host)
            || self.prefix.iter().any(|stem| host.starts_with(stem.as_str()))
            || self.suffix.iter().any(|stem| host.ends_with(stem.as_str()))
    }
}

/// Strips the port from a `host[:port]` value.
///
/// Bracketed IPv6 literals lose their brackets. Bare IPv6 addresses and
/// hosts without a port are returned as they are.
pub fn split_host(host_port: &str) -> &str {
    if let Some(rest) = host_port.strip_prefix('[') {
        return rest.split_once(']').map_or(host_port, |(host, _)| host);
    }

    match host_port.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host,
        _ => host_port,
    }
}
