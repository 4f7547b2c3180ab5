use thiserror::Error;

/// Crawl-wide error types for Magpie.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// The remote host answered HTTP 429. Continuing would worsen blocking,
    /// so this stops the whole pool.
    #[error("rate limited while fetching {0}")]
    RateLimited(String),

    /// The remote host answered HTTP 403 — the egress address may be banned.
    #[error("possible ban: HTTP 403 for {0}")]
    PossibleBan(String),

    /// Retries were exhausted without a usable response.
    #[error("no response from {url} after {attempts} attempts")]
    NoResponse { url: String, attempts: u32 },

    /// The response arrived but its payload had an unexpected shape.
    #[error("unexpected response payload: {0}")]
    Response(String),

    /// Transport-level failure (connect, TLS, timeout) surfaced past the
    /// fetch primitive's own retry loop.
    #[error("network error: {0}")]
    Network(String),

    /// Checkpoint or aggregator file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid crawl or identity configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Site-adapter failure that should restart the worker.
    #[error("adapter error: {0}")]
    Adapter(String),
}

impl CrawlError {
    /// True if this error must stop the whole pool rather than restart one
    /// worker. Fatal errors mean the crawl target is rejecting the entire
    /// IP pool's behavior, not one worker's.
    ///
    /// `PossibleBan` is deliberately not fatal: a 403 on one egress address
    /// is handled by restarting that worker, not by halting its siblings.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::RateLimited(_) | CrawlError::NoResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        assert!(CrawlError::RateLimited("http://a".into()).is_fatal());
        assert!(
            CrawlError::NoResponse {
                url: "http://a".into(),
                attempts: 5,
            }
            .is_fatal()
        );
    }

    #[test]
    fn restart_eligible_errors() {
        assert!(!CrawlError::PossibleBan("http://a".into()).is_fatal());
        assert!(!CrawlError::Response("truncated json".into()).is_fatal());
        assert!(!CrawlError::Network("connection reset".into()).is_fatal());
        assert!(!CrawlError::Adapter("parser gave up".into()).is_fatal());
    }
}
