//! Cluster Identity Resolution
//!
//! Retrieves the durable cluster identifier from a running daemon by
//! polling its gossip values and parsing the textual output. The daemon
//! answers `Unavailable / node waiting for init` until initialization has
//! propagated, so that one error is retried on a short, bounded schedule;
//! everything else fails fast.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use uuid::Uuid;

use crate::daemon::ProcessControl;
use crate::error::{Error, Result};

/// Maximum number of gossip queries per resolution
pub const MAX_RETRIES: u32 = 10;

/// Delay between gossip queries
pub const RETRY_TIMEOUT: Duration = Duration::from_millis(125);

/// Error text the daemon emits while still waiting for init
const WAITING_FOR_INIT: &str = "code = Unavailable desc = node waiting for init";

fn cluster_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^"cluster-id": ([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$"#,
        )
        .expect("cluster-id pattern is valid")
    })
}

/// Resolves the cluster id from a running daemon
pub struct IdentityResolver {
    control: Arc<dyn ProcessControl>,
    max_retries: u32,
    retry_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self {
            control,
            max_retries: MAX_RETRIES,
            retry_timeout: RETRY_TIMEOUT,
        }
    }

    /// Override the retry schedule
    pub fn with_retry(mut self, max_retries: u32, retry_timeout: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_timeout = retry_timeout;
        self
    }

    /// Resolve the cluster id, retrying only the known-transient
    /// "waiting for init" response
    pub async fn resolve(&self) -> Result<Uuid> {
        for attempt in 1..=self.max_retries {
            let output = self.control.query_gossip().await?;

            if output.success {
                return Self::parse_cluster_id(&output.stdout);
            }

            if !output.stderr.contains(WAITING_FOR_INIT) {
                return Err(Error::IdentityResolution(format!(
                    "unexpected error returned by the gossip query: {}",
                    output.stderr.trim()
                )));
            }

            tracing::debug!(
                "Gossip values unavailable, node waiting for init (attempt {}/{})",
                attempt,
                self.max_retries
            );
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_timeout).await;
            }
        }

        Err(Error::ResolveExhausted {
            attempts: self.max_retries,
        })
    }

    /// Scan gossip output line-by-line for the cluster-id entry
    fn parse_cluster_id(stdout: &str) -> Result<Uuid> {
        for line in stdout.lines() {
            if let Some(captures) = cluster_id_regex().captures(line) {
                let text = &captures[1];
                return Uuid::parse_str(text).map_err(|e| {
                    Error::IdentityResolution(format!("malformed cluster id {}: {}", text, e))
                });
            }
        }
        Err(Error::IdentityResolution(
            "could not find cluster-id in the gossip values output".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::testing::ScriptedControl;
    use std::sync::atomic::Ordering;

    fn resolver(control: Arc<ScriptedControl>) -> IdentityResolver {
        IdentityResolver::new(control).with_retry(MAX_RETRIES, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_resolve_finds_cluster_id_among_other_lines() {
        let control = Arc::new(ScriptedControl::new());
        control.push_gossip_success(
            "\"random\": \"x\"\n\"cluster-id\": 71edcae1-bf9c-4935-879e-bb380df72a32\n",
        );

        let id = resolver(Arc::clone(&control)).resolve().await.unwrap();
        assert_eq!(
            id,
            Uuid::parse_str("71edcae1-bf9c-4935-879e-bb380df72a32").unwrap()
        );
        assert_eq!(control.gossip_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_retries_waiting_for_init_then_succeeds() {
        let control = Arc::new(ScriptedControl::new());
        control.push_gossip_failure("rpc error: code = Unavailable desc = node waiting for init");
        control.push_gossip_failure("rpc error: code = Unavailable desc = node waiting for init");
        control.push_gossip_success("\"cluster-id\": 71edcae1-bf9c-4935-879e-bb380df72a32\n");

        let id = resolver(Arc::clone(&control)).resolve().await.unwrap();
        assert_eq!(
            id.to_string(),
            "71edcae1-bf9c-4935-879e-bb380df72a32"
        );
        assert_eq!(control.gossip_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_exhausts_after_exactly_max_attempts() {
        let control = Arc::new(ScriptedControl::new());
        control.push_gossip_failure("rpc error: code = Unavailable desc = node waiting for init");

        let err = resolver(Arc::clone(&control)).resolve().await.unwrap_err();
        assert!(matches!(err, Error::ResolveExhausted { attempts: 10 }));
        assert_eq!(control.gossip_calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_resolve_fails_fast_on_unexpected_error() {
        let control = Arc::new(ScriptedControl::new());
        control.push_gossip_failure("rpc error: code = Internal desc = something broke");

        let err = resolver(Arc::clone(&control)).resolve().await.unwrap_err();
        assert!(matches!(err, Error::IdentityResolution(_)));
        assert_eq!(control.gossip_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_fails_fast_when_no_match_in_output() {
        let control = Arc::new(ScriptedControl::new());
        control.push_gossip_success("\"random\": \"x\"\n\"node-id\": 4\n");

        let err = resolver(Arc::clone(&control)).resolve().await.unwrap_err();
        assert!(matches!(err, Error::IdentityResolution(_)));
        assert_eq!(control.gossip_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_requires_anchored_line() {
        // Indented or suffixed lines never match the fixed contract.
        let err = IdentityResolver::parse_cluster_id(
            "  \"cluster-id\": 71edcae1-bf9c-4935-879e-bb380df72a32\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::IdentityResolution(_)));
    }
}
