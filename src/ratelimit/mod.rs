//! Moving-window admission control keyed by client and operation.
//!
//! A request is admitted only when every configured limit for its operation has room; the hit is
//! recorded only on admission. Counter state lives behind [`CounterStore`] so it can be shared
//! between process instances; when the store fails, [`FailurePolicy`] decides the outcome.

mod limit;
mod store;

pub use limit::{LimitParseError, RateLimit, parse_limits};
pub use store::{CounterStore, CounterStoreError, HitOutcome, InMemoryCounterStore};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Behaviour when the counter store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit the request; throttling is weakened while the store is down.
    Open,
    /// Deny the request; availability is reduced while the store is down.
    Closed,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(()),
        }
    }
}

/// Identifies the hit history a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    /// Caller network identity (peer IP).
    pub client: String,
    /// Operation path, e.g. `/upload`.
    pub operation: String,
}

impl RateKey {
    /// Build a key for `client` calling `operation`.
    pub fn new(client: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.operation)
    }
}

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Allowed,
    /// The request exceeds a limit.
    Denied {
        /// Hint for when a slot frees up, absent when the store failed closed.
        retry_after: Option<Duration>,
    },
}

/// Admission controller shared by every request handler.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    /// Build a controller over `store` with an explicit store-failure policy.
    pub fn new(store: Arc<dyn CounterStore>, failure_policy: FailurePolicy) -> Self {
        Self {
            store,
            failure_policy,
        }
    }

    /// Controller backed by a fresh process-local store.
    pub fn in_memory(failure_policy: FailurePolicy) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), failure_policy)
    }

    /// Decide whether the request identified by `key` may proceed now.
    pub async fn admit(&self, key: &RateKey, limits: &[RateLimit]) -> Admission {
        self.admit_at(key, limits, SystemTime::now()).await
    }

    /// Decide admission as of `now`.
    pub async fn admit_at(&self, key: &RateKey, limits: &[RateLimit], now: SystemTime) -> Admission {
        if limits.is_empty() {
            return Admission::Allowed;
        }

        match self.store.try_acquire(&key.to_string(), limits, now).await {
            Ok(HitOutcome::Recorded) => Admission::Allowed,
            Ok(HitOutcome::Rejected { retry_after }) => {
                tracing::info!(key = %key, retry_after_ms = retry_after.as_millis() as u64, "Rate limit exceeded");
                Admission::Denied {
                    retry_after: Some(retry_after),
                }
            }
            Err(error) => {
                tracing::warn!(
                    key = %key,
                    error = %error,
                    policy = ?self.failure_policy,
                    "Counter store unavailable; applying failure policy"
                );
                match self.failure_policy {
                    FailurePolicy::Open => Admission::Allowed,
                    FailurePolicy::Closed => Admission::Denied { retry_after: None },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::UNIX_EPOCH;

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn try_acquire(
            &self,
            _key: &str,
            _limits: &[RateLimit],
            _now: SystemTime,
        ) -> Result<HitOutcome, CounterStoreError> {
            Err(CounterStoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn third_call_in_window_is_denied_then_allowed_after_window() {
        let limiter = RateLimiter::in_memory(FailurePolicy::Closed);
        let key = RateKey::new("10.0.0.1", "/ask");
        let limits = parse_limits("2 per 10 seconds").unwrap();

        assert_eq!(limiter.admit_at(&key, &limits, at(0)).await, Admission::Allowed);
        assert_eq!(limiter.admit_at(&key, &limits, at(1)).await, Admission::Allowed);
        assert!(matches!(
            limiter.admit_at(&key, &limits, at(2)).await,
            Admission::Denied { retry_after: Some(_) }
        ));
        assert_eq!(limiter.admit_at(&key, &limits, at(11)).await, Admission::Allowed);
    }

    #[tokio::test]
    async fn every_limit_must_be_satisfied() {
        let limiter = RateLimiter::in_memory(FailurePolicy::Closed);
        let key = RateKey::new("10.0.0.1", "/upload");
        let limits = parse_limits("5/second; 2/minute").unwrap();

        assert_eq!(limiter.admit_at(&key, &limits, at(0)).await, Admission::Allowed);
        assert_eq!(limiter.admit_at(&key, &limits, at(5)).await, Admission::Allowed);
        // Per-second limit has room, per-minute does not.
        assert!(matches!(
            limiter.admit_at(&key, &limits, at(10)).await,
            Admission::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn operations_are_throttled_separately() {
        let limiter = RateLimiter::in_memory(FailurePolicy::Closed);
        let limits = parse_limits("1/minute").unwrap();

        let ask = RateKey::new("10.0.0.1", "/ask");
        let upload = RateKey::new("10.0.0.1", "/upload");
        assert_eq!(limiter.admit_at(&ask, &limits, at(0)).await, Admission::Allowed);
        assert_eq!(limiter.admit_at(&upload, &limits, at(0)).await, Admission::Allowed);
    }

    #[tokio::test]
    async fn store_failure_follows_configured_policy() {
        let key = RateKey::new("10.0.0.1", "/ask");
        let limits = parse_limits("10/minute").unwrap();

        let closed = RateLimiter::new(Arc::new(UnreachableStore), FailurePolicy::Closed);
        assert_eq!(
            closed.admit(&key, &limits).await,
            Admission::Denied { retry_after: None }
        );

        let open = RateLimiter::new(Arc::new(UnreachableStore), FailurePolicy::Open);
        assert_eq!(open.admit(&key, &limits).await, Admission::Allowed);
    }

    #[tokio::test]
    async fn unthrottled_operations_skip_the_store() {
        let limiter = RateLimiter::new(Arc::new(UnreachableStore), FailurePolicy::Closed);
        let key = RateKey::new("10.0.0.1", "/health");
        assert_eq!(limiter.admit(&key, &[]).await, Admission::Allowed);
    }

    #[test]
    fn failure_policy_parses() {
        assert_eq!("OPEN".parse::<FailurePolicy>(), Ok(FailurePolicy::Open));
        assert_eq!("closed".parse::<FailurePolicy>(), Ok(FailurePolicy::Closed));
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }
}
