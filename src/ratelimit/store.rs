//! Counter stores holding per-key hit history.

use super::limit::RateLimit;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Errors raised by a counter store backend.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// The backing store could not be reached or is in an unusable state.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// Every limit had room; the hit was recorded.
    Recorded,
    /// At least one limit was exhausted; nothing was recorded.
    Rejected {
        /// Time until the most constrained window frees a slot.
        retry_after: Duration,
    },
}

/// Shared storage for moving-window hit history.
///
/// Implementations must check every limit and record the hit as one atomic step so that
/// concurrent callers cannot overshoot a limit.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record a hit for `key` at `now` if all `limits` currently allow it.
    async fn try_acquire(
        &self,
        key: &str,
        limits: &[RateLimit],
        now: SystemTime,
    ) -> Result<HitOutcome, CounterStoreError>;
}

/// How often the in-memory store drops keys whose hits have all aged out.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Process-local counter store.
///
/// Keys whose newest hit is older than their longest window are evicted by a sweep that runs at
/// most once per [`SWEEP_INTERVAL`], so the map stays bounded by the clients active recently.
#[derive(Default)]
pub struct InMemoryCounterStore {
    state: Mutex<CounterState>,
}

#[derive(Default)]
struct CounterState {
    windows: HashMap<String, HitWindow>,
    next_sweep: Option<SystemTime>,
}

#[derive(Default)]
struct HitWindow {
    hits: VecDeque<SystemTime>,
    /// Longest window of the limits applied at the last admission.
    retention: Duration,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterState {
    fn sweep_if_due(&mut self, now: SystemTime) {
        if self.next_sweep.is_some_and(|due| now < due) {
            return;
        }
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .hits
                .back()
                .is_some_and(|newest| elapsed_since(now, *newest) < window.retention)
        });
        let evicted = before - self.windows.len();
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.windows.len(),
                "Evicted idle rate-limit keys"
            );
        }
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }
}

fn elapsed_since(now: SystemTime, earlier: SystemTime) -> Duration {
    // Timestamps from the future (clock steps) count as just recorded.
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        limits: &[RateLimit],
        now: SystemTime,
    ) -> Result<HitOutcome, CounterStoreError> {
        let Some(longest) = limits.iter().map(|limit| limit.window).max() else {
            return Ok(HitOutcome::Recorded);
        };

        let mut state = self
            .state
            .lock()
            .map_err(|_| CounterStoreError::Unavailable("counter lock poisoned".into()))?;
        state.sweep_if_due(now);
        let window = state.windows.entry(key.to_string()).or_default();
        let hits = &mut window.hits;

        while hits
            .front()
            .is_some_and(|oldest| elapsed_since(now, *oldest) >= longest)
        {
            hits.pop_front();
        }

        let mut retry_after: Option<Duration> = None;
        for limit in limits {
            let in_window: Vec<Duration> = hits
                .iter()
                .map(|hit| elapsed_since(now, *hit))
                .filter(|elapsed| *elapsed < limit.window)
                .collect();
            let allowed = limit.count as usize;
            if in_window.len() >= allowed {
                // Hits are oldest first; once this one ages out the window has a free slot.
                let blocking = in_window[in_window.len() - allowed];
                let wait = limit.window.saturating_sub(blocking);
                retry_after = Some(retry_after.map_or(wait, |current| current.max(wait)));
            }
        }

        if let Some(retry_after) = retry_after {
            return Ok(HitOutcome::Rejected { retry_after });
        }

        hits.push_back(now);
        window.retention = longest;
        Ok(HitOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
    }

    #[tokio::test]
    async fn rejection_reports_time_until_a_slot_frees() {
        let store = InMemoryCounterStore::new();
        let limits = [RateLimit::new(2, Duration::from_secs(10))];

        assert_eq!(
            store.try_acquire("k", &limits, at(0)).await.unwrap(),
            HitOutcome::Recorded
        );
        assert_eq!(
            store.try_acquire("k", &limits, at(3)).await.unwrap(),
            HitOutcome::Recorded
        );
        assert_eq!(
            store.try_acquire("k", &limits, at(4)).await.unwrap(),
            HitOutcome::Rejected {
                retry_after: Duration::from_secs(6)
            }
        );
    }

    #[tokio::test]
    async fn rejected_hits_are_not_recorded() {
        let store = InMemoryCounterStore::new();
        let limits = [RateLimit::new(1, Duration::from_secs(10))];

        store.try_acquire("k", &limits, at(0)).await.unwrap();
        for second in 1..9 {
            let outcome = store.try_acquire("k", &limits, at(second)).await.unwrap();
            assert!(matches!(outcome, HitOutcome::Rejected { .. }));
        }
        // Only the first hit occupies the window, so it frees at t=10.
        assert_eq!(
            store.try_acquire("k", &limits, at(10)).await.unwrap(),
            HitOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = InMemoryCounterStore::new();
        let limits = [RateLimit::new(1, Duration::from_secs(60))];

        store.try_acquire("a", &limits, at(0)).await.unwrap();
        assert_eq!(
            store.try_acquire("b", &limits, at(0)).await.unwrap(),
            HitOutcome::Recorded
        );
    }

    fn tracked_keys(store: &InMemoryCounterStore) -> Vec<String> {
        let state = store.state.lock().unwrap();
        let mut keys: Vec<String> = state.windows.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn idle_keys_are_evicted() {
        let store = InMemoryCounterStore::new();
        let limits = [RateLimit::new(5, Duration::from_secs(1))];

        for client in 0..1_000 {
            let key = format!("10.0.{}.{}:/ask", client / 256, client % 256);
            store.try_acquire(&key, &limits, at(0)).await.unwrap();
        }
        assert_eq!(tracked_keys(&store).len(), 1_000);

        store.try_acquire("fresh:/ask", &limits, at(3_600)).await.unwrap();
        assert_eq!(tracked_keys(&store), vec!["fresh:/ask".to_string()]);
    }

    #[tokio::test]
    async fn keys_inside_their_window_survive_a_sweep() {
        let store = InMemoryCounterStore::new();
        let hourly = [RateLimit::new(1, Duration::from_secs(3_600))];
        let per_second = [RateLimit::new(1, Duration::from_secs(1))];

        store.try_acquire("hourly", &hourly, at(0)).await.unwrap();
        store.try_acquire("brief", &per_second, at(0)).await.unwrap();
        store.try_acquire("other", &per_second, at(120)).await.unwrap();

        assert_eq!(
            tracked_keys(&store),
            vec!["hourly".to_string(), "other".to_string()]
        );
        // The surviving key still counts its earlier hit.
        assert!(matches!(
            store.try_acquire("hourly", &hourly, at(121)).await.unwrap(),
            HitOutcome::Rejected { .. }
        ));
    }
}
