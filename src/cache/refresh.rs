use crate::upstream::{format_utc, NormalizedState, StateSource, UpstreamError};
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Seconds a fetched value is served without asking upstream again
pub const REFRESH_WINDOW_SECS: i64 = 30;

type FetchOutcome = Result<NormalizedState, UpstreamError>;

/// One upstream fetch, awaited by every caller that found the entry stale
type Flight = Shared<BoxFuture<'static, FetchOutcome>>;

/// Last successfully fetched value and the time it was fetched.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub value: NormalizedState,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Fresh while `now - fetched_at <= window`; the boundary itself is fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.fetched_at <= window
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    in_flight: Option<Flight>,
    /// Latest `now` among the callers of the running flight
    flight_now: Option<DateTime<Utc>>,
}

struct Inner {
    source: Arc<dyn StateSource>,
    window: Duration,
    slot: Mutex<Slot>,
}

/// Time-windowed cache in front of a [`StateSource`].
///
/// At most one upstream fetch runs at a time. Callers that find the entry
/// stale or empty while a fetch is running await that fetch and all receive
/// its outcome. The fetch runs as its own task, outside the lock, so it
/// completes even if every caller goes away; its result is written back in
/// one step. Failed fetches never touch the entry.
pub struct RefreshCache {
    inner: Arc<Inner>,
}

impl RefreshCache {
    pub fn new(source: Arc<dyn StateSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                window: Duration::seconds(REFRESH_WINDOW_SECS),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Return the cached value if fresh at `now`, otherwise fetch (or join the
    /// running fetch) and return its outcome.
    pub async fn get(&self, now: DateTime<Utc>) -> Result<NormalizedState, UpstreamError> {
        let flight = {
            let mut slot = self.inner.slot.lock().await;

            if let Some(entry) = &slot.entry {
                if entry.is_fresh(now, self.inner.window) {
                    info!(fetched_at = %format_utc(entry.fetched_at), "Cache hit");
                    return Ok(entry.value.clone());
                }
            }

            slot.flight_now = slot.flight_now.max(Some(now));

            match slot.in_flight.clone() {
                Some(flight) => {
                    debug!("Joining in-flight upstream fetch");
                    flight
                }
                None => {
                    debug!(has_entry = slot.entry.is_some(), "Cache miss, fetching from upstream");
                    let flight = Inner::start_flight(&self.inner);
                    slot.in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    #[cfg(test)]
    pub(crate) async fn entry(&self) -> Option<CacheEntry> {
        self.inner.slot.lock().await.entry.clone()
    }
}

impl Inner {
    /// Spawn the fetch and wrap its handle so every caller can await it.
    ///
    /// Must be called with the slot locked; the task cannot store its result
    /// before the caller has registered the flight.
    fn start_flight(inner: &Arc<Self>) -> Flight {
        let task = tokio::spawn(Arc::clone(inner).fetch_and_store());
        let inner = Arc::clone(inner);

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => inner.abort_flight(e.to_string()).await,
            }
        }
        .boxed()
        .shared()
    }

    async fn fetch_and_store(self: Arc<Self>) -> FetchOutcome {
        let outcome = self.source.fetch().await;

        let mut slot = self.slot.lock().await;
        slot.in_flight = None;
        let now = slot.flight_now.take().unwrap_or_else(Utc::now);

        match &outcome {
            Ok(value) => {
                // Never move fetched_at backwards
                let fetched_at = match &slot.entry {
                    Some(previous) if previous.fetched_at > now => previous.fetched_at,
                    _ => now,
                };
                slot.entry = Some(CacheEntry {
                    value: value.clone(),
                    fetched_at,
                });
                debug!(value = ?value, "Cache entry refreshed");
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Upstream fetch failed, cache entry unchanged");
            }
        }

        outcome
    }

    /// The fetch task died without storing an outcome (panic in the source).
    async fn abort_flight(&self, reason: String) -> FetchOutcome {
        error!(error = %reason, "Upstream fetch task failed");

        let mut slot = self.slot.lock().await;
        slot.in_flight = None;
        slot.flight_now = None;

        Err(UpstreamError::Unavailable(format!("fetch task failed: {}", reason)))
    }
}
