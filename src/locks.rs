//! In-process interval locks, sharded by hall.
//!
//! A hall's held spans never pairwise overlap. Waiters are woken by a hall-level
//! broadcast on every release and re-check their own span, so a release of any
//! overlapping span (not only an identical one) lets them proceed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::model::Span;

/// Held spans of one hall plus the release broadcast.
#[derive(Default)]
struct HallLocks {
    held: Mutex<Vec<Span>>,
    released: Notify,
}

impl HallLocks {
    fn held(&self) -> MutexGuard<'_, Vec<Span>> {
        // Nothing panics while the mutex is held, but never let poisoning wedge a hall.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `span` if it overlaps nothing held. Check and insert are one critical section.
    fn try_insert(&self, span: Span) -> bool {
        let mut held = self.held();
        if held.iter().any(|h| h.overlaps(&span)) {
            return false;
        }
        held.push(span);
        true
    }

    fn remove(&self, span: Span) -> bool {
        let removed = {
            let mut held = self.held();
            match held.iter().position(|h| *h == span) {
                Some(pos) => {
                    held.swap_remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.released.notify_waiters();
        }
        removed
    }
}

/// Mutual exclusion over `(hall_id, span)` pairs.
#[derive(Default)]
pub struct IntervalLockManager {
    halls: DashMap<String, Arc<HallLocks>>,
}

impl IntervalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn hall(&self, hall_id: &str) -> Arc<HallLocks> {
        if let Some(entry) = self.halls.get(hall_id) {
            return entry.value().clone();
        }
        self.halls
            .entry(hall_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Wait until no held span of `hall_id` overlaps `span`, then hold it.
    ///
    /// Returns `false` (holding nothing) if `timeout` elapses first. Dropping the
    /// returned future while it waits also leaves nothing held.
    pub async fn acquire(&self, hall_id: &str, span: Span, timeout: Duration) -> bool {
        let hall = self.hall(hall_id);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            // Register for the broadcast before checking, so a release that lands
            // between the check and the await still wakes us.
            let released = hall.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if hall.try_insert(span) {
                let waited = started.elapsed();
                metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
                    .record(waited.as_secs_f64());
                metrics::gauge!(crate::observability::LOCKS_HELD).increment(1.0);
                return true;
            }

            debug!(hall_id, %span, "span locked by another operation, waiting");
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                debug!(hall_id, %span, ?timeout, "gave up waiting for span lock");
                return false;
            }
        }
    }

    /// Release a held span and wake every waiter on the hall. No-op if not held.
    pub fn release(&self, hall_id: &str, span: Span) {
        let Some(hall) = self.halls.get(hall_id).map(|e| e.value().clone()) else {
            return;
        };
        if hall.remove(span) {
            metrics::gauge!(crate::observability::LOCKS_HELD).decrement(1.0);
        }
    }

    /// `acquire` wrapped in a guard that releases on drop.
    pub async fn lock(&self, hall_id: &str, span: Span, timeout: Duration) -> Option<SpanGuard<'_>> {
        if self.acquire(hall_id, span, timeout).await {
            Some(SpanGuard {
                manager: self,
                hall_id: hall_id.to_string(),
                span,
            })
        } else {
            None
        }
    }

    /// Snapshot of the spans currently held on `hall_id`, sorted.
    pub fn held(&self, hall_id: &str) -> Vec<Span> {
        let mut spans = self
            .halls
            .get(hall_id)
            .map(|e| e.value().held().clone())
            .unwrap_or_default();
        spans.sort();
        spans
    }

    pub fn held_count(&self) -> usize {
        self.halls.iter().map(|e| e.value().held().len()).sum()
    }
}

/// A held span. Released exactly once, when dropped.
#[must_use = "the span is released as soon as the guard is dropped"]
pub struct SpanGuard<'a> {
    manager: &'a IntervalLockManager,
    hall_id: String,
    span: Span,
}

impl SpanGuard<'_> {
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn hall_id(&self) -> &str {
        &self.hall_id
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.hall_id, self.span);
    }
}

impl std::fmt::Debug for SpanGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanGuard")
            .field("hall_id", &self.hall_id)
            .field("span", &self.span)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn disjoint_spans_both_granted() {
        let locks = IntervalLockManager::new();
        assert!(locks.acquire("A", Span::new(0, 100), SHORT).await);
        assert!(locks.acquire("A", Span::new(100, 200), SHORT).await); // adjacent
        assert!(locks.acquire("B", Span::new(0, 100), SHORT).await); // other hall
        assert_eq!(locks.held("A"), vec![Span::new(0, 100), Span::new(100, 200)]);
        assert_eq!(locks.held_count(), 3);
    }

    #[tokio::test]
    async fn overlapping_span_times_out() {
        let locks = IntervalLockManager::new();
        assert!(locks.acquire("A", Span::new(0, 100), SHORT).await);
        assert!(!locks.acquire("A", Span::new(50, 150), SHORT).await);
        // Timeout recorded nothing
        assert_eq!(locks.held("A"), vec![Span::new(0, 100)]);
    }

    #[tokio::test]
    async fn zero_timeout_still_grants_free_span() {
        let locks = IntervalLockManager::new();
        assert!(locks.acquire("A", Span::new(0, 100), Duration::ZERO).await);
        assert!(!locks.acquire("A", Span::new(0, 100), Duration::ZERO).await);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let locks = IntervalLockManager::new();
        assert!(locks.acquire("A", Span::new(0, 100), SHORT).await);
        assert!(locks.acquire("A", Span::new(200, 300), SHORT).await);

        locks.release("A", Span::new(0, 100));
        locks.release("A", Span::new(0, 100));
        locks.release("A", Span::new(0, 50)); // never held
        locks.release("nowhere", Span::new(0, 100)); // unknown hall

        assert_eq!(locks.held("A"), vec![Span::new(200, 300)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiter_woken_by_release_of_different_overlapping_span() {
        let locks = Arc::new(IntervalLockManager::new());
        assert!(locks.acquire("A", Span::new(0, 100), SHORT).await);

        let waiter = {
            let locks = locks.clone();
            // Not identical to the held span, only overlapping it.
            tokio::spawn(async move { locks.acquire("A", Span::new(50, 60), LONG).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        locks.release("A", Span::new(0, 100));

        assert!(waiter.await.unwrap());
        assert_eq!(locks.held("A"), vec![Span::new(50, 60)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiter_keeps_waiting_while_other_overlap_remains() {
        let locks = Arc::new(IntervalLockManager::new());
        assert!(locks.acquire("A", Span::new(0, 50), SHORT).await);
        assert!(locks.acquire("A", Span::new(50, 100), SHORT).await);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("A", Span::new(25, 75), LONG).await })
        };

        locks.release("A", Span::new(0, 50));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "still blocked by [50, 100)");

        locks.release("A", Span::new(50, 100));
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let locks = IntervalLockManager::new();
        {
            let guard = locks.lock("A", Span::new(0, 100), SHORT).await.unwrap();
            assert_eq!(guard.span(), Span::new(0, 100));
            assert_eq!(guard.hall_id(), "A");
            assert!(locks.lock("A", Span::new(10, 20), Duration::ZERO).await.is_none());
        }
        assert!(locks.held("A").is_empty());
        assert!(locks.lock("A", Span::new(10, 20), Duration::ZERO).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_acquire_holds_nothing() {
        let locks = Arc::new(IntervalLockManager::new());
        assert!(locks.acquire("A", Span::new(0, 100), SHORT).await);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("A", Span::new(0, 100), LONG).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        locks.release("A", Span::new(0, 100));
        assert!(locks.held("A").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn held_spans_never_overlap_under_contention() {
        let locks = Arc::new(IntervalLockManager::new());
        let inside = Arc::new(Mutex::new(Vec::<Span>::new()));
        let granted = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..64i64 {
            let locks = locks.clone();
            let inside = inside.clone();
            let granted = granted.clone();
            tasks.push(tokio::spawn(async move {
                // Pseudo-random spans over a small window to force collisions
                let start = (i * 37) % 200;
                let span = Span::new(start, start + 10 + (i % 5) * 15);
                if let Some(_guard) = locks.lock("A", span, LONG).await {
                    {
                        let mut now = inside.lock().unwrap();
                        assert!(
                            now.iter().all(|s| !s.overlaps(&span)),
                            "{span} granted while overlapping {now:?}"
                        );
                        now.push(span);
                    }
                    tokio::task::yield_now().await;
                    inside.lock().unwrap().retain(|s| *s != span);
                    granted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 64);
        assert!(locks.held("A").is_empty());
    }
}
