//! Booking operations on top of the span lock manager and a [`BookingStore`].
//!
//! Every mutation follows the same shape: validate, lock the span(s) that could
//! race with it, run the store's conflict check and mutation while holding them,
//! and let the guards release on the way out. The check and the mutation it
//! justifies never straddle a release.

mod availability;
mod error;
mod validate;

pub use availability::{free_windows, merge_overlapping, subtract_intervals};
pub use error::{BookingError, ErrorKind};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::ledger::BookingStore;
use crate::limits::*;
use crate::locks::{IntervalLockManager, SpanGuard};
use crate::model::*;
use crate::observability::{BOOKING_OPS_TOTAL, BOOKING_OP_DURATION_SECONDS};
use crate::registry::HallRegistry;

use validate::{validate_seats, validate_span, validate_window};

/// How long, and how often, an operation waits for its span locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Wait budget of a single acquire.
    pub timeout: Duration,
    /// Acquires tried before reporting `LockUnavailable`. Zero is treated as one.
    pub attempts: u32,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 1,
        }
    }
}

/// One entry of a batch booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub hall_id: String,
    pub start: Ms,
    pub end: Ms,
    pub seats: u32,
}

/// Spans to lock for moving a booking from `old` to `new`, in acquisition order.
///
/// Overlapping spans collapse into their cover: locking them separately would make
/// the second acquire wait on the first forever. Disjoint spans are taken earliest
/// start first, so two updates swapping slots cannot hold one each and wait.
pub(crate) fn update_lock_plan(old: Span, new: Span) -> Vec<Span> {
    if old.overlaps(&new) {
        vec![old.cover(&new)]
    } else {
        let mut plan = vec![old, new];
        plan.sort();
        plan
    }
}

fn record<T>(op: &'static str, started: Instant, result: &Result<T, BookingError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    metrics::counter!(BOOKING_OPS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_OP_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

pub struct BookingResolver {
    halls: Arc<HallRegistry>,
    locks: Arc<IntervalLockManager>,
    store: Arc<dyn BookingStore>,
    policy: LockPolicy,
}

impl BookingResolver {
    pub fn new(
        halls: Arc<HallRegistry>,
        locks: Arc<IntervalLockManager>,
        store: Arc<dyn BookingStore>,
        policy: LockPolicy,
    ) -> Self {
        Self {
            halls,
            locks,
            store,
            policy,
        }
    }

    pub fn halls(&self) -> &HallRegistry {
        &self.halls
    }

    pub fn locks(&self) -> &IntervalLockManager {
        &self.locks
    }

    fn capacity_of(&self, hall_id: &str) -> Result<u32, BookingError> {
        self.halls
            .capacity_of(hall_id)
            .ok_or_else(|| BookingError::UnknownHall(hall_id.to_string()))
    }

    async fn lock_span(&self, hall_id: &str, span: Span) -> Result<SpanGuard<'_>, BookingError> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(guard) = self.locks.lock(hall_id, span, self.policy.timeout).await {
                return Ok(guard);
            }
            warn!(hall_id, %span, attempt, attempts, "span lock timed out");
        }
        Err(BookingError::LockUnavailable {
            hall_id: hall_id.to_string(),
            span,
        })
    }

    /// Take every span of `plan` in order. On failure, spans already taken are released.
    async fn lock_plan(&self, hall_id: &str, plan: &[Span]) -> Result<Vec<SpanGuard<'_>>, BookingError> {
        let mut guards = Vec::with_capacity(plan.len());
        for &span in plan {
            guards.push(self.lock_span(hall_id, span).await?);
        }
        Ok(guards)
    }

    // ── create ───────────────────────────────────────────────

    /// Book `hall_id` for `[start, end)`. Returns the new booking id.
    pub async fn create(&self, hall_id: &str, start: Ms, end: Ms, seats: u32) -> Result<Ulid, BookingError> {
        let started = Instant::now();
        let result = self.create_locked(hall_id, start, end, seats).await;
        record("create", started, &result);
        result
    }

    async fn create_locked(&self, hall_id: &str, start: Ms, end: Ms, seats: u32) -> Result<Ulid, BookingError> {
        let span = validate_span(start, end)?;
        validate_seats(seats, self.capacity_of(hall_id)?)?;

        let _guard = self.lock_span(hall_id, span).await?;
        match self.store.insert_if_no_overlap(hall_id, span, seats).await {
            Ok(Some(id)) => {
                info!(%id, hall_id, %span, seats, "booking created");
                Ok(id)
            }
            Ok(None) => {
                debug!(hall_id, %span, "slot already booked");
                Err(BookingError::Conflict {
                    hall_id: hall_id.to_string(),
                    span,
                })
            }
            Err(e) => {
                error!(hall_id, %span, "create failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Book several slots. Each request succeeds or fails on its own.
    pub async fn create_batch(
        &self,
        requests: Vec<BookingRequest>,
    ) -> Result<Vec<Result<Ulid, BookingError>>, BookingError> {
        if requests.len() > MAX_BATCH_SIZE {
            return Err(BookingError::LimitExceeded("batch too large"));
        }
        let mut results = Vec::with_capacity(requests.len());
        for r in requests {
            results.push(self.create(&r.hall_id, r.start, r.end, r.seats).await);
        }
        Ok(results)
    }

    // ── update ───────────────────────────────────────────────

    /// Move booking `id` to `[start, end)` with `seats`. Returns the updated booking.
    pub async fn update(&self, id: Ulid, start: Ms, end: Ms, seats: u32) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.update_locked(id, start, end, seats).await;
        record("update", started, &result);
        result
    }

    async fn update_locked(&self, id: Ulid, start: Ms, end: Ms, seats: u32) -> Result<Booking, BookingError> {
        let new = validate_span(start, end)?;

        let mut replans = 0;
        loop {
            let current = self.store.find_by_id(id).await?.ok_or(BookingError::NotFound(id))?;
            validate_seats(seats, self.capacity_of(&current.hall_id)?)?;
            let hall_id = current.hall_id;

            let plan = update_lock_plan(current.span, new);
            let _guards = self.lock_plan(&hall_id, &plan).await?;

            // It may have been cancelled or moved while we waited.
            let locked = self.store.find_by_id(id).await?.ok_or(BookingError::NotFound(id))?;
            if locked.span != current.span {
                replans += 1;
                if replans > MAX_REPLANS {
                    warn!(%id, "booking kept moving, giving up");
                    return Err(BookingError::LockUnavailable { hall_id, span: new });
                }
                debug!(%id, from = %current.span, to = %locked.span, "booking moved while locking, re-planning");
                continue;
            }

            if self.store.find_overlapping(&hall_id, new, Some(id)).await? {
                debug!(%id, %hall_id, %new, "new slot not available");
                return Err(BookingError::Conflict { hall_id, span: new });
            }
            if !self.store.mutate_range(id, new, seats).await? {
                return Err(BookingError::NotFound(id));
            }

            info!(%id, %hall_id, from = %current.span, to = %new, seats, "booking updated");
            return Ok(Booking {
                id,
                hall_id,
                span: new,
                seats,
            });
        }
    }

    // ── cancel ───────────────────────────────────────────────

    /// Cancel booking `id`. Returns the cancelled booking.
    pub async fn cancel(&self, id: Ulid) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.cancel_locked(id).await;
        record("cancel", started, &result);
        result
    }

    async fn cancel_locked(&self, id: Ulid) -> Result<Booking, BookingError> {
        let mut replans = 0;
        loop {
            let current = self.store.find_by_id(id).await?.ok_or(BookingError::NotFound(id))?;
            let _guard = self.lock_span(&current.hall_id, current.span).await?;

            let locked = self.store.find_by_id(id).await?.ok_or(BookingError::NotFound(id))?;
            if locked.span != current.span {
                replans += 1;
                if replans > MAX_REPLANS {
                    warn!(%id, "booking kept moving, giving up");
                    return Err(BookingError::LockUnavailable {
                        hall_id: current.hall_id,
                        span: locked.span,
                    });
                }
                debug!(%id, "booking moved while locking, re-planning");
                continue;
            }

            let removed = self.store.delete(id).await?.ok_or(BookingError::NotFound(id))?;
            info!(%id, hall_id = %removed.hall_id, span = %removed.span, "booking cancelled");
            return Ok(removed);
        }
    }

    // ── reads ────────────────────────────────────────────────

    /// Bookings overlapping `[start, end)`, sorted by hall then start. Takes no locks.
    pub async fn list(&self, start: Ms, end: Ms) -> Result<Vec<Booking>, BookingError> {
        let started = Instant::now();
        let result = self.list_window(start, end).await;
        record("list", started, &result);
        result
    }

    async fn list_window(&self, start: Ms, end: Ms) -> Result<Vec<Booking>, BookingError> {
        let window = validate_window(start, end)?;
        Ok(self.store.find_in_window(window).await?)
    }

    /// Halls seating at least `min_seats` with no booking during `[start, end)`.
    pub async fn available_halls(&self, start: Ms, end: Ms, min_seats: u32) -> Result<Vec<HallInfo>, BookingError> {
        let window = validate_window(start, end)?;
        let mut free = Vec::new();
        for hall in self.halls.halls() {
            if hall.capacity < min_seats {
                continue;
            }
            if !self.store.find_overlapping(&hall.hall_id, window, None).await? {
                free.push(hall);
            }
        }
        Ok(free)
    }

    /// Free gaps of `hall_id` inside `[start, end)`, optionally at least `min_duration` long.
    pub async fn availability(
        &self,
        hall_id: &str,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, BookingError> {
        let window = validate_window(start, end)?;
        self.capacity_of(hall_id)?;

        let booked: Vec<Span> = self
            .store
            .find_in_window(window)
            .await?
            .into_iter()
            .filter(|b| b.hall_id == hall_id)
            .map(|b| b.span)
            .collect();
        let mut free = free_windows(&window, &booked);
        if let Some(min) = min_duration {
            free.retain(|s| s.duration_ms() >= min);
        }
        Ok(free)
    }

    // ── admin ────────────────────────────────────────────────

    /// Remove every booking. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize, BookingError> {
        let removed = self.store.delete_all().await?;
        info!("cleared {removed} bookings");
        Ok(removed)
    }
}
