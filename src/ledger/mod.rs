mod store;
mod writer;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use writer::{wal_writer_loop, WalCommand};

pub type SharedHallBookings = Arc<RwLock<HallBookings>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    WalError(String),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
            StoreError::LimitExceeded(msg) => write!(f, "store limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence contract the booking resolver is written against.
///
/// Each method is a single atomic operation from the caller's point of view.
/// None of them take span locks; exclusivity between callers is the resolver's job.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Whether any booking of `hall_id` overlaps `span`, ignoring `exclude`.
    async fn find_overlapping(
        &self,
        hall_id: &str,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, StoreError>;

    /// Insert a booking unless one of `hall_id` already overlaps `span`.
    /// Returns the new booking id, or `None` if an overlap was found.
    async fn insert_if_no_overlap(
        &self,
        hall_id: &str,
        span: Span,
        seats: u32,
    ) -> Result<Option<Ulid>, StoreError>;

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    /// Unconditionally move an existing booking. `false` if it no longer exists.
    async fn mutate_range(&self, id: Ulid, span: Span, seats: u32) -> Result<bool, StoreError>;

    /// Remove a booking, returning what was removed.
    async fn delete(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    /// Bookings overlapping `window` across all halls, sorted by hall then start.
    async fn find_in_window(&self, window: Span) -> Result<Vec<Booking>, StoreError>;

    /// Remove every booking. Returns how many were removed.
    async fn delete_all(&self) -> Result<usize, StoreError>;
}

/// Booking ledger: per-hall sorted booking lists, optionally backed by a WAL.
pub struct Ledger {
    halls: DashMap<String, SharedHallBookings>,
    /// Reverse lookup: booking id → hall id
    booking_to_hall: DashMap<Ulid, String>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Single-booking mutations hold this shared. Compaction and clear hold it
    /// exclusively so no append lands between their snapshot and their write.
    /// Always taken before any hall lock.
    barrier: RwLock<()>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Apply an event directly to a hall (caller holds the hall lock).
fn apply_to_hall(hall: &mut HallBookings, event: &Event, index: &DashMap<Ulid, String>) {
    match event {
        Event::BookingCreated { id, hall_id, span, seats } => {
            hall.insert(Booking {
                id: *id,
                hall_id: hall_id.clone(),
                span: *span,
                seats: *seats,
            });
            index.insert(*id, hall_id.clone());
        }
        Event::BookingMoved { id, hall_id, span, seats } => {
            hall.remove(*id);
            hall.insert(Booking {
                id: *id,
                hall_id: hall_id.clone(),
                span: *span,
                seats: *seats,
            });
        }
        Event::BookingCancelled { id, .. } => {
            hall.remove(*id);
            index.remove(id);
        }
        // Cleared is handled at the ledger level, not here
        Event::LedgerCleared => {}
    }
}

fn event_hall_id(event: &Event) -> Option<&str> {
    match event {
        Event::BookingCreated { hall_id, .. }
        | Event::BookingMoved { hall_id, .. }
        | Event::BookingCancelled { hall_id, .. } => Some(hall_id),
        Event::LedgerCleared => None,
    }
}

impl Ledger {
    /// A ledger that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self {
            halls: DashMap::new(),
            booking_to_hall: DashMap::new(),
            wal_tx: None,
            barrier: RwLock::new(()),
        }
    }

    /// Replay the WAL at `wal_path` and keep appending to it.
    /// Must be called inside a tokio runtime (spawns the WAL writer task).
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild plain state first; nobody else can see it yet.
        let index = DashMap::new();
        let mut halls: HashMap<String, HallBookings> = HashMap::new();
        for event in &events {
            match event_hall_id(event) {
                Some(hall_id) => {
                    let hall = halls.entry(hall_id.to_string()).or_default();
                    apply_to_hall(hall, event, &index);
                }
                None => {
                    halls.clear();
                    index.clear();
                }
            }
        }
        tracing::info!(
            "ledger replayed {} events from {}: {} bookings in {} halls",
            events.len(),
            wal_path.display(),
            index.len(),
            halls.values().filter(|h| !h.is_empty()).count()
        );

        Ok(Self {
            halls: halls
                .into_iter()
                .map(|(id, hb)| (id, Arc::new(RwLock::new(hb))))
                .collect(),
            booking_to_hall: index,
            wal_tx: Some(wal_tx),
            barrier: RwLock::new(()),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_hall.len()
    }

    fn get_hall(&self, hall_id: &str) -> Option<SharedHallBookings> {
        self.halls.get(hall_id).map(|e| e.value().clone())
    }

    fn hall_or_create(&self, hall_id: &str) -> SharedHallBookings {
        if let Some(hall) = self.get_hall(hall_id) {
            return hall;
        }
        self.halls
            .entry(hall_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn hall_of(&self, id: &Ulid) -> Option<String> {
        self.booking_to_hall.get(id).map(|e| e.value().clone())
    }

    /// All hall handles, sorted by hall id (the order hall write locks are taken in).
    fn sorted_halls(&self) -> Vec<(String, SharedHallBookings)> {
        let mut halls: Vec<_> = self
            .halls
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        halls.sort_by(|a, b| a.0.cmp(&b.0));
        halls
    }

    /// Write event to WAL via the background group-commit writer. No-op in memory.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// WAL-append + apply. The caller holds the barrier and the hall's write lock.
    async fn persist_and_apply(&self, hall: &mut HallBookings, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_hall(hall, event, &self.booking_to_hall);
        Ok(())
    }

    /// Rewrite the WAL as one `BookingCreated` per live booking.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.barrier.write().await;

        let mut events = Vec::new();
        for (_, hall) in self.sorted_halls() {
            let guard = hall.read().await;
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                id: b.id,
                hall_id: b.hall_id.clone(),
                span: b.span,
                seats: b.seats,
            }));
        }
        let live = events.len();

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {live} bookings");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
