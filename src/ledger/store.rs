use async_trait::async_trait;
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_HALL;
use crate::model::*;

use super::{BookingStore, Ledger, StoreError};

#[async_trait]
impl BookingStore for Ledger {
    async fn find_overlapping(
        &self,
        hall_id: &str,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, StoreError> {
        let Some(hall) = self.get_hall(hall_id) else {
            return Ok(false);
        };
        let guard = hall.read().await;
        let found = guard
            .overlapping(&span)
            .any(|b| Some(b.id) != exclude);
        Ok(found)
    }

    async fn insert_if_no_overlap(
        &self,
        hall_id: &str,
        span: Span,
        seats: u32,
    ) -> Result<Option<Ulid>, StoreError> {
        let _gate = self.barrier.read().await;
        let hall = self.hall_or_create(hall_id);
        let mut guard = hall.write().await;

        if guard.overlapping(&span).next().is_some() {
            return Ok(None);
        }
        if guard.len() >= MAX_BOOKINGS_PER_HALL {
            return Err(StoreError::LimitExceeded("too many bookings on hall"));
        }

        let id = Ulid::new();
        let event = Event::BookingCreated {
            id,
            hall_id: hall_id.to_string(),
            span,
            seats,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Some(id))
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        let Some(hall) = self.hall_of(&id).and_then(|h| self.get_hall(&h)) else {
            return Ok(None);
        };
        let guard = hall.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn mutate_range(&self, id: Ulid, span: Span, seats: u32) -> Result<bool, StoreError> {
        let _gate = self.barrier.read().await;
        let Some(hall_id) = self.hall_of(&id) else {
            return Ok(false);
        };
        let Some(hall) = self.get_hall(&hall_id) else {
            return Ok(false);
        };
        let mut guard = hall.write().await;
        if guard.get(id).is_none() {
            // Cancelled between the index lookup and the lock
            return Ok(false);
        }

        let event = Event::BookingMoved {
            id,
            hall_id,
            span,
            seats,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    async fn delete(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        let _gate = self.barrier.read().await;
        let Some(hall_id) = self.hall_of(&id) else {
            return Ok(None);
        };
        let Some(hall) = self.get_hall(&hall_id) else {
            return Ok(None);
        };
        let mut guard = hall.write().await;
        let Some(existing) = guard.get(id).cloned() else {
            return Ok(None);
        };

        let event = Event::BookingCancelled { id, hall_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Some(existing))
    }

    async fn find_in_window(&self, window: Span) -> Result<Vec<Booking>, StoreError> {
        let mut found = Vec::new();
        for (_, hall) in self.sorted_halls() {
            let guard = hall.read().await;
            found.extend(guard.overlapping(&window).cloned());
        }
        Ok(found)
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let _gate = self.barrier.write().await;

        // Readers may still be inside a hall; wait them out in sorted order.
        let halls = self.sorted_halls();
        let mut guards = Vec::with_capacity(halls.len());
        for (_, hall) in &halls {
            guards.push(hall.write().await);
        }

        self.wal_append(&Event::LedgerCleared).await?;
        let mut removed = 0;
        for guard in guards.iter_mut() {
            for booking in guard.bookings.drain(..) {
                self.booking_to_hall.remove(&booking.id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}
