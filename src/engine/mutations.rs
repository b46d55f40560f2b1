use std::future::Future;
use std::sync::Arc;

use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::repo::RepoError;

use super::conflict::{all_free, all_free_outside, authorize, now_secs, validate_booking_span};
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy)]
pub struct NewBooking {
    pub id: Ulid,
    pub entity_id: Ulid,
    /// Owner of the new booking.
    pub user_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub thing: String,
}

/// Run an admission section on its own task. The locks it takes stay held
/// until its write lands, even if the caller stops waiting.
async fn run_detached<T, F>(op: &'static str, section: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(section).await.map_err(|e| EngineError::Internal {
        op,
        source: RepoError::Journal(format!("admission task failed: {e}")),
    })?
}

impl Engine {
    /// Admit a booking: the owner holds nothing else in the range, and the
    /// entity has room in every bucket of it.
    pub async fn create_booking(self: &Arc<Self>, new: NewBooking) -> Result<Booking, EngineError> {
        let engine = Arc::clone(self);
        run_detached("create booking", async move { engine.admit_booking(new).await }).await
    }

    async fn admit_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        validate_booking_span(&new.span)?;
        let _guard = self.lock_admission(new.user_id, new.entity_id).await;

        if self
            .repos
            .bookings
            .get_by_id(new.id)
            .await
            .map_err(EngineError::internal("get booking"))?
            .is_some()
        {
            return Err(EngineError::AlreadyExists(new.id));
        }

        if let Some(held) = self.user_bookings(new.user_id, new.span).await?.first() {
            debug!("user {} already holds {} over {:?}", new.user_id, held.id, new.span);
            return Err(EngineError::AlreadyHaveBooking(held.id));
        }

        let entity = self.entity(new.entity_id).await?;
        let taken = self.entity_bookings(entity.id, new.span).await?;
        all_free(&self.workload.compute(&entity, &new.span, &taken))?;

        let now = now_secs();
        let booking = self
            .repos
            .bookings
            .create(Booking {
                id: new.id,
                entity_id: new.entity_id,
                user_id: new.user_id,
                span: new.span,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(EngineError::internal("create booking"))?;
        debug!("booking {} created on {} for {}", booking.id, booking.entity_id, booking.user_id);
        Ok(booking)
    }

    /// Move a booking. Unset bounds keep their current value.
    ///
    /// The caller's other bookings must not overlap the new range. Buckets
    /// starting inside the booking's current range skip the capacity check.
    pub async fn update_booking(
        self: &Arc<Self>,
        token: &Token,
        id: Ulid,
        time_from: Option<Ts>,
        time_to: Option<Ts>,
    ) -> Result<Booking, EngineError> {
        let (engine, token) = (Arc::clone(self), *token);
        run_detached("update booking", async move {
            engine.move_booking(&token, id, time_from, time_to).await
        })
        .await
    }

    async fn move_booking(
        &self,
        token: &Token,
        id: Ulid,
        time_from: Option<Ts>,
        time_to: Option<Ts>,
    ) -> Result<Booking, EngineError> {
        let current = self.booking(id).await?;
        authorize(token, &current)?;

        let _guard = self.lock_admission(token.user_id, current.entity_id).await;
        // Re-read under the lock; a concurrent update may have moved it.
        let current = self.booking(id).await?;

        let from = time_from.unwrap_or(current.span.start);
        let to = time_to.unwrap_or(current.span.end);
        if from >= to {
            return Err(EngineError::InvalidBookingTime);
        }
        let span = Span::new(from, to);
        validate_booking_span(&span)?;

        let mine = self.user_bookings(token.user_id, span).await?;
        if let Some(held) = mine.iter().find(|b| b.id != current.id) {
            return Err(EngineError::AlreadyHaveBooking(held.id));
        }

        let entity = self.entity(current.entity_id).await?;
        let taken = self.entity_bookings(entity.id, span).await?;
        all_free_outside(&self.workload.compute(&entity, &span, &taken), &current.span)?;

        let updated = self
            .repos
            .bookings
            .update(id, span, now_secs())
            .await
            .map_err(EngineError::internal("update booking"))?
            .ok_or(EngineError::BookingNotFound(id))?;
        debug!("booking {id} moved {:?} -> {:?}", current.span, updated.span);
        Ok(updated)
    }

    pub async fn delete_booking(&self, token: &Token, id: Ulid) -> Result<(), EngineError> {
        let booking = self.booking(id).await?;
        authorize(token, &booking)?;
        let removed = self
            .repos
            .bookings
            .delete(id)
            .await
            .map_err(EngineError::internal("delete booking"))?;
        if !removed {
            return Err(EngineError::BookingNotFound(id));
        }
        debug!("booking {id} deleted by {}", token.user_id);
        Ok(())
    }

    /// Only the booking's owner may attach orders.
    pub async fn create_order(&self, token: &Token, new: NewOrder) -> Result<Order, EngineError> {
        if new.thing.len() > MAX_THING_LEN {
            return Err(EngineError::LimitExceeded("order text too long"));
        }
        let booking = self.booking(new.booking_id).await?;
        if booking.user_id != token.user_id {
            return Err(EngineError::NoAccessToBooking(booking.id));
        }
        let existing = self
            .repos
            .orders
            .list_for_booking(booking.id)
            .await
            .map_err(EngineError::internal("list orders"))?;
        if existing.len() >= MAX_ORDERS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many orders on booking"));
        }
        if self
            .repos
            .orders
            .get_by_id(new.id)
            .await
            .map_err(EngineError::internal("get order"))?
            .is_some()
        {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let now = now_secs();
        self.repos
            .orders
            .create(Order {
                id: new.id,
                booking_id: booking.id,
                thing: new.thing,
                completed: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(EngineError::internal("create order"))
    }

    pub async fn delete_order(&self, token: &Token, id: Ulid) -> Result<(), EngineError> {
        let order = self
            .repos
            .orders
            .get_by_id(id)
            .await
            .map_err(EngineError::internal("get order"))?
            .ok_or(EngineError::OrderNotFound(id))?;
        let booking = self.booking(order.booking_id).await?;
        authorize(token, &booking)?;
        let removed = self
            .repos
            .orders
            .delete(id)
            .await
            .map_err(EngineError::internal("delete order"))?;
        if !removed {
            return Err(EngineError::OrderNotFound(id));
        }
        Ok(())
    }
}
