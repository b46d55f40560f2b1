use ulid::Ulid;

use crate::model::*;

use super::conflict::{authorize, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// Workload of one entity over `window`, one item per bucket.
    pub async fn entity_workload(&self, entity_id: Ulid, window: Span) -> Result<Vec<WorkloadItem>, EngineError> {
        validate_window(&window)?;
        let entity = self.entity(entity_id).await?;
        let bookings = self.entity_bookings(entity.id, window).await?;
        tracing::debug!(
            "workload for {entity_id} over {:?}: {} intersecting bookings",
            window,
            bookings.len()
        );
        Ok(self.workload.compute(&entity, &window, &bookings))
    }

    pub async fn get_booking(&self, token: &Token, id: Ulid) -> Result<BookingInfo, EngineError> {
        let booking = self.booking(id).await?;
        authorize(token, &booking)?;
        self.enrich(booking).await
    }

    /// The caller's bookings, newest first.
    pub async fn list_my_bookings(&self, token: &Token) -> Result<Vec<BookingInfo>, EngineError> {
        let bookings = self
            .repos
            .bookings
            .list_for_user(token.user_id)
            .await
            .map_err(EngineError::internal("list user bookings"))?;
        self.enrich_all(bookings).await
    }

    /// Every booking, newest first. Elevated roles only.
    pub async fn list_all_bookings(&self, token: &Token) -> Result<Vec<BookingInfo>, EngineError> {
        if !token.role.is_elevated() {
            return Err(EngineError::NoRights);
        }
        let bookings = self
            .repos
            .bookings
            .list_all()
            .await
            .map_err(EngineError::internal("list bookings"))?;
        self.enrich_all(bookings).await
    }

    pub async fn orders_for_booking(&self, token: &Token, booking_id: Ulid) -> Result<Vec<Order>, EngineError> {
        let booking = self.booking(booking_id).await?;
        authorize(token, &booking)?;
        self.repos
            .orders
            .list_for_booking(booking_id)
            .await
            .map_err(EngineError::internal("list orders"))
    }

    async fn enrich_all(&self, bookings: Vec<Booking>) -> Result<Vec<BookingInfo>, EngineError> {
        let mut out = Vec::with_capacity(bookings.len());
        for booking in bookings {
            out.push(self.enrich(booking).await?);
        }
        Ok(out)
    }

    async fn enrich(&self, booking: Booking) -> Result<BookingInfo, EngineError> {
        let entity = self
            .repos
            .entities
            .get_by_id(booking.entity_id)
            .await
            .map_err(EngineError::internal("get entity"))?;
        let user = self
            .repos
            .users
            .get_by_id(booking.user_id)
            .await
            .map_err(EngineError::internal("get user"))?;
        let orders = self
            .repos
            .orders
            .list_for_booking(booking.id)
            .await
            .map_err(EngineError::internal("list orders"))?;
        Ok(BookingInfo {
            booking,
            entity,
            user,
            orders,
        })
    }
}
