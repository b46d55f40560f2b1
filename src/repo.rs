use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;
use crate::store::InMemoryStore;

/// Unexpected storage failure. Domain outcomes never travel through here.
#[derive(Debug)]
pub enum RepoError {
    Journal(String),
    Io(std::io::Error),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::Journal(e) => write!(f, "journal error: {e}"),
            RepoError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for RepoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepoError::Io(e) => Some(e),
            RepoError::Journal(_) => None,
        }
    }
}

impl From<std::io::Error> for RepoError {
    fn from(e: std::io::Error) -> Self {
        RepoError::Io(e)
    }
}

#[async_trait]
pub trait BookingsRepo: Send + Sync {
    async fn create(&self, booking: Booking) -> Result<Booking, RepoError>;
    async fn get_by_id(&self, id: Ulid) -> Result<Option<Booking>, RepoError>;
    /// Newest first.
    async fn list_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, RepoError>;
    /// Newest first.
    async fn list_all(&self) -> Result<Vec<Booking>, RepoError>;
    /// Replace the booking's range. `None` if the booking is gone.
    async fn update(&self, id: Ulid, span: Span, updated_at: Ts) -> Result<Option<Booking>, RepoError>;
    /// Returns whether a booking was removed.
    async fn delete(&self, id: Ulid) -> Result<bool, RepoError>;
    /// The user's bookings whose range overlaps `window` under
    /// [`crate::engine::interval::overlaps`].
    async fn list_intersected_for_user(&self, user_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError>;
    /// The entity's bookings whose range overlaps `window` under
    /// [`crate::engine::interval::overlaps`].
    async fn list_intersected_for_entity(&self, entity_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError>;
}

#[async_trait]
pub trait BookingEntitiesRepo: Send + Sync {
    async fn get_by_id(&self, id: Ulid) -> Result<Option<BookingEntity>, RepoError>;
    async fn get_for_floor(&self, floor_id: Ulid) -> Result<Vec<BookingEntity>, RepoError>;
}

#[async_trait]
pub trait FloorsRepo: Send + Sync {
    async fn get_by_id(&self, id: Ulid) -> Result<Option<Floor>, RepoError>;
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn get_by_id(&self, id: Ulid) -> Result<Option<User>, RepoError>;
}

#[async_trait]
pub trait OrdersRepo: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order, RepoError>;
    async fn get_by_id(&self, id: Ulid) -> Result<Option<Order>, RepoError>;
    /// Oldest first.
    async fn list_for_booking(&self, booking_id: Ulid) -> Result<Vec<Order>, RepoError>;
    async fn delete(&self, id: Ulid) -> Result<bool, RepoError>;
}

/// The collaborators the engine is built over.
#[derive(Clone)]
pub struct Repos {
    pub bookings: Arc<dyn BookingsRepo>,
    pub entities: Arc<dyn BookingEntitiesRepo>,
    pub floors: Arc<dyn FloorsRepo>,
    pub users: Arc<dyn UsersRepo>,
    pub orders: Arc<dyn OrdersRepo>,
}

impl Repos {
    /// Every collaborator backed by the same store.
    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            bookings: store.clone(),
            entities: store.clone(),
            floors: store.clone(),
            users: store.clone(),
            orders: store,
        }
    }
}
