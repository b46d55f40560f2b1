mod conflict;
mod error;
mod floor;
pub mod interval;
mod mutations;
mod queries;
mod workload;

pub use error::{EngineError, ErrorCategory};
pub use mutations::{NewBooking, NewOrder};
pub use workload::WorkloadEngine;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::*;
use crate::repo::Repos;

/// Async mutexes created on demand per key.
#[derive(Default)]
struct KeyedLocks {
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: Ulid) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key).or_default().value().clone();
        mutex.lock_owned().await
    }
}

/// Held across an admission check and the write it guards.
pub(super) struct AdmissionGuard {
    _user: OwnedMutexGuard<()>,
    _entity: OwnedMutexGuard<()>,
}

/// Booking service: admission control for writes, workload for reads.
pub struct Engine {
    pub(super) repos: Repos,
    pub(super) workload: WorkloadEngine,
    user_locks: KeyedLocks,
    entity_locks: KeyedLocks,
}

impl Engine {
    pub fn new(repos: Repos, workload: WorkloadEngine) -> Self {
        Self {
            repos,
            workload,
            user_locks: KeyedLocks::default(),
            entity_locks: KeyedLocks::default(),
        }
    }

    pub fn workload_engine(&self) -> &WorkloadEngine {
        &self.workload
    }

    pub fn repos(&self) -> &Repos {
        &self.repos
    }

    /// Serialize admission for one user and one entity.
    /// Always user first, then entity.
    pub(super) async fn lock_admission(&self, user_id: Ulid, entity_id: Ulid) -> AdmissionGuard {
        let user = self.user_locks.lock(user_id).await;
        let entity = self.entity_locks.lock(entity_id).await;
        AdmissionGuard {
            _user: user,
            _entity: entity,
        }
    }

    pub(super) async fn entity(&self, id: Ulid) -> Result<BookingEntity, EngineError> {
        self.repos
            .entities
            .get_by_id(id)
            .await
            .map_err(EngineError::internal("get entity"))?
            .ok_or(EngineError::EntityNotFound(id))
    }

    pub(super) async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.repos
            .bookings
            .get_by_id(id)
            .await
            .map_err(EngineError::internal("get booking"))?
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub(super) async fn entity_bookings(&self, entity_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError> {
        self.repos
            .bookings
            .list_intersected_for_entity(entity_id, window)
            .await
            .map_err(EngineError::internal("list entity bookings"))
    }

    pub(super) async fn user_bookings(&self, user_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError> {
        self.repos
            .bookings
            .list_intersected_for_user(user_id, window)
            .await
            .map_err(EngineError::internal("list user bookings"))
    }
}
