use ulid::Ulid;

use crate::model::*;

use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Floor-level availability for `user_id`: an entity is free when every
    /// bucket of its workload is free. If the user already holds any booking
    /// in the window, nothing on the floor is free for them.
    pub async fn floor_workload(
        &self,
        floor_id: Ulid,
        window: Span,
        user_id: Ulid,
    ) -> Result<Vec<FloorWorkloadItem>, EngineError> {
        validate_window(&window)?;
        self.repos
            .floors
            .get_by_id(floor_id)
            .await
            .map_err(EngineError::internal("get floor"))?
            .ok_or(EngineError::FloorNotFound(floor_id))?;

        let entities = self
            .repos
            .entities
            .get_for_floor(floor_id)
            .await
            .map_err(EngineError::internal("list floor entities"))?;
        let user_busy = !self.user_bookings(user_id, window).await?.is_empty();

        let mut items = Vec::with_capacity(entities.len());
        for entity in entities {
            let is_free = if user_busy {
                false
            } else {
                let bookings = self.entity_bookings(entity.id, window).await?;
                self.workload
                    .compute(&entity, &window, &bookings)
                    .iter()
                    .all(|i| i.is_free)
            };
            items.push(FloorWorkloadItem { entity, is_free });
        }
        tracing::debug!(
            "floor {floor_id} workload for {user_id}: {} entities, user busy: {user_busy}",
            items.len()
        );
        Ok(items)
    }
}
