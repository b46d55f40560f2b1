use crate::model::*;

use super::interval::{bucket_count, clamp_intersection};

/// Per-bucket occupancy for a single entity.
///
/// Bucket granularity is fixed at construction so different engines
/// (and tests) can run with different grids.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadEngine {
    bucket_secs: Ts,
}

impl Default for WorkloadEngine {
    fn default() -> Self {
        Self::new(15)
    }
}

impl WorkloadEngine {
    pub fn new(bucket_minutes: u32) -> Self {
        debug_assert!(bucket_minutes > 0, "bucket must be positive");
        Self {
            bucket_secs: Ts::from(bucket_minutes.max(1)) * 60,
        }
    }

    pub fn bucket_secs(&self) -> Ts {
        self.bucket_secs
    }

    /// Whether `t` falls on the bucket grid.
    pub fn is_aligned(&self, t: Ts) -> bool {
        t.rem_euclid(self.bucket_secs) == 0
    }

    /// Occupancy counter per bucket of `window`.
    ///
    /// Each booking is clamped to the window, then walked from the clamped
    /// start up to and including the clamped end. An end that lands on a
    /// bucket boundary therefore also counts against the bucket it begins.
    pub fn occupancy(&self, window: &Span, bookings: &[Booking]) -> Vec<u32> {
        let mut counts = vec![0u32; bucket_count(window.start, window.end, self.bucket_secs)];
        if counts.is_empty() {
            return counts;
        }
        for booking in bookings {
            let (lower, upper) = clamp_intersection(&booking.span, window);
            let mut next = Some(lower);
            while let Some(t) = next.filter(|t| *t <= upper) {
                let idx = (t - window.start) / self.bucket_secs;
                if let Some(slot) = usize::try_from(idx).ok().and_then(|i| counts.get_mut(i)) {
                    *slot += 1;
                }
                next = t.checked_add(self.bucket_secs);
            }
        }
        counts
    }

    /// Free/occupied flag for every bucket of `window`, given the bookings
    /// that intersect it.
    pub fn compute(
        &self,
        entity: &BookingEntity,
        window: &Span,
        bookings: &[Booking],
    ) -> Vec<WorkloadItem> {
        self.occupancy(window, bookings)
            .into_iter()
            .enumerate()
            .map(|(i, occupied)| WorkloadItem {
                time: window.start + i as Ts * self.bucket_secs,
                is_free: is_free(entity, occupied),
            })
            .collect()
    }
}

fn is_free(entity: &BookingEntity, occupied: u32) -> bool {
    match entity.kind {
        EntityKind::OpenSpace => occupied < entity.capacity,
        EntityKind::Room => occupied == 0,
    }
}
