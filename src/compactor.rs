use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::InMemoryStore;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &InMemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends ({} live bookings)", store.booking_count());
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::repo::BookingsRepo;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spacebook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn churn(store: &InMemoryStore, n: i64) {
        for i in 0..n {
            let booking = Booking {
                id: Ulid::new(),
                entity_id: Ulid::new(),
                user_id: Ulid::new(),
                span: Span::new(i * 900, i * 900 + 900),
                created_at: i,
                updated_at: i,
            };
            BookingsRepo::create(store, booking.clone()).await.unwrap();
            BookingsRepo::delete(store, booking.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = InMemoryStore::open(&path).unwrap();

        churn(&store, 3).await;
        assert!(!compact_if_due(&store, 10).await);
        assert_eq!(store.appends_since_compact().await, 6);

        churn(&store, 3).await;
        assert!(compact_if_due(&store, 10).await);
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        let _ = std::fs::remove_file(&path);
    }
}
