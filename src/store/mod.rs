mod journal;
mod seed;

pub use journal::Journal;
pub use seed::Layout;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::engine::interval::overlaps;
use crate::model::*;
use crate::repo::*;
use crate::wal::Wal;

/// Journalled tables. Shared with commit tasks so an append that reached
/// the WAL is always applied, even when its caller has gone away.
#[derive(Default)]
struct Ledger {
    bookings: DashMap<Ulid, Booking>,
    entity_bookings: DashMap<Ulid, Vec<Ulid>>,
    user_bookings: DashMap<Ulid, Vec<Ulid>>,
    orders: DashMap<Ulid, Order>,
    booking_orders: DashMap<Ulid, Vec<Ulid>>,
}

/// DashMap-backed implementation of every repository.
///
/// Bookings and orders are journalled when the store is opened over a WAL;
/// layout and users are seeded and live only in memory.
pub struct InMemoryStore {
    ledger: Arc<Ledger>,
    entities: DashMap<Ulid, BookingEntity>,
    floor_entities: DashMap<Ulid, Vec<Ulid>>,
    floors: DashMap<Ulid, Floor>,
    users: DashMap<Ulid, User>,
    journal: Option<Journal>,
    /// Commits hold it shared; compaction holds it exclusive so the
    /// snapshot it writes cannot miss an acknowledged append.
    commit_gate: Arc<RwLock<()>>,
}

impl Ledger {
    fn apply(&self, event: &Event) {
        match event {
            Event::BookingCreated {
                id,
                entity_id,
                user_id,
                span,
                created_at,
            } => {
                self.bookings.insert(
                    *id,
                    Booking {
                        id: *id,
                        entity_id: *entity_id,
                        user_id: *user_id,
                        span: *span,
                        created_at: *created_at,
                        updated_at: *created_at,
                    },
                );
                self.entity_bookings.entry(*entity_id).or_default().push(*id);
                self.user_bookings.entry(*user_id).or_default().push(*id);
            }
            Event::BookingUpdated { id, span, updated_at } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.span = *span;
                    booking.updated_at = *updated_at;
                }
            }
            Event::BookingDeleted { id } => {
                if let Some((_, booking)) = self.bookings.remove(id) {
                    if let Some(mut ids) = self.entity_bookings.get_mut(&booking.entity_id) {
                        ids.retain(|b| b != id);
                    }
                    if let Some(mut ids) = self.user_bookings.get_mut(&booking.user_id) {
                        ids.retain(|b| b != id);
                    }
                }
                if let Some((_, order_ids)) = self.booking_orders.remove(id) {
                    for oid in order_ids {
                        self.orders.remove(&oid);
                    }
                }
            }
            Event::OrderCreated {
                id,
                booking_id,
                thing,
                created_at,
            } => {
                self.orders.insert(
                    *id,
                    Order {
                        id: *id,
                        booking_id: *booking_id,
                        thing: thing.clone(),
                        completed: false,
                        created_at: *created_at,
                        updated_at: *created_at,
                    },
                );
                self.booking_orders.entry(*booking_id).or_default().push(*id);
            }
            Event::OrderDeleted { id } => {
                if let Some((_, order)) = self.orders.remove(id)
                    && let Some(mut ids) = self.booking_orders.get_mut(&order.booking_id)
                {
                    ids.retain(|o| o != id);
                }
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store with no journal.
    pub fn new() -> Self {
        Self::with_journal(None)
    }

    fn with_journal(journal: Option<Journal>) -> Self {
        Self {
            ledger: Arc::default(),
            entities: DashMap::new(),
            floor_entities: DashMap::new(),
            floors: DashMap::new(),
            users: DashMap::new(),
            journal,
            commit_gate: Arc::new(RwLock::new(())),
        }
    }

    /// Replay the WAL at `path` and keep journalling to it.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let store = Self::with_journal(Some(Journal::spawn(wal)));
        for event in &events {
            store.ledger.apply(event);
        }
        tracing::info!("replayed {} events from {}", events.len(), path.display());
        Ok(store)
    }

    // ── Layout ───────────────────────────────────────────────

    pub fn insert_floor(&self, floor: Floor) {
        self.floors.insert(floor.id, floor);
    }

    pub fn has_floor(&self, id: &Ulid) -> bool {
        self.floors.contains_key(id)
    }

    pub fn insert_entity(&self, entity: BookingEntity) {
        let (id, floor_id) = (entity.id, entity.floor_id);
        if let Some(previous) = self.entities.insert(id, entity)
            && let Some(mut ids) = self.floor_entities.get_mut(&previous.floor_id)
        {
            ids.retain(|e| *e != id);
        }
        self.floor_entities.entry(floor_id).or_default().push(id);
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn booking_count(&self) -> usize {
        self.ledger.bookings.len()
    }

    // ── Journal ──────────────────────────────────────────────

    /// Append `event` and apply it. Runs on its own task: once started, a
    /// commit completes even if the caller is dropped.
    async fn commit(&self, event: Event) -> Result<(), RepoError> {
        let gate = self.commit_gate.clone().read_owned().await;
        let journal = self.journal.clone();
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            let _gate = gate;
            if let Some(journal) = journal {
                journal.append(&event).await?;
            }
            ledger.apply(&event);
            Ok::<_, RepoError>(())
        })
        .await
        .map_err(|e| RepoError::Journal(format!("commit task failed: {e}")))?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.journal {
            Some(journal) => journal.appends_since_compact().await,
            None => 0,
        }
    }

    /// Rewrite the WAL with the minimal event set that recreates current state.
    pub async fn compact(&self) -> Result<(), RepoError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;
        journal.compact(self.snapshot_events()).await
    }

    fn snapshot_events(&self) -> Vec<Event> {
        let mut bookings: Vec<Booking> = self.ledger.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        let mut orders: Vec<Order> = self.ledger.orders.iter().map(|e| e.value().clone()).collect();
        orders.sort_by_key(|o| (o.created_at, o.id));

        let mut events = Vec::with_capacity(bookings.len() + orders.len());
        for b in bookings {
            events.push(Event::BookingCreated {
                id: b.id,
                entity_id: b.entity_id,
                user_id: b.user_id,
                span: b.span,
                created_at: b.created_at,
            });
            if b.updated_at != b.created_at {
                events.push(Event::BookingUpdated {
                    id: b.id,
                    span: b.span,
                    updated_at: b.updated_at,
                });
            }
        }
        for o in orders {
            events.push(Event::OrderCreated {
                id: o.id,
                booking_id: o.booking_id,
                thing: o.thing,
                created_at: o.created_at,
            });
        }
        events
    }

    fn collect_bookings(&self, index: &DashMap<Ulid, Vec<Ulid>>, key: &Ulid) -> Vec<Booking> {
        let ids = index.get(key).map(|e| e.value().clone()).unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.ledger.bookings.get(id).map(|b| b.value().clone()))
            .collect()
    }

    fn intersected(&self, index: &DashMap<Ulid, Vec<Ulid>>, key: &Ulid, window: &Span) -> Vec<Booking> {
        let mut hits: Vec<Booking> = self
            .collect_bookings(index, key)
            .into_iter()
            .filter(|b| overlaps(&b.span, window))
            .collect();
        hits.sort_by_key(|b| (b.span.start, b.id));
        hits
    }
}

fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl BookingsRepo for InMemoryStore {
    async fn create(&self, booking: Booking) -> Result<Booking, RepoError> {
        let id = booking.id;
        self.commit(Event::BookingCreated {
            id,
            entity_id: booking.entity_id,
            user_id: booking.user_id,
            span: booking.span,
            created_at: booking.created_at,
        })
        .await?;
        Ok(self.ledger.bookings.get(&id).map(|b| b.value().clone()).unwrap_or(booking))
    }

    async fn get_by_id(&self, id: Ulid) -> Result<Option<Booking>, RepoError> {
        Ok(self.ledger.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn list_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, RepoError> {
        let mut bookings = self.collect_bookings(&self.ledger.user_bookings, &user_id);
        newest_first(&mut bookings);
        Ok(bookings)
    }

    async fn list_all(&self) -> Result<Vec<Booking>, RepoError> {
        let mut bookings: Vec<Booking> = self.ledger.bookings.iter().map(|e| e.value().clone()).collect();
        newest_first(&mut bookings);
        Ok(bookings)
    }

    async fn update(&self, id: Ulid, span: Span, updated_at: Ts) -> Result<Option<Booking>, RepoError> {
        if !self.ledger.bookings.contains_key(&id) {
            return Ok(None);
        }
        self.commit(Event::BookingUpdated { id, span, updated_at }).await?;
        Ok(self.ledger.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn delete(&self, id: Ulid) -> Result<bool, RepoError> {
        if !self.ledger.bookings.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::BookingDeleted { id }).await?;
        Ok(true)
    }

    async fn list_intersected_for_user(&self, user_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError> {
        Ok(self.intersected(&self.ledger.user_bookings, &user_id, &window))
    }

    async fn list_intersected_for_entity(&self, entity_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError> {
        Ok(self.intersected(&self.ledger.entity_bookings, &entity_id, &window))
    }
}

#[async_trait]
impl BookingEntitiesRepo for InMemoryStore {
    async fn get_by_id(&self, id: Ulid) -> Result<Option<BookingEntity>, RepoError> {
        Ok(self.entities.get(&id).map(|e| e.value().clone()))
    }

    async fn get_for_floor(&self, floor_id: Ulid) -> Result<Vec<BookingEntity>, RepoError> {
        let ids = self
            .floor_entities
            .get(&floor_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| e.value().clone()))
            .collect())
    }
}

#[async_trait]
impl FloorsRepo for InMemoryStore {
    async fn get_by_id(&self, id: Ulid) -> Result<Option<Floor>, RepoError> {
        Ok(self.floors.get(&id).map(|f| f.value().clone()))
    }
}

#[async_trait]
impl UsersRepo for InMemoryStore {
    async fn get_by_id(&self, id: Ulid) -> Result<Option<User>, RepoError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }
}

#[async_trait]
impl OrdersRepo for InMemoryStore {
    async fn create(&self, order: Order) -> Result<Order, RepoError> {
        let id = order.id;
        self.commit(Event::OrderCreated {
            id,
            booking_id: order.booking_id,
            thing: order.thing.clone(),
            created_at: order.created_at,
        })
        .await?;
        Ok(self.ledger.orders.get(&id).map(|o| o.value().clone()).unwrap_or(order))
    }

    async fn get_by_id(&self, id: Ulid) -> Result<Option<Order>, RepoError> {
        Ok(self.ledger.orders.get(&id).map(|o| o.value().clone()))
    }

    async fn list_for_booking(&self, booking_id: Ulid) -> Result<Vec<Order>, RepoError> {
        let ids = self
            .ledger
            .booking_orders
            .get(&booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.ledger.orders.get(id).map(|o| o.value().clone()))
            .collect())
    }

    async fn delete(&self, id: Ulid) -> Result<bool, RepoError> {
        if !self.ledger.orders.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::OrderDeleted { id }).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spacebook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(entity_id: Ulid, user_id: Ulid, start: Ts, end: Ts, created_at: Ts) -> Booking {
        Booking {
            id: Ulid::new(),
            entity_id,
            user_id,
            span: Span::new(start, end),
            created_at,
            updated_at: created_at,
        }
    }

    fn order(booking_id: Ulid, thing: &str) -> Order {
        Order {
            id: Ulid::new(),
            booking_id,
            thing: thing.into(),
            completed: false,
            created_at: 10,
            updated_at: 10,
        }
    }

    #[tokio::test]
    async fn intersected_uses_booking_predicate() {
        let store = InMemoryStore::new();
        let (entity, user) = (Ulid::new(), Ulid::new());
        let inside = BookingsRepo::create(&store, booking(entity, user, 900, 1800, 1)).await.unwrap();
        BookingsRepo::create(&store, booking(entity, user, 1800, 2700, 2)).await.unwrap();
        // shares the window start and runs past its end: not flagged
        BookingsRepo::create(&store, booking(entity, Ulid::new(), 0, 3600, 3)).await.unwrap();

        let hits = store
            .list_intersected_for_entity(entity, Span::new(0, 1800))
            .await
            .unwrap();
        assert_eq!(hits, vec![inside.clone()]);

        let mine = store
            .list_intersected_for_user(user, Span::new(0, 1800))
            .await
            .unwrap();
        assert_eq!(mine, vec![inside]);
    }

    #[tokio::test]
    async fn lists_newest_first() {
        let store = InMemoryStore::new();
        let user = Ulid::new();
        let old = BookingsRepo::create(&store, booking(Ulid::new(), user, 0, 900, 100)).await.unwrap();
        let new = BookingsRepo::create(&store, booking(Ulid::new(), user, 900, 1800, 200)).await.unwrap();
        let other = BookingsRepo::create(&store, booking(Ulid::new(), Ulid::new(), 0, 900, 150)).await.unwrap();

        let mine = store.list_for_user(user).await.unwrap();
        assert_eq!(mine, vec![new.clone(), old.clone()]);
        let all = store.list_all().await.unwrap();
        assert_eq!(all, vec![new, other, old]);
    }

    #[tokio::test]
    async fn update_missing_booking_is_none() {
        let store = InMemoryStore::new();
        let result = store.update(Ulid::new(), Span::new(0, 900), 5).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn delete_booking_drops_orders() {
        let store = InMemoryStore::new();
        let b = BookingsRepo::create(&store, booking(Ulid::new(), Ulid::new(), 0, 900, 1)).await.unwrap();
        let o = OrdersRepo::create(&store, order(b.id, "coffee")).await.unwrap();

        assert!(BookingsRepo::delete(&store, b.id).await.unwrap());
        assert!(OrdersRepo::get_by_id(&store, o.id).await.unwrap().is_none());
        assert!(store.list_for_booking(b.id).await.unwrap().is_empty());
        assert!(!BookingsRepo::delete(&store, b.id).await.unwrap());
    }

    #[tokio::test]
    async fn entity_moves_between_floors() {
        let store = InMemoryStore::new();
        let (f1, f2) = (Ulid::new(), Ulid::new());
        let mut entity = BookingEntity {
            id: Ulid::new(),
            kind: EntityKind::Room,
            floor_id: f1,
            title: "Blue".into(),
            capacity: 4,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            created_at: 0,
            updated_at: 0,
        };
        store.insert_entity(entity.clone());
        entity.floor_id = f2;
        store.insert_entity(entity);
        assert!(store.get_for_floor(f1).await.unwrap().is_empty());
        assert_eq!(store.get_for_floor(f2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn journal_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let (entity, user) = (Ulid::new(), Ulid::new());
        let (kept, dropped, ord);
        {
            let store = InMemoryStore::open(&path).unwrap();
            kept = BookingsRepo::create(&store, booking(entity, user, 0, 900, 1)).await.unwrap();
            dropped = BookingsRepo::create(&store, booking(entity, user, 900, 1800, 2)).await.unwrap();
            store.update(kept.id, Span::new(0, 1800), 7).await.unwrap();
            ord = OrdersRepo::create(&store, order(kept.id, "projector")).await.unwrap();
            BookingsRepo::delete(&store, dropped.id).await.unwrap();
        }

        let store = InMemoryStore::open(&path).unwrap();
        assert_eq!(store.booking_count(), 1);
        let restored = BookingsRepo::get_by_id(&store, kept.id).await.unwrap().unwrap();
        assert_eq!(restored.span, Span::new(0, 1800));
        assert_eq!(restored.updated_at, 7);
        assert!(BookingsRepo::get_by_id(&store, dropped.id).await.unwrap().is_none());
        assert_eq!(store.list_for_booking(kept.id).await.unwrap(), vec![ord]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let user = Ulid::new();
        let survivor;
        {
            let store = InMemoryStore::open(&path).unwrap();
            for i in 0..20 {
                let b = BookingsRepo::create(&store, booking(Ulid::new(), user, i * 900, i * 900 + 900, i))
                    .await
                    .unwrap();
                BookingsRepo::delete(&store, b.id).await.unwrap();
            }
            survivor = BookingsRepo::create(&store, booking(Ulid::new(), user, 0, 900, 50)).await.unwrap();
            store.update(survivor.id, Span::new(0, 2700), 60).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 42);

            let before = std::fs::metadata(&path).unwrap().len();
            store.compact().await.unwrap();
            let after = std::fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
            assert_eq!(store.appends_since_compact().await, 0);
        }

        let store = InMemoryStore::open(&path).unwrap();
        assert_eq!(store.list_for_user(user).await.unwrap(), vec![Booking {
            span: Span::new(0, 2700),
            updated_at: 60,
            ..survivor
        }]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn volatile_store_compacts_to_noop() {
        let store = InMemoryStore::new();
        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
