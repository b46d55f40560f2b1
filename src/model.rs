use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix seconds, UTC. The only time type.
pub type Ts = i64;

/// Time range of a booking or query window. Both bounds are meaningful:
/// occupancy walks from `start` up to and including `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ts,
    pub end: Ts,
}

impl Span {
    /// `start == end` is a single-instant window; bookings additionally
    /// require `start < end`.
    pub fn new(start: Ts, end: Ts) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Saturates at `Ts::MAX` for spans wider than the type can count.
    pub fn duration_secs(&self) -> Ts {
        self.end.saturating_sub(self.start)
    }

    /// `start <= t <= end`.
    pub fn contains_instant(&self, t: Ts) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// Exclusive: any booking occupies it, whatever the stored capacity.
    Room,
    /// Up to `capacity` simultaneous bookings.
    OpenSpace,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Room => "ROOM",
            EntityKind::OpenSpace => "OPEN_SPACE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingEntity {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub floor_id: Ulid,
    #[serde(default)]
    pub title: String,
    pub capacity: u32,
    // Layout geometry, opaque to booking logic.
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub created_at: Ts,
    #[serde(default)]
    pub updated_at: Ts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    pub id: Ulid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Ts,
    #[serde(default)]
    pub updated_at: Ts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
    Support,
}

impl Role {
    /// Roles allowed to act on bookings they do not own.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Support => "SUPPORT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
}

/// The acting caller, as resolved by the client surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub user_id: Ulid,
    pub role: Role,
}

impl Token {
    /// Owner of the booking, or an elevated role.
    pub fn may_access(&self, owner: Ulid) -> bool {
        self.user_id == owner || self.role.is_elevated()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub entity_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub created_at: Ts,
    pub updated_at: Ts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub thing: String,
    pub completed: bool,
    pub created_at: Ts,
    pub updated_at: Ts,
}

/// A booking enriched for display.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingInfo {
    pub booking: Booking,
    pub entity: Option<BookingEntity>,
    pub user: Option<User>,
    pub orders: Vec<Order>,
}

/// One bucket of an entity's workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadItem {
    /// Bucket start.
    pub time: Ts,
    pub is_free: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloorWorkloadItem {
    pub entity: BookingEntity,
    pub is_free: bool,
}

/// Journalled state changes. Layout (floors, entities, users) is seeded, not journalled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        id: Ulid,
        entity_id: Ulid,
        user_id: Ulid,
        span: Span,
        created_at: Ts,
    },
    BookingUpdated {
        id: Ulid,
        span: Span,
        updated_at: Ts,
    },
    /// Also drops the booking's orders.
    BookingDeleted {
        id: Ulid,
    },
    OrderCreated {
        id: Ulid,
        booking_id: Ulid,
        thing: String,
        created_at: Ts,
    },
    OrderDeleted {
        id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_roles() {
        assert!(Role::Admin.is_elevated());
        assert!(Role::SuperAdmin.is_elevated());
        assert!(!Role::User.is_elevated());
        assert!(!Role::Support.is_elevated());
    }

    #[test]
    fn token_access() {
        let owner = Ulid::new();
        let user = Token { user_id: Ulid::new(), role: Role::User };
        let admin = Token { user_id: Ulid::new(), role: Role::Admin };
        assert!(!user.may_access(owner));
        assert!(admin.may_access(owner));
        assert!(Token { user_id: owner, role: Role::Support }.may_access(owner));
    }

    #[test]
    fn span_contains_both_bounds() {
        let s = Span::new(0, 900);
        assert!(s.contains_instant(0));
        assert!(s.contains_instant(900));
        assert!(!s.contains_instant(901));
    }

    #[test]
    fn entity_kind_json_names() {
        let json = r#"{"id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","type":"OPEN_SPACE","floor_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","capacity":4}"#;
        let entity: BookingEntity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.kind, EntityKind::OpenSpace);
        assert_eq!(entity.kind.as_str(), "OPEN_SPACE");
        assert_eq!(entity.title, "");
    }
}
