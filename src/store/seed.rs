use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::model::*;

use super::InMemoryStore;

/// Office layout loaded at start: floors, the entities on them, and the user directory.
#[derive(Debug, Default, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub floors: Vec<Floor>,
    #[serde(default)]
    pub entities: Vec<BookingEntity>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl Layout {
    pub fn from_json(json: &str) -> io::Result<Self> {
        serde_json::from_str(json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl InMemoryStore {
    /// Install a layout. Entities referencing an unknown floor are rejected.
    pub fn seed(&self, layout: Layout) -> io::Result<()> {
        for floor in layout.floors {
            self.insert_floor(floor);
        }
        for entity in layout.entities {
            if !self.has_floor(&entity.floor_id) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entity {} references unknown floor {}", entity.id, entity.floor_id),
                ));
            }
            self.insert_entity(entity);
        }
        for user in layout.users {
            self.insert_user(user);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"{
        "floors": [{ "id": "01HZX3F4G8ZQ0V5J1M2N3P4Q5R", "name": "Ground" }],
        "entities": [
            { "id": "01HZX3F4G8ZQ0V5J1M2N3P4Q5S", "type": "ROOM", "floor_id": "01HZX3F4G8ZQ0V5J1M2N3P4Q5R", "title": "Blue", "capacity": 8 },
            { "id": "01HZX3F4G8ZQ0V5J1M2N3P4Q5T", "type": "OPEN_SPACE", "floor_id": "01HZX3F4G8ZQ0V5J1M2N3P4Q5R", "capacity": 12, "x": 3.5, "y": 1.0 }
        ],
        "users": [{ "id": "01HZX3F4G8ZQ0V5J1M2N3P4Q5V", "name": "Ops", "email": "ops@spacebook.test", "role": "SUPER_ADMIN" }]
    }"#;

    #[test]
    fn parse_layout() {
        let layout = Layout::from_json(LAYOUT).unwrap();
        assert_eq!(layout.floors.len(), 1);
        assert_eq!(layout.entities.len(), 2);
        assert_eq!(layout.entities[1].kind, EntityKind::OpenSpace);
        assert_eq!(layout.users[0].role, Role::SuperAdmin);
    }

    #[test]
    fn seed_rejects_orphan_entity() {
        let mut layout = Layout::from_json(LAYOUT).unwrap();
        layout.floors.clear();
        let store = InMemoryStore::new();
        assert!(store.seed(layout).is_err());
    }

    #[test]
    fn bad_json_is_invalid_data() {
        let err = Layout::from_json("{ not json").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
