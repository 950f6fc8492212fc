use std::collections::BTreeMap;

use crate::limits::*;
use crate::model::{Hall, HallInfo};

/// Catalog used when no `HALLBOOK_HALLS` is configured.
pub const DEFAULT_CATALOG: &str = "A:100,B:150,C:200,D:250,E:300,F:500";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    Empty,
    MalformedEntry(String),
    DuplicateHall(String),
    HallIdTooLong(String),
    ZeroCapacity(String),
    TooManyHalls,
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Empty => write!(f, "hall catalog is empty"),
            CatalogError::MalformedEntry(e) => {
                write!(f, "malformed catalog entry {e:?}, expected <id>:<capacity>")
            }
            CatalogError::DuplicateHall(id) => write!(f, "hall {id} listed twice"),
            CatalogError::HallIdTooLong(id) => write!(f, "hall id too long: {id}"),
            CatalogError::ZeroCapacity(id) => write!(f, "hall {id} has zero capacity"),
            CatalogError::TooManyHalls => write!(f, "too many halls (max {MAX_HALLS})"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Static catalog of bookable halls. Immutable once built.
#[derive(Debug, Clone)]
pub struct HallRegistry {
    halls: BTreeMap<String, u32>,
}

impl HallRegistry {
    pub fn new(halls: impl IntoIterator<Item = Hall>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for hall in halls {
            if hall.id.is_empty() {
                return Err(CatalogError::MalformedEntry(hall.id));
            }
            if hall.id.len() > MAX_HALL_ID_LEN {
                return Err(CatalogError::HallIdTooLong(hall.id));
            }
            if hall.capacity == 0 {
                return Err(CatalogError::ZeroCapacity(hall.id));
            }
            if map.contains_key(&hall.id) {
                return Err(CatalogError::DuplicateHall(hall.id));
            }
            map.insert(hall.id, hall.capacity);
            if map.len() > MAX_HALLS {
                return Err(CatalogError::TooManyHalls);
            }
        }
        if map.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { halls: map })
    }

    /// Parse `id:capacity,id:capacity,...`. Whitespace around entries is ignored.
    pub fn parse(catalog: &str) -> Result<Self, CatalogError> {
        let mut halls = Vec::new();
        for entry in catalog.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, capacity) = entry
                .split_once(':')
                .ok_or_else(|| CatalogError::MalformedEntry(entry.to_string()))?;
            let capacity: u32 = capacity
                .trim()
                .parse()
                .map_err(|_| CatalogError::MalformedEntry(entry.to_string()))?;
            halls.push(Hall {
                id: id.trim().to_string(),
                capacity,
            });
        }
        Self::new(halls)
    }

    pub fn capacity_of(&self, hall_id: &str) -> Option<u32> {
        self.halls.get(hall_id).copied()
    }

    pub fn contains(&self, hall_id: &str) -> bool {
        self.halls.contains_key(hall_id)
    }

    /// Hall ids in sorted order.
    pub fn all_resource_ids(&self) -> Vec<String> {
        self.halls.keys().cloned().collect()
    }

    pub fn halls(&self) -> Vec<HallInfo> {
        self.halls
            .iter()
            .map(|(id, &capacity)| HallInfo {
                hall_id: id.clone(),
                capacity,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.halls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.halls.is_empty()
    }
}

impl Default for HallRegistry {
    fn default() -> Self {
        Self::parse(DEFAULT_CATALOG).expect("default catalog is well-formed")
    }
}
