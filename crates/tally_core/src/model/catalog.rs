//! Secondary record kinds: user profile, product catalog, urge logs.
//!
//! These are owned by the host and only touched by sync code during salvage
//! and legacy migration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// At most one profile row exists per store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    /// Self-reported baseline per day before tracking started.
    pub baseline_per_day: Option<u32>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub units_per_pack: u32,
    /// Price in minor currency units.
    pub price_minor: i64,
}

/// A craving that was recorded without necessarily logging an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrgeLog {
    pub id: Uuid,
    pub timestamp_ms: i64,
    /// 1..=5
    pub intensity: u8,
    pub resisted: bool,
    pub note: String,
}
