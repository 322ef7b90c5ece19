use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

pub const STAT_MIN: f64 = 0.0;
pub const STAT_MAX: f64 = 100.0;

/// Local-storage key of the pet mirror.
pub const PET_STATE_KEY: &str = "petState";

/// Batcher key under which all non-coin pet writes coalesce.
pub const PET_BATCH_KEY: &str = "pet-state";

/// The single aggregate owned by a running session.
///
/// The four percentage stats always stay inside `[0, 100]`; `coins` is
/// unsigned so it cannot go below zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetState {
    pub happiness: f64,
    pub hunger: f64,
    pub cleanliness: f64,
    pub energy: f64,
    pub coins: u64,
    /// Epoch millis of the last decay or mutation.
    pub last_update_time: i64,
}

impl PetState {
    pub fn new_default(now_ms: i64) -> Self {
        Self {
            happiness: 75.0,
            hunger: 25.0,
            cleanliness: 85.0,
            energy: 80.0,
            coins: 10,
            last_update_time: now_ms,
        }
    }

    /// Advance `last_update_time`; never moves it backwards.
    pub(crate) fn touch(&mut self, now_ms: i64) {
        self.last_update_time = self.last_update_time.max(now_ms);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Feed,
    Clean,
    Sleep,
    Play,
}

/// Additive change to the four percentage stats.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatDeltas {
    pub happiness: f64,
    pub hunger: f64,
    pub cleanliness: f64,
    pub energy: f64,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Feed,
        ActionKind::Clean,
        ActionKind::Sleep,
        ActionKind::Play,
    ];

    pub fn deltas(self) -> StatDeltas {
        match self {
            ActionKind::Feed => StatDeltas {
                hunger: -30.0,
                happiness: 10.0,
                ..StatDeltas::default()
            },
            ActionKind::Clean => StatDeltas {
                cleanliness: 40.0,
                happiness: 15.0,
                ..StatDeltas::default()
            },
            ActionKind::Sleep => StatDeltas {
                energy: 50.0,
                happiness: 5.0,
                ..StatDeltas::default()
            },
            ActionKind::Play => StatDeltas {
                happiness: 25.0,
                energy: -15.0,
                ..StatDeltas::default()
            },
        }
    }

    /// Energy required before the action may run at all.
    pub fn min_energy(self) -> Option<f64> {
        match self {
            ActionKind::Play => Some(20.0),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Feed => "feed",
            ActionKind::Clean => "clean",
            ActionKind::Sleep => "sleep",
            ActionKind::Play => "play",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local-storage key of this user's ownership cache.
    pub fn purchases_key(&self) -> String {
        format!("purchased_items_{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Accessories,
    Backgrounds,
    Other(String),
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        match value.as_str() {
            "accessories" => Category::Accessories,
            "backgrounds" => Category::Backgrounds,
            _ => Category::Other(value),
        }
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        match value {
            Category::Accessories => "accessories".to_string(),
            Category::Backgrounds => "backgrounds".to_string(),
            Category::Other(tag) => tag,
        }
    }
}

/// Catalog entry. Read-only to the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    #[serde(rename = "item_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "emoji")]
    pub icon: String,
    pub cost: u64,
    #[serde(default)]
    pub description: String,
    pub category: Category,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchasedItem {
    pub item_id: String,
    pub purchased_at: DateTime<Utc>,
    #[serde(default)]
    pub is_equipped: bool,
}

/// Shape of the remote `pet_data` row as written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PetRecord {
    pub user_id: String,
    pub happiness: f64,
    pub hunger: f64,
    pub cleanliness: f64,
    pub energy: f64,
    pub coins: i64,
    pub last_update_time: DateTime<Utc>,
}

impl PetRecord {
    pub fn from_state(user: &UserId, state: &PetState) -> Self {
        Self {
            user_id: user.0.clone(),
            happiness: state.happiness,
            hunger: state.hunger,
            cleanliness: state.cleanliness,
            energy: state.energy,
            coins: i64::try_from(state.coins).unwrap_or(i64::MAX),
            last_update_time: millis_to_utc(state.last_update_time),
        }
    }
}

/// A stored pet as read back, from either the local mirror (camelCase,
/// epoch millis) or a remote row (snake_case, RFC 3339 time).
///
/// Every field is optional. A value of the wrong type reads as missing
/// rather than failing the whole record; `stats::sanitize` then repairs it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RawPet {
    #[serde(default, deserialize_with = "loose_number")]
    pub happiness: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub hunger: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub cleanliness: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub energy: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub coins: Option<f64>,
    /// Epoch millis.
    #[serde(default, alias = "lastUpdateTime", deserialize_with = "loose_time")]
    pub last_update_time: Option<i64>,
}

impl From<&PetState> for RawPet {
    fn from(state: &PetState) -> Self {
        Self {
            happiness: Some(state.happiness),
            hunger: Some(state.hunger),
            cleanliness: Some(state.cleanliness),
            energy: Some(state.energy),
            coins: Some(state.coins as f64),
            last_update_time: Some(state.last_update_time),
        }
    }
}

fn loose_number<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(de)?;
    Ok(value.as_ref().and_then(Value::as_f64))
}

fn loose_time<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(de)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.timestamp_millis()),
        _ => None,
    })
}

pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_pet_reads_the_local_mirror_shape() {
        let raw: RawPet = serde_json::from_str(
            r#"{"happiness":40,"hunger":60,"cleanliness":70,"energy":55,"coins":-3,"lastUpdateTime":1000}"#,
        )
        .unwrap();
        assert_eq!(raw.coins, Some(-3.0));
        assert_eq!(raw.hunger, Some(60.0));
        assert_eq!(raw.last_update_time, Some(1000));
    }

    #[test]
    fn raw_pet_treats_wrong_types_as_missing() {
        let raw: RawPet = serde_json::from_str(
            r#"{"user_id":"u1","happiness":null,"hunger":"full","coins":12.5,
                "last_update_time":"2024-05-01T10:00:00+00:00"}"#,
        )
        .unwrap();
        assert_eq!(raw.happiness, None);
        assert_eq!(raw.hunger, None);
        assert_eq!(raw.cleanliness, None);
        assert_eq!(raw.coins, Some(12.5));
        assert_eq!(raw.last_update_time, Some(1_714_557_600_000));
    }
}
