//! Remote record store contract and an in-process implementation.

use crate::model::{Category, PetRecord, PurchasedItem, RawPet, ShopItem, UserId};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The server does not offer the requested primitive.
    #[error("operation not supported by backend")]
    Unsupported,

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Backend-as-a-service tables the core talks to: one pet row per user,
/// the shop catalog and per-user ownership rows.
pub trait RemoteStore {
    /// `Ok(None)` when the user has no row yet. Fields come back unchecked.
    fn fetch_pet(&self, user: &UserId) -> Result<Option<RawPet>, RemoteError>;

    /// Upsert the user's row.
    fn upsert_pet(&self, user: &UserId, record: &PetRecord) -> Result<(), RemoteError>;

    fn active_items(&self) -> Result<Vec<ShopItem>, RemoteError>;

    /// Populate the catalog if it is empty. Idempotent.
    fn seed_items(&self) -> Result<(), RemoteError>;

    fn purchases(&self, user: &UserId) -> Result<Vec<PurchasedItem>, RemoteError>;

    fn insert_purchase(&self, user: &UserId, item: &PurchasedItem) -> Result<(), RemoteError>;

    fn set_equipped(&self, user: &UserId, item_id: &str, equipped: bool)
        -> Result<(), RemoteError>;

    /// Server-side transactional purchase: debit and ownership in one step.
    /// Returns the new balance and the ownership row, or
    /// [`RemoteError::Unsupported`] when the backend lacks the primitive.
    fn purchase_atomic(
        &self,
        user: &UserId,
        item: &ShopItem,
        at: DateTime<Utc>,
    ) -> Result<(u64, PurchasedItem), RemoteError>;
}

/// Catalog used to seed an empty backend.
pub fn default_catalog() -> Vec<ShopItem> {
    let item = |id: &str, name: &str, icon: &str, cost: u64, desc: &str, cat: Category| {
        ShopItem {
            id: id.to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            cost,
            description: desc.to_string(),
            category: cat,
        }
    };
    vec![
        item("bow", "Red Bow", "🎀", 15, "A cute bow for special occasions", Category::Accessories),
        item("hat", "Party Hat", "🎩", 25, "Every day is a party", Category::Accessories),
        item("glasses", "Cool Glasses", "🕶️", 30, "Looking sharp", Category::Accessories),
        item("crown", "Golden Crown", "👑", 100, "Fit for royalty", Category::Accessories),
        item("garden", "Garden", "🌷", 40, "A sunny garden backdrop", Category::Backgrounds),
        item("beach", "Beach", "🏖️", 60, "Sand, sea and sun", Category::Backgrounds),
        item("space", "Outer Space", "🌌", 120, "Among the stars", Category::Backgrounds),
    ]
}

/// Remote store held in memory, with switches to simulate outages.
/// Clones share state, so a test can keep a handle for inspection.
#[derive(Clone, Debug, Default)]
pub struct MemoryRemote {
    inner: Rc<RefCell<MemoryRemoteInner>>,
}

#[derive(Debug, Default)]
struct MemoryRemoteInner {
    /// Rows kept as JSON so tests can plant malformed ones.
    pets: HashMap<UserId, Value>,
    catalog: Vec<ShopItem>,
    owned: HashMap<UserId, Vec<PurchasedItem>>,
    fail_reads: bool,
    fail_writes: bool,
    fail_inserts: bool,
    atomic_purchase: bool,
    pet_writes: Vec<PetRecord>,
    seed_calls: usize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with the seeded catalog and the transactional purchase enabled.
    pub fn with_catalog() -> Self {
        let remote = Self::new();
        {
            let mut inner = remote.inner.borrow_mut();
            inner.catalog = default_catalog();
            inner.atomic_purchase = true;
        }
        remote
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.borrow_mut().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.inner.borrow_mut().fail_inserts = fail;
    }

    pub fn set_atomic_purchase(&self, enabled: bool) {
        self.inner.borrow_mut().atomic_purchase = enabled;
    }

    pub fn put_pet(&self, record: PetRecord) {
        let user = UserId::new(record.user_id.clone());
        self.put_row(&user, serde_json::to_value(record).unwrap_or_default());
    }

    /// Store a row verbatim, well-formed or not.
    pub fn put_row(&self, user: &UserId, row: Value) {
        self.inner.borrow_mut().pets.insert(user.clone(), row);
    }

    /// The user's row, if it holds a well-formed record.
    pub fn pet(&self, user: &UserId) -> Option<PetRecord> {
        let inner = self.inner.borrow();
        let row = inner.pets.get(user)?;
        serde_json::from_value(row.clone()).ok()
    }

    /// Every pet row successfully written, oldest first.
    pub fn pet_writes(&self) -> Vec<PetRecord> {
        self.inner.borrow().pet_writes.clone()
    }

    pub fn owned(&self, user: &UserId) -> Vec<PurchasedItem> {
        self.inner
            .borrow()
            .owned
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_calls(&self) -> usize {
        self.inner.borrow().seed_calls
    }
}

impl MemoryRemoteInner {
    fn check_read(&self) -> Result<(), RemoteError> {
        if self.fail_reads {
            return Err(RemoteError::Connection("simulated outage".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), RemoteError> {
        if self.fail_writes {
            return Err(RemoteError::Connection("simulated outage".into()));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    fn fetch_pet(&self, user: &UserId) -> Result<Option<RawPet>, RemoteError> {
        let inner = self.inner.borrow();
        inner.check_read()?;
        inner
            .pets
            .get(user)
            .map(|row| {
                serde_json::from_value(row.clone()).map_err(|e| RemoteError::Decode(e.to_string()))
            })
            .transpose()
    }

    fn upsert_pet(&self, user: &UserId, record: &PetRecord) -> Result<(), RemoteError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_write()?;
        let row = serde_json::to_value(record).map_err(|e| RemoteError::Decode(e.to_string()))?;
        inner.pets.insert(user.clone(), row);
        inner.pet_writes.push(record.clone());
        Ok(())
    }

    fn active_items(&self) -> Result<Vec<ShopItem>, RemoteError> {
        let inner = self.inner.borrow();
        inner.check_read()?;
        Ok(inner.catalog.clone())
    }

    fn seed_items(&self) -> Result<(), RemoteError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_write()?;
        inner.seed_calls += 1;
        if inner.catalog.is_empty() {
            inner.catalog = default_catalog();
        }
        Ok(())
    }

    fn purchases(&self, user: &UserId) -> Result<Vec<PurchasedItem>, RemoteError> {
        let inner = self.inner.borrow();
        inner.check_read()?;
        Ok(inner.owned.get(user).cloned().unwrap_or_default())
    }

    fn insert_purchase(&self, user: &UserId, item: &PurchasedItem) -> Result<(), RemoteError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_write()?;
        if inner.fail_inserts {
            return Err(RemoteError::Connection("simulated insert failure".into()));
        }
        let owned = inner.owned.entry(user.clone()).or_default();
        if owned.iter().any(|p| p.item_id == item.item_id) {
            return Err(RemoteError::Rejected {
                code: "23505".into(),
                message: "duplicate key".into(),
            });
        }
        owned.push(item.clone());
        Ok(())
    }

    fn set_equipped(
        &self,
        user: &UserId,
        item_id: &str,
        equipped: bool,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_write()?;
        let owned = inner.owned.entry(user.clone()).or_default();
        match owned.iter_mut().find(|p| p.item_id == item_id) {
            Some(p) => {
                p.is_equipped = equipped;
                Ok(())
            }
            None => Err(RemoteError::Rejected {
                code: "PGRST116".into(),
                message: "no rows".into(),
            }),
        }
    }

    fn purchase_atomic(
        &self,
        user: &UserId,
        item: &ShopItem,
        at: DateTime<Utc>,
    ) -> Result<(u64, PurchasedItem), RemoteError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.atomic_purchase {
            return Err(RemoteError::Unsupported);
        }
        inner.check_write()?;

        let balance = inner
            .pets
            .get(user)
            .and_then(|r| r.get("coins"))
            .and_then(Value::as_f64)
            .map_or(0, |c| c.floor() as i64);
        let cost = i64::try_from(item.cost).unwrap_or(i64::MAX);
        if balance < cost {
            return Err(RemoteError::Rejected {
                code: "P0001".into(),
                message: "insufficient coins".into(),
            });
        }
        if inner
            .owned
            .get(user)
            .is_some_and(|o| o.iter().any(|p| p.item_id == item.id))
        {
            return Err(RemoteError::Rejected {
                code: "23505".into(),
                message: "duplicate key".into(),
            });
        }

        let remaining = balance - cost;
        if let Some(row) = inner.pets.get_mut(user).and_then(Value::as_object_mut) {
            row.insert("coins".into(), json!(remaining));
            row.insert("last_update_time".into(), json!(at));
        }
        let purchased = PurchasedItem {
            item_id: item.id.clone(),
            purchased_at: at,
            is_equipped: false,
        };
        inner.owned.entry(user.clone()).or_default().push(purchased.clone());
        Ok((u64::try_from(remaining).unwrap_or(0), purchased))
    }
}
