use crate::error::PetError;
use crate::model::{millis_to_utc, PetState, PurchasedItem, ShopItem, UserId};
use crate::persist::{PersistTimer, Reconciler};
use crate::remote::{RemoteError, RemoteStore};
use crate::scheduler::Scheduler;
use crate::storage::{read_json, write_json, LocalStore};
use log::{error, info, warn};

/// Catalog view, ownership cache and purchase bookkeeping for one identity.
#[derive(Debug, Default)]
pub struct ShopLedger {
    catalog: Vec<ShopItem>,
    owned: Vec<PurchasedItem>,
    in_flight: bool,
}

impl ShopLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &[ShopItem] {
        &self.catalog
    }

    pub fn owned(&self) -> &[PurchasedItem] {
        &self.owned
    }

    pub fn item(&self, item_id: &str) -> Option<&ShopItem> {
        self.catalog.iter().find(|i| i.id == item_id)
    }

    pub fn is_owned(&self, item_id: &str) -> bool {
        self.owned.iter().any(|p| p.item_id == item_id)
    }

    pub fn is_purchasing(&self) -> bool {
        self.in_flight
    }

    /// Load the active catalog (seeding it once if empty) and the user's
    /// ownership rows, falling back to the local ownership cache.
    pub fn load(
        &mut self,
        user: Option<&UserId>,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
    ) -> Result<(), PetError> {
        self.owned.clear();
        let mut outcome = self.load_catalog(remote);

        let Some(user) = user else {
            return outcome;
        };
        match remote.purchases(user) {
            Ok(rows) => {
                self.owned = rows;
                if let Err(e) = write_json(local, &user.purchases_key(), &self.owned) {
                    warn!("ownership cache write failed: {e}");
                }
            }
            Err(e) => {
                warn!("ownership read failed, using local cache: {e}");
                self.owned = read_json(local, &user.purchases_key())
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                if outcome.is_ok() {
                    outcome = Err(PetError::from_remote_read(e));
                }
            }
        }
        outcome
    }

    fn load_catalog(&mut self, remote: &dyn RemoteStore) -> Result<(), PetError> {
        let mut items = remote.active_items().map_err(PetError::from_remote_read)?;
        if items.is_empty() {
            info!("shop catalog empty, seeding");
            remote.seed_items().map_err(PetError::from_remote_write)?;
            items = remote.active_items().map_err(PetError::from_remote_read)?;
        }
        self.catalog = items;
        Ok(())
    }

    /// Every purchase precondition, in the order they are reported.
    pub fn check(
        &self,
        user: Option<&UserId>,
        item_id: &str,
        coins: u64,
    ) -> Result<&ShopItem, PetError> {
        if user.is_none() {
            return Err(PetError::AuthRequired);
        }
        if self.in_flight {
            return Err(PetError::PurchaseInProgress);
        }
        let item = self
            .item(item_id)
            .ok_or_else(|| PetError::ItemNotFound(item_id.to_string()))?;
        if self.is_owned(item_id) {
            return Err(PetError::AlreadyOwned(item_id.to_string()));
        }
        if coins < item.cost {
            return Err(PetError::InsufficientFunds {
                needed: item.cost,
                available: coins,
            });
        }
        Ok(item)
    }

    /// Buy `item_id`, debiting `state` and recording ownership.
    ///
    /// Uses the backend's transactional primitive when offered, otherwise
    /// debits then inserts. Only one purchase runs at a time.
    #[allow(clippy::too_many_arguments)]
    pub fn purchase<E: From<PersistTimer> + Clone>(
        &mut self,
        user: Option<&UserId>,
        item_id: &str,
        state: &mut PetState,
        now_ms: i64,
        reconciler: &mut Reconciler,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
    ) -> Result<PurchasedItem, PetError> {
        let item = self.check(user, item_id, state.coins)?.clone();
        let Some(user) = user else {
            return Err(PetError::AuthRequired);
        };

        self.in_flight = true;
        let result = self.settle(user, &item, state, now_ms, reconciler, sched, remote, local);
        self.in_flight = false;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn settle<E: From<PersistTimer> + Clone>(
        &mut self,
        user: &UserId,
        item: &ShopItem,
        state: &mut PetState,
        now_ms: i64,
        reconciler: &mut Reconciler,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
    ) -> Result<PurchasedItem, PetError> {
        let mut next = *state;
        next.coins -= item.cost;
        next.touch(now_ms);
        let at = millis_to_utc(now_ms);

        match remote.purchase_atomic(user, item, at) {
            Ok((balance, purchased)) => {
                if balance != next.coins {
                    warn!(
                        "server balance {balance} differs from local {} after buying {}",
                        next.coins, item.id
                    );
                }
                info!("{user} bought {} for {}", item.id, item.cost);
                reconciler.note_remote_debit(balance);
                *state = next;
                self.grant(user, purchased.clone(), local);
                if let Some(previous) = reconciler.commit(&next, sched, remote, local) {
                    *state = previous;
                    reconciler.mirror(state, local);
                }
                Ok(purchased)
            }
            Err(RemoteError::Unsupported) => {
                info!("transactional purchase unavailable, debiting then inserting");
                reconciler.write_through(&next, sched, remote, local)?;
                *state = next;

                let purchased = PurchasedItem {
                    item_id: item.id.clone(),
                    purchased_at: at,
                    is_equipped: false,
                };
                if let Err(e) = remote.insert_purchase(user, &purchased) {
                    error!(
                        "{user}: {} coins debited for {} but ownership insert failed: {e}",
                        item.cost, item.id
                    );
                    return Err(PetError::PartialPurchase {
                        item_id: item.id.clone(),
                        cost: item.cost,
                        reason: e.to_string(),
                    });
                }
                info!("{user} bought {} for {} (two-step)", item.id, item.cost);
                self.grant(user, purchased.clone(), local);
                Ok(purchased)
            }
            Err(RemoteError::Rejected { code, message }) if code == "P0001" => {
                warn!("server refused {} for lack of coins: {message}", item.id);
                Err(PetError::InsufficientFunds {
                    needed: item.cost,
                    available: state.coins,
                })
            }
            Err(RemoteError::Rejected { code, .. }) if code == "23505" => {
                warn!("server already records {} for {user}", item.id);
                Err(PetError::AlreadyOwned(item.id.clone()))
            }
            Err(e) => Err(PetError::from_remote_write(e)),
        }
    }

    fn grant(&mut self, user: &UserId, purchased: PurchasedItem, local: &dyn LocalStore) {
        self.owned.push(purchased);
        if let Err(e) = write_json(local, &user.purchases_key(), &self.owned) {
            warn!("ownership cache write failed: {e}");
        }
    }

    /// Equip or unequip an owned item. Equipping unequips other owned items
    /// of the same category.
    pub fn set_equipped(
        &mut self,
        user: Option<&UserId>,
        item_id: &str,
        equipped: bool,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
    ) -> Result<(), PetError> {
        let user = user.ok_or(PetError::AuthRequired)?;
        if !self.is_owned(item_id) {
            return Err(PetError::ItemNotFound(item_id.to_string()));
        }

        if equipped {
            let category = self.item(item_id).map(|i| i.category.clone());
            let others: Vec<String> = self
                .owned
                .iter()
                .filter(|p| p.is_equipped && p.item_id != item_id)
                .filter(|p| self.item(&p.item_id).map(|i| i.category.clone()) == category)
                .map(|p| p.item_id.clone())
                .collect();
            for other in others {
                remote
                    .set_equipped(user, &other, false)
                    .map_err(PetError::from_remote_write)?;
                self.mark(&other, false);
            }
        }

        remote
            .set_equipped(user, item_id, equipped)
            .map_err(PetError::from_remote_write)?;
        self.mark(item_id, equipped);
        write_json(local, &user.purchases_key(), &self.owned)?;
        Ok(())
    }

    fn mark(&mut self, item_id: &str, equipped: bool) {
        if let Some(p) = self.owned.iter_mut().find(|p| p.item_id == item_id) {
            p.is_equipped = equipped;
        }
    }
}
