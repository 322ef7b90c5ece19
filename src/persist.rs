//! Local/remote reconciliation of the pet state.
//!
//! Every change is mirrored to local storage right away. Coin changes go to
//! the remote store immediately; everything else is debounced, then
//! coalesced in a [`Batcher`] and flushed on cap or window expiry.
//! Failures land in a single error slot and never cross this boundary as
//! panics or early returns.

use crate::batch::{AddResult, Batcher, PendingUpdate};
use crate::config::Timings;
use crate::error::PetError;
use crate::model::{PetRecord, PetState, RawPet, UserId, PET_BATCH_KEY, PET_STATE_KEY};
use crate::remote::RemoteStore;
use crate::scheduler::{Scheduler, TimerId};
use crate::stats::{log_corrections, sanitize};
use crate::storage::{read_json, write_json, LocalStore, StorageError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
}

/// What to do with the in-memory state when a remote write fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the optimistic state and retry the write on the next flush.
    #[default]
    KeepOptimistic,
    /// Revert to the last state the remote acknowledged. Until the remote
    /// has acknowledged anything (e.g. loaded from the local cache during an
    /// outage) there is nothing to revert to, and the write is requeued as
    /// under `KeepOptimistic`.
    Rollback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    /// Signed-in user without a remote row yet.
    NewRemote,
    Local,
    Defaults,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistTimer {
    Debounce,
    BatchWindow,
}

pub struct Reconciler {
    user: Option<UserId>,
    policy: FailurePolicy,
    debounce_ms: i64,
    phase: Phase,
    /// Coin balance last handed to the immediate tier.
    persisted_coins: Option<u64>,
    /// Last state the remote acknowledged.
    confirmed: Option<PetState>,
    debounced: Option<PetState>,
    debounce_timer: Option<TimerId>,
    batch: Batcher<PetState>,
    batch_timer: Option<TimerId>,
    last_error: Option<PetError>,
}

impl Reconciler {
    pub fn new(user: Option<UserId>, timings: &Timings, policy: FailurePolicy) -> Self {
        Self {
            user,
            policy,
            debounce_ms: timings.debounce_ms as i64,
            phase: Phase::Loading,
            persisted_coins: None,
            confirmed: None,
            debounced: None,
            debounce_timer: None,
            batch: Batcher::new(timings.batch_max, timings.batch_window_ms as i64),
            batch_timer: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn last_error(&self) -> Option<&PetError> {
        self.last_error.as_ref()
    }

    /// Overwrite the slot with the outcome of an operation handled elsewhere.
    pub fn record(&mut self, outcome: Result<(), PetError>) {
        self.last_error = outcome.err();
    }

    pub fn confirmed(&self) -> Option<&PetState> {
        self.confirmed.as_ref()
    }

    /// Updates waiting for a remote write (debounced or batched).
    pub fn pending_writes(&self) -> usize {
        self.batch.len() + usize::from(self.debounced.is_some())
    }

    /// Remote first when signed in, then the local cache, then defaults.
    pub fn load(
        &mut self,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
        now_ms: i64,
    ) -> (PetState, LoadSource) {
        self.phase = Phase::Loading;
        self.last_error = None;

        let loaded = match self.user.clone() {
            Some(user) => match remote.fetch_pet(&user) {
                Ok(Some(raw)) => {
                    let (state, corrections) = sanitize(&raw, now_ms);
                    log_corrections("remote pet_data", &corrections);
                    self.confirmed = Some(state);
                    self.persisted_coins = Some(state.coins);
                    Some((state, LoadSource::Remote))
                }
                Ok(None) => {
                    let state = PetState::new_default(now_ms);
                    info!("no remote row for {user}, creating one");
                    match self.push_remote(remote, &state) {
                        Ok(()) => {
                            self.confirmed = Some(state);
                            self.persisted_coins = Some(state.coins);
                        }
                        Err(e) => {
                            warn!("creating remote row failed: {e}");
                            self.last_error = Some(e);
                        }
                    }
                    Some((state, LoadSource::NewRemote))
                }
                Err(e) => {
                    let err = PetError::from_remote_read(e);
                    warn!("remote load failed, falling back to local cache: {err}");
                    self.last_error = Some(err);
                    None
                }
            },
            None => None,
        };

        let (state, source) = loaded.unwrap_or_else(|| self.load_local(local, now_ms));
        if let Err(e) = write_json(local, PET_STATE_KEY, &state) {
            warn!("local mirror after load failed: {e}");
            self.note(e.into());
        }
        info!("pet state loaded from {source:?}");
        self.phase = Phase::Ready;
        (state, source)
    }

    fn load_local(&mut self, local: &dyn LocalStore, now_ms: i64) -> (PetState, LoadSource) {
        match read_json::<RawPet>(local, PET_STATE_KEY) {
            Ok(Some(raw)) => {
                let (state, corrections) = sanitize(&raw, now_ms);
                log_corrections("local petState", &corrections);
                (state, LoadSource::Local)
            }
            Ok(None) => (PetState::new_default(now_ms), LoadSource::Defaults),
            Err(StorageError::Json { key, source }) => {
                warn!("discarding unreadable {key}: {source}");
                self.note(PetError::Validation(format!("{key}: {source}")));
                (PetState::new_default(now_ms), LoadSource::Defaults)
            }
            Err(e) => {
                self.note(e.into());
                (PetState::new_default(now_ms), LoadSource::Defaults)
            }
        }
    }

    /// Persist a freshly committed state.
    ///
    /// Returns the state to roll back to when the write failed under
    /// [`FailurePolicy::Rollback`].
    pub fn commit<E: From<PersistTimer> + Clone>(
        &mut self,
        state: &PetState,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
    ) -> Option<PetState> {
        if self.phase != Phase::Ready {
            debug!("commit ignored while loading");
            return None;
        }

        let mirrored = write_json(local, PET_STATE_KEY, state).map_err(PetError::from);
        if self.user.is_none() {
            self.record(mirrored);
            return None;
        }
        if let Err(e) = mirrored {
            warn!("local mirror failed: {e}");
            self.last_error = Some(e);
        }

        if self.persisted_coins != Some(state.coins) {
            debug!(
                "coins {:?} -> {}, writing through",
                self.persisted_coins, state.coins
            );
            self.supersede_pending(sched);
            self.persisted_coins = Some(state.coins);
            return match self.push_remote(remote, state) {
                Ok(()) => {
                    self.acknowledge(state);
                    None
                }
                Err(e) => self.on_write_failure(e, vec![(*state, sched.now())]),
            };
        }

        self.debounced = Some(*state);
        if let Some(id) = self.debounce_timer.take() {
            sched.cancel(id);
        }
        self.debounce_timer = Some(sched.schedule_after(self.debounce_ms, PersistTimer::Debounce.into()));
        None
    }

    pub fn on_timer<E: From<PersistTimer> + Clone>(
        &mut self,
        timer: PersistTimer,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
    ) -> Option<PetState> {
        match timer {
            PersistTimer::Debounce => {
                self.debounce_timer = None;
                let state = self.debounced.take()?;
                // Every write shares one key, so the cap is only reached
                // when it is configured below two.
                match self.batch.add(PET_BATCH_KEY, state, sched.now()) {
                    AddResult::Full => self.flush(sched, remote),
                    AddResult::Waiting => {
                        self.arm_batch_window(sched);
                        None
                    }
                }
            }
            PersistTimer::BatchWindow => {
                self.batch_timer = None;
                self.flush(sched, remote)
            }
        }
    }

    /// Write the newest batched update. Failed batches go back to the front.
    pub fn flush<E: From<PersistTimer> + Clone>(
        &mut self,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
    ) -> Option<PetState> {
        if let Some(id) = self.batch_timer.take() {
            sched.cancel(id);
        }
        let updates = self.batch.take();
        let latest = updates.iter().max_by_key(|u| u.timestamp)?.data;
        debug!("flushing {} coalesced update(s)", updates.len());

        match self.push_remote(remote, &latest) {
            Ok(()) => {
                self.acknowledge(&latest);
                None
            }
            Err(e) => {
                let failed = updates.into_iter().map(|u| (u.data, u.timestamp)).collect();
                self.on_write_failure(e, failed)
            }
        }
    }

    /// Push anything still debounced or batched, ignoring timers. Used on
    /// teardown and before switching identity.
    pub fn flush_pending<E: From<PersistTimer> + Clone>(
        &mut self,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
    ) {
        if let Some(id) = self.debounce_timer.take() {
            sched.cancel(id);
        }
        if let Some(state) = self.debounced.take() {
            self.batch.add(PET_BATCH_KEY, state, sched.now());
        }
        if self.user.is_some() && !self.batch.is_empty() {
            let _ = self.flush(sched, remote);
        }
    }

    /// Write `state` to the remote now, without retry or rollback. Pending
    /// writes are superseded on success.
    pub fn write_through<E: From<PersistTimer> + Clone>(
        &mut self,
        state: &PetState,
        sched: &mut Scheduler<E>,
        remote: &dyn RemoteStore,
        local: &dyn LocalStore,
    ) -> Result<(), PetError> {
        self.push_remote(remote, state)?;
        self.supersede_pending(sched);
        self.persisted_coins = Some(state.coins);
        self.acknowledge(state);
        if let Err(e) = write_json(local, PET_STATE_KEY, state) {
            warn!("local mirror failed: {e}");
            self.last_error = Some(e.into());
        }
        Ok(())
    }

    pub fn teardown<E: Clone>(&mut self, sched: &mut Scheduler<E>) {
        for id in [self.debounce_timer.take(), self.batch_timer.take()]
            .into_iter()
            .flatten()
        {
            sched.cancel(id);
        }
    }

    /// The server moved the balance itself (transactional purchase); a
    /// later rollback must not resurrect the spent coins.
    pub fn note_remote_debit(&mut self, coins: u64) {
        if let Some(confirmed) = self.confirmed.as_mut() {
            confirmed.coins = coins;
        }
    }

    /// Mirror a state that bypassed [`Reconciler::commit`] (a rollback).
    pub fn mirror(&mut self, state: &PetState, local: &dyn LocalStore) {
        if let Err(e) = write_json(local, PET_STATE_KEY, state) {
            warn!("local mirror failed: {e}");
            self.note(e.into());
        }
    }

    /// Keep the first error of a multi-step operation.
    pub(crate) fn note(&mut self, err: PetError) {
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
    }

    fn push_remote(&self, remote: &dyn RemoteStore, state: &PetState) -> Result<(), PetError> {
        let Some(user) = &self.user else {
            return Ok(());
        };
        remote
            .upsert_pet(user, &PetRecord::from_state(user, state))
            .map_err(PetError::from_remote_write)
    }

    fn acknowledge(&mut self, state: &PetState) {
        self.confirmed = Some(*state);
        self.last_error = None;
    }

    fn supersede_pending<E: Clone>(&mut self, sched: &mut Scheduler<E>) {
        self.debounced = None;
        if let Some(id) = self.debounce_timer.take() {
            sched.cancel(id);
        }
        self.batch.remove(PET_BATCH_KEY);
        if self.batch.is_empty() {
            if let Some(id) = self.batch_timer.take() {
                sched.cancel(id);
            }
        }
    }

    fn arm_batch_window<E: From<PersistTimer> + Clone>(&mut self, sched: &mut Scheduler<E>) {
        if let Some(id) = self.batch_timer.take() {
            sched.cancel(id);
        }
        let window = self.batch.window_ms();
        self.batch_timer = Some(sched.schedule_after(window, PersistTimer::BatchWindow.into()));
    }

    fn on_write_failure(
        &mut self,
        err: PetError,
        failed: Vec<(PetState, i64)>,
    ) -> Option<PetState> {
        warn!("remote write failed ({}): {err}", err.code());
        self.last_error = Some(err);
        match (self.policy, self.confirmed) {
            (FailurePolicy::Rollback, Some(target)) => {
                self.persisted_coins = Some(target.coins);
                Some(target)
            }
            (FailurePolicy::Rollback, None) | (FailurePolicy::KeepOptimistic, _) => {
                let requeue = failed
                    .into_iter()
                    .map(|(data, timestamp)| PendingUpdate {
                        id: PET_BATCH_KEY.to_string(),
                        data,
                        timestamp,
                    })
                    .collect();
                self.batch.requeue_front(requeue);
                None
            }
        }
    }
}
