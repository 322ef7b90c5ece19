//! A running pet session.
//!
//! [`Session`] owns the pet state and every collaborator that touches it.
//! Decay ticks, display timers and persistence timers all go through one
//! [`Scheduler`]; [`Session::pump`] dispatches whatever is due, one event at a
//! time, so a tick can never interleave with an action.

use crate::config::{Settings, Timings};
use crate::error::PetError;
use crate::model::{ActionKind, PetState, PurchasedItem, UserId};
use crate::persist::{FailurePolicy, LoadSource, PersistTimer, Phase, Reconciler};
use crate::remote::RemoteStore;
use crate::scheduler::{Scheduler, TimerId};
use crate::shop::ShopLedger;
use crate::sim::{apply_action, apply_decay, ActionOutcome, DecayRates};
use crate::stats::{stamp, RandomSource};
use crate::storage::LocalStore;
use chrono::Utc;
use log::{debug, info};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    DecayTick,
    InteractionEnd,
    EarningEnd,
    Persist(PersistTimer),
}

impl From<PersistTimer> for SessionEvent {
    fn from(timer: PersistTimer) -> Self {
        SessionEvent::Persist(timer)
    }
}

pub trait Clock {
    /// Epoch milliseconds.
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<i64>>);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self(Rc::new(Cell::new(start_ms)))
    }

    pub fn set(&self, ms: i64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: i64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.get()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub timings: Timings,
    pub policy: FailurePolicy,
    pub rates: DecayRates,
}

impl From<&Settings> for SessionOptions {
    fn from(s: &Settings) -> Self {
        Self {
            timings: s.timings.clone(),
            policy: s.failure_policy,
            rates: DecayRates::default(),
        }
    }
}

/// Injected collaborators.
pub struct Backends {
    pub remote: Box<dyn RemoteStore>,
    pub local: Box<dyn LocalStore>,
    pub clock: Box<dyn Clock>,
    pub rng: Box<dyn RandomSource>,
}

pub struct Session {
    user: Option<UserId>,
    state: PetState,
    source: LoadSource,
    sched: Scheduler<SessionEvent>,
    reconciler: Reconciler,
    shop: ShopLedger,
    remote: Box<dyn RemoteStore>,
    local: Box<dyn LocalStore>,
    clock: Box<dyn Clock>,
    rng: Box<dyn RandomSource>,
    rates: DecayRates,
    timings: Timings,
    decay_timer: TimerId,
    interaction: Option<(ActionKind, TimerId)>,
    earning: Option<(u64, TimerId)>,
}

impl Session {
    /// Load the pet for `user` (or the guest cache), load the shop and start
    /// the decay timer.
    pub fn start(user: Option<UserId>, options: SessionOptions, backends: Backends) -> Self {
        let Backends {
            remote,
            local,
            clock,
            rng,
        } = backends;
        let now = clock.now_ms();
        let mut sched = Scheduler::new(now);
        let decay_timer = sched.schedule_every(
            options.timings.decay_period_ms as i64,
            SessionEvent::DecayTick,
        );

        let mut reconciler = Reconciler::new(user.clone(), &options.timings, options.policy);
        let (state, source) = reconciler.load(remote.as_ref(), local.as_ref(), now);
        let mut shop = ShopLedger::new();
        if let Err(e) = shop.load(user.as_ref(), remote.as_ref(), local.as_ref()) {
            reconciler.note(e);
        }

        match &user {
            Some(u) => info!("session for {u} started at {}", stamp(now)),
            None => info!("guest session started at {}", stamp(now)),
        }

        Self {
            user,
            state,
            source,
            sched,
            reconciler,
            shop,
            remote,
            local,
            clock,
            rng,
            rates: options.rates,
            timings: options.timings,
            decay_timer,
            interaction: None,
            earning: None,
        }
    }

    pub fn state(&self) -> &PetState {
        &self.state
    }

    pub fn source(&self) -> LoadSource {
        self.source
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.reconciler.phase()
    }

    /// Latest error; cleared by the next successful write.
    pub fn error(&self) -> Option<&PetError> {
        self.reconciler.last_error()
    }

    pub fn shop(&self) -> &ShopLedger {
        &self.shop
    }

    pub fn policy(&self) -> FailurePolicy {
        self.reconciler.policy()
    }

    /// Action currently on display, if any.
    pub fn interaction(&self) -> Option<ActionKind> {
        self.interaction.map(|(kind, _)| kind)
    }

    /// Coins just earned, while still on display.
    pub fn recent_earning(&self) -> Option<u64> {
        self.earning.map(|(coins, _)| coins)
    }

    pub fn pending_writes(&self) -> usize {
        self.reconciler.pending_writes()
    }

    /// Deadline of the next scheduled event.
    pub fn next_due(&mut self) -> Option<i64> {
        self.sched.next_due()
    }

    /// Dispatch every event due by the clock's current time. Returns how many
    /// ran.
    pub fn pump(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut ran = 0;
        while let Some((_, event)) = self.sched.pop_due(now) {
            self.dispatch(event);
            ran += 1;
        }
        ran
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::DecayTick => {
                let mut next = self.state;
                if apply_decay(&mut next, self.sched.now(), &self.rates) {
                    self.commit(next);
                } else {
                    debug!("decay tick skipped");
                }
            }
            SessionEvent::InteractionEnd => self.interaction = None,
            SessionEvent::EarningEnd => self.earning = None,
            SessionEvent::Persist(timer) => {
                if let Some(previous) =
                    self.reconciler
                        .on_timer(timer, &mut self.sched, self.remote.as_ref())
                {
                    self.roll_back(previous);
                }
            }
        }
    }

    pub fn perform(&mut self, kind: ActionKind) -> ActionOutcome {
        self.pump();
        let mut next = self.state;
        let outcome = apply_action(&mut next, kind, self.sched.now(), self.rng.as_mut());
        match outcome {
            ActionOutcome::TooTired => {
                debug!("{} refused: energy {:.1}", kind.name(), self.state.energy);
            }
            ActionOutcome::Applied { reward } => {
                self.show_interaction(kind);
                if reward > 0 {
                    self.show_earning(reward);
                }
                self.commit(next);
            }
        }
        outcome
    }

    pub fn feed(&mut self) -> ActionOutcome {
        self.perform(ActionKind::Feed)
    }

    pub fn clean(&mut self) -> ActionOutcome {
        self.perform(ActionKind::Clean)
    }

    pub fn sleep(&mut self) -> ActionOutcome {
        self.perform(ActionKind::Sleep)
    }

    pub fn play(&mut self) -> ActionOutcome {
        self.perform(ActionKind::Play)
    }

    pub fn purchase(&mut self, item_id: &str) -> Result<PurchasedItem, PetError> {
        self.pump();
        let now = self.sched.now();
        let result = self.shop.purchase(
            self.user.as_ref(),
            item_id,
            &mut self.state,
            now,
            &mut self.reconciler,
            &mut self.sched,
            self.remote.as_ref(),
            self.local.as_ref(),
        );
        if let Err(e) = &result {
            self.reconciler.record(Err(e.clone()));
        }
        result
    }

    pub fn set_equipped(&mut self, item_id: &str, equipped: bool) -> Result<(), PetError> {
        let result = self.shop.set_equipped(
            self.user.as_ref(),
            item_id,
            equipped,
            self.remote.as_ref(),
            self.local.as_ref(),
        );
        if let Err(e) = &result {
            self.reconciler.record(Err(e.clone()));
        }
        result
    }

    /// Flush what is pending for the current identity, then reload
    /// everything for `user`.
    pub fn switch_user(&mut self, user: Option<UserId>) {
        if user == self.user {
            return;
        }
        self.pump();
        self.reconciler
            .flush_pending(&mut self.sched, self.remote.as_ref());
        self.reconciler.teardown(&mut self.sched);

        let now = self.sched.now();
        let policy = self.reconciler.policy();
        self.reconciler = Reconciler::new(user.clone(), &self.timings, policy);
        let (state, source) =
            self.reconciler
                .load(self.remote.as_ref(), self.local.as_ref(), now);
        self.state = state;
        self.source = source;

        self.shop = ShopLedger::new();
        if let Err(e) = self
            .shop
            .load(user.as_ref(), self.remote.as_ref(), self.local.as_ref())
        {
            self.reconciler.note(e);
        }
        info!(
            "identity switched to {}",
            user.as_ref().map_or("guest", UserId::as_str)
        );
        self.user = user;
    }

    /// Cancel every timer and make one last attempt at pending writes.
    pub fn shutdown(mut self) -> Result<(), PetError> {
        self.pump();
        self.sched.cancel(self.decay_timer);
        self.reconciler
            .flush_pending(&mut self.sched, self.remote.as_ref());
        self.reconciler.teardown(&mut self.sched);
        self.sched.cancel_all();
        info!("session closed at {}", stamp(self.sched.now()));
        match self.reconciler.last_error() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn commit(&mut self, next: PetState) {
        self.state = next;
        if let Some(previous) = self.reconciler.commit(
            &self.state,
            &mut self.sched,
            self.remote.as_ref(),
            self.local.as_ref(),
        ) {
            self.roll_back(previous);
        }
    }

    fn roll_back(&mut self, previous: PetState) {
        info!(
            "rolling back to confirmed state ({} coins)",
            previous.coins
        );
        self.state = previous;
        self.reconciler.mirror(&self.state, self.local.as_ref());
    }

    fn show_interaction(&mut self, kind: ActionKind) {
        if let Some((_, id)) = self.interaction.take() {
            self.sched.cancel(id);
        }
        let id = self.sched.schedule_after(
            self.timings.interaction_display_ms as i64,
            SessionEvent::InteractionEnd,
        );
        self.interaction = Some((kind, id));
    }

    fn show_earning(&mut self, coins: u64) {
        if let Some((_, id)) = self.earning.take() {
            self.sched.cancel(id);
        }
        let id = self.sched.schedule_after(
            self.timings.earning_display_ms as i64,
            SessionEvent::EarningEnd,
        );
        self.earning = Some((coins, id));
    }
}
