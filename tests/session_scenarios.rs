use petroom::config::Timings;
use petroom::model::{millis_to_utc, PetRecord, PET_STATE_KEY};
use petroom::persist::{FailurePolicy, LoadSource};
use petroom::remote::MemoryRemote;
use petroom::session::ManualClock;
use petroom::sim::{ActionOutcome, DecayRates};
use petroom::stats::FixedRandom;
use petroom::storage::MemoryStore;
use petroom::{ActionKind, Backends, PetError, PetState, Session, SessionOptions, UserId};

const T0: i64 = 1_700_000_000_000;

struct World {
    remote: MemoryRemote,
    local: MemoryStore,
    clock: ManualClock,
}

impl World {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            remote: MemoryRemote::with_catalog(),
            local: MemoryStore::new(),
            clock: ManualClock::new(T0),
        }
    }

    fn with_pet(self, user: &str, stats: [f64; 4], coins: i64) -> Self {
        self.remote.put_pet(PetRecord {
            user_id: user.to_string(),
            happiness: stats[0],
            hunger: stats[1],
            cleanliness: stats[2],
            energy: stats[3],
            coins,
            last_update_time: millis_to_utc(T0),
        });
        self
    }

    fn start(&self, user: Option<&str>, policy: FailurePolicy, roll: usize) -> Session {
        Session::start(
            user.map(UserId::new),
            SessionOptions {
                timings: Timings::default(),
                policy,
                rates: DecayRates::default(),
            },
            Backends {
                remote: Box::new(self.remote.clone()),
                local: Box::new(self.local.clone()),
                clock: Box::new(self.clock.clone()),
                rng: Box::new(FixedRandom(roll)),
            },
        )
    }

    fn wait(&self, session: &mut Session, ms: i64) {
        self.clock.advance(ms);
        session.pump();
    }
}

/// A miserable pet: no action brings wellbeing above the reward threshold.
const GLOOMY: [f64; 4] = [10.0, 90.0, 10.0, 50.0];

#[test]
fn feeding_the_default_pet_earns_a_reward() {
    let w = World::new();
    let mut s = w.start(None, FailurePolicy::KeepOptimistic, 1);
    assert_eq!(s.source(), LoadSource::Defaults);

    assert_eq!(s.feed(), ActionOutcome::Applied { reward: 2 });
    let st = *s.state();
    assert_eq!(st.hunger, 0.0);
    assert_eq!(st.happiness, 85.0);
    assert_eq!(st.cleanliness, 85.0);
    assert_eq!(st.energy, 80.0);
    assert_eq!(st.coins, 12);
    assert_eq!(st.last_update_time, T0);
    assert_eq!(s.recent_earning(), Some(2));

    let mirrored: PetState = serde_json::from_str(&w.local.raw(PET_STATE_KEY).unwrap()).unwrap();
    assert_eq!(mirrored, st);
}

#[test]
fn tired_pet_refuses_to_play_without_side_effects() {
    let w = World::new().with_pet("u1", [60.0, 30.0, 60.0, 15.0], 5);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);
    let before = *s.state();
    let mirror_writes = w.local.write_count();

    assert_eq!(s.play(), ActionOutcome::TooTired);
    assert_eq!(*s.state(), before);
    assert_eq!(s.interaction(), None);
    assert_eq!(s.pending_writes(), 0);

    w.wait(&mut s, 5_000);
    assert!(w.remote.pet_writes().is_empty());
    assert_eq!(w.local.write_count(), mirror_writes);
}

#[test]
fn quick_stat_changes_reach_the_remote_once() {
    let w = World::new().with_pet("u1", GLOOMY, 5);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);

    assert_eq!(s.clean(), ActionOutcome::Applied { reward: 0 });
    w.wait(&mut s, 100);
    assert_eq!(s.sleep(), ActionOutcome::Applied { reward: 0 });
    assert_eq!(s.pending_writes(), 1);

    w.wait(&mut s, 2_000);
    let writes = w.remote.pet_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].cleanliness, 50.0);
    assert_eq!(writes[0].energy, 100.0);
    assert_eq!(writes[0].happiness, 30.0);
    assert_eq!(s.error(), None);
}

#[test]
fn coin_rewards_are_written_immediately() {
    let w = World::new().with_pet("u1", [75.0, 25.0, 85.0, 80.0], 10);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 2);

    assert_eq!(s.feed(), ActionOutcome::Applied { reward: 3 });
    let writes = w.remote.pet_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].coins, 13);
    assert_eq!(s.pending_writes(), 0);
}

#[test]
fn outage_keeps_playing_locally_and_catches_up() {
    let w = World::new().with_pet("u1", [75.0, 25.0, 85.0, 80.0], 10);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);

    w.remote.set_fail_writes(true);
    s.feed();
    assert_eq!(s.state().coins, 11);
    let err = s.error().cloned().unwrap();
    assert_eq!(err.code(), "NETWORK_ERROR");
    assert!(!err.user_message().is_empty());

    let mirrored: PetState = serde_json::from_str(&w.local.raw(PET_STATE_KEY).unwrap()).unwrap();
    assert_eq!(mirrored.coins, 11);

    w.remote.set_fail_writes(false);
    let expected = *s.state();
    assert_eq!(s.shutdown(), Ok(()));
    let row = w.remote.pet(&UserId::new("u1")).unwrap();
    assert_eq!(row.coins, expected.coins as i64);
    assert_eq!(row.hunger, expected.hunger);
}

#[test]
fn rollback_policy_reverts_to_the_saved_pet() {
    let w = World::new().with_pet("u1", [75.0, 25.0, 85.0, 80.0], 10);
    let mut s = w.start(Some("u1"), FailurePolicy::Rollback, 0);
    let loaded = *s.state();

    w.remote.set_fail_writes(true);
    s.feed();
    assert_eq!(*s.state(), loaded);
    assert_eq!(s.error().map(PetError::code), Some("NETWORK_ERROR"));
    assert_eq!(s.pending_writes(), 0);
}

#[test]
fn loading_prefers_remote_then_local_then_defaults() {
    let w = World::new().with_pet("u1", GLOOMY, 33);
    let s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);
    assert_eq!(s.source(), LoadSource::Remote);
    assert_eq!(s.state().coins, 33);
    drop(s);

    w.remote.set_fail_reads(true);
    let s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);
    assert_eq!(s.source(), LoadSource::Local);
    assert_eq!(s.state().coins, 33);
    assert_eq!(s.error().map(PetError::code), Some("NETWORK_ERROR"));

    let fresh = World::new();
    let s = fresh.start(None, FailurePolicy::KeepOptimistic, 0);
    assert_eq!(s.source(), LoadSource::Defaults);
    assert_eq!(*s.state(), PetState::new_default(T0));
}

#[test]
fn out_of_range_rows_are_clamped_on_load() {
    let w = World::new().with_pet("u1", [250.0, -3.0, f64::NAN, 40.0], -9);
    let s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);
    let st = s.state();
    assert_eq!(st.happiness, 100.0);
    assert_eq!(st.hunger, 0.0);
    // NaN is stored as null, which reads as missing.
    assert_eq!(st.cleanliness, 85.0);
    assert_eq!(st.energy, 40.0);
    assert_eq!(st.coins, 0);
}

#[test]
fn decay_ticks_drift_stats_and_persist_in_the_background() {
    let w = World::new().with_pet("u1", GLOOMY, 5);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);

    w.wait(&mut s, 30_000);
    let st = *s.state();
    assert!((st.hunger - 90.6).abs() < 1e-9);
    assert!((st.happiness - 9.75).abs() < 1e-9);
    assert_eq!(st.last_update_time, T0 + 30_000);
    assert_eq!(st.coins, 5);

    w.wait(&mut s, 2_000);
    let writes = w.remote.pet_writes();
    assert_eq!(writes.len(), 1);
    assert!((writes[0].hunger - 90.6).abs() < 1e-9);

    // Ten more minutes: hunger saturates, nothing overshoots.
    for _ in 0..20 {
        w.wait(&mut s, 30_000);
    }
    let st = *s.state();
    assert_eq!(st.hunger, 100.0);
    assert_eq!(st.happiness, 4.75);
    assert!(st.energy >= 0.0 && st.cleanliness >= 0.0);
}

#[test]
fn display_flags_expire_independently_of_persistence() {
    let w = World::new().with_pet("u1", [75.0, 25.0, 85.0, 80.0], 10);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);
    w.remote.set_fail_writes(true);

    s.feed();
    assert_eq!(s.interaction(), Some(ActionKind::Feed));
    assert_eq!(s.recent_earning(), Some(1));
    w.wait(&mut s, 1_500);
    assert_eq!(s.interaction(), None);
    w.wait(&mut s, 500);
    assert_eq!(s.recent_earning(), None);
}

#[test]
fn switching_identity_flushes_then_reloads() {
    let w = World::new()
        .with_pet("a", GLOOMY, 5)
        .with_pet("b", [60.0, 40.0, 60.0, 60.0], 70);
    let mut s = w.start(Some("a"), FailurePolicy::KeepOptimistic, 0);

    s.clean();
    assert_eq!(s.pending_writes(), 1);
    s.switch_user(Some(UserId::new("b")));

    let a = w.remote.pet(&UserId::new("a")).unwrap();
    assert_eq!(a.cleanliness, 50.0);
    assert_eq!(s.user().map(UserId::as_str), Some("b"));
    assert_eq!(s.state().coins, 70);
    assert_eq!(s.source(), LoadSource::Remote);
    assert_eq!(s.pending_writes(), 0);
}

#[test]
fn shutdown_flushes_debounced_state() {
    let w = World::new().with_pet("u1", GLOOMY, 5);
    let mut s = w.start(Some("u1"), FailurePolicy::KeepOptimistic, 0);
    s.clean();
    assert!(w.remote.pet_writes().is_empty());

    assert_eq!(s.shutdown(), Ok(()));
    let writes = w.remote.pet_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].cleanliness, 50.0);
}

#[test]
fn local_storage_failure_is_reported_but_not_fatal() {
    let w = World::new();
    let mut s = w.start(None, FailurePolicy::KeepOptimistic, 0);
    w.local.set_fail_writes(true);

    s.clean();
    assert_eq!(s.state().cleanliness, 100.0);
    assert_eq!(s.error().map(PetError::code), Some("LOCAL_STORAGE_ERROR"));

    w.local.set_fail_writes(false);
    s.sleep();
    assert_eq!(s.error(), None);
}
