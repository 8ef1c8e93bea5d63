use chrono::{Duration, Utc};
use mapjob_core::{
    update, AppState, CoreSettings, Effect, MemoryStore, Msg, OutcomeSnapshots, PendingJobList,
    ResultLinks, Storage, TerminalSnapshot, UiState, LAST_OUTCOME_KEY,
};
use pretty_assertions::assert_eq;

struct Scopes {
    session: MemoryStore,
    navigation: MemoryStore,
}

impl Scopes {
    /// Two anonymous jobs pending plus a completion still on screen.
    fn seeded() -> Self {
        let scopes = Self {
            session: MemoryStore::new(),
            navigation: MemoryStore::new(),
        };
        let mut pending = PendingJobList::new(Box::new(scopes.session.clone()), 10);
        pending.add("job-1");
        pending.add("job-2");
        let mut outcomes =
            OutcomeSnapshots::new(Box::new(scopes.navigation.clone()), Duration::hours(1));
        outcomes.save_terminal(&TerminalSnapshot {
            input_label: "site.zip".to_string(),
            job_id: Some("job-3".to_string()),
            links: ResultLinks::default(),
            captured_at: Utc::now(),
        });
        scopes
    }

    fn open(&self) -> AppState {
        let settings = CoreSettings::default();
        let storage = Storage::new(
            Box::new(self.session.clone()),
            Box::new(self.navigation.clone()),
            &settings,
        );
        AppState::new(storage, settings)
    }
}

fn sign_in(state: AppState, user: &str) -> (AppState, Vec<Effect>) {
    update(
        state,
        Msg::AuthChanged {
            user_id: Some(user.to_string()),
            now: Utc::now(),
        },
    )
}

#[test]
fn sign_in_claims_pending_and_snapshot_jobs_in_one_batch() {
    mapjob_logging::initialize_for_tests();
    let scopes = Scopes::seeded();
    let (state, effects) = sign_in(scopes.open(), "user-9");

    assert_eq!(
        effects,
        vec![Effect::ClaimJobs {
            user_id: "user-9".to_string(),
            job_ids: vec![
                "job-1".to_string(),
                "job-2".to_string(),
                "job-3".to_string()
            ],
        }]
    );
    assert!(state.view().claim_in_flight);
}

#[test]
fn successful_claim_clears_pending_but_not_the_snapshot() {
    mapjob_logging::initialize_for_tests();
    let scopes = Scopes::seeded();
    let (state, _) = sign_in(scopes.open(), "user-9");
    let (state, _) = update(state, Msg::ClaimFinished { result: Ok(3) });

    assert!(state.pending_jobs().is_empty());
    assert!(scopes.navigation.raw(LAST_OUTCOME_KEY).is_some());
    let view = state.view();
    assert!(!view.claim_in_flight);
    assert_eq!(
        view.notification.as_deref(),
        Some("Saved 3 maps to your account")
    );
}

#[test]
fn zero_claimed_shows_no_notification() {
    mapjob_logging::initialize_for_tests();
    let (state, _) = sign_in(Scopes::seeded().open(), "user-9");
    let (state, _) = update(state, Msg::ClaimFinished { result: Ok(0) });
    assert_eq!(state.view().notification, None);
    assert!(state.pending_jobs().is_empty());
}

#[test]
fn failed_claim_keeps_jobs_pending() {
    mapjob_logging::initialize_for_tests();
    let (state, _) = sign_in(Scopes::seeded().open(), "user-9");
    let (state, _) = update(
        state,
        Msg::ClaimFinished {
            result: Err("connection refused".to_string()),
        },
    );
    assert_eq!(state.pending_jobs(), vec!["job-1".to_string(), "job-2".to_string()]);
    assert_eq!(state.view().notification, None);
}

#[test]
fn nothing_to_claim_emits_nothing() {
    mapjob_logging::initialize_for_tests();
    let (state, effects) = sign_in(AppState::in_memory(), "user-9");
    assert!(effects.is_empty());
    assert!(!state.view().claim_in_flight);
}

#[test]
fn staying_signed_in_does_not_reclaim() {
    mapjob_logging::initialize_for_tests();
    let (state, _) = sign_in(Scopes::seeded().open(), "user-9");
    let (_state, effects) = sign_in(state, "user-9");
    assert!(effects.is_empty());
}

#[test]
fn sign_out_resets_to_upload_and_keeps_pending() {
    mapjob_logging::initialize_for_tests();
    let scopes = Scopes::seeded();
    let (state, _) = update(
        scopes.open(),
        Msg::Mounted {
            now: Utc::now(),
            reset_requested: false,
        },
    );
    assert!(matches!(state.ui(), UiState::Complete { .. }));

    // Signed in without claiming (e.g. the request is still out).
    let (state, _) = sign_in(state, "user-9");
    let (state, effects) = update(
        state,
        Msg::AuthChanged {
            user_id: None,
            now: Utc::now(),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(state.ui(), &UiState::Upload);
    assert_eq!(state.guard().active(), None);
    assert_eq!(state.pending_jobs(), vec!["job-1".to_string(), "job-2".to_string()]);
    assert_eq!(scopes.navigation.raw(LAST_OUTCOME_KEY), None);
}
