use std::time::{Duration, Instant};

use chrono::Utc;
use mapjob_core::{
    update, AppState, DensitySample, Effect, EstimatorSettings, JobSuccess, Msg, ProgressEstimator,
    ProgressEvent, ResultLinks, Stage, TerminalOutcome, UploadedFile,
};

fn processing() -> (AppState, u64, Instant) {
    let (state, _) = update(
        AppState::in_memory(),
        Msg::FileChosen {
            file: UploadedFile::new("route.kml", b"<kml/>".to_vec()),
            summary: None,
        },
    );
    let start = Instant::now();
    let (state, effects) = update(state, Msg::RunRequested { now: start });
    match effects.as_slice() {
        [Effect::SubmitJob { token, .. }] => (state, *token, start),
        other => panic!("expected submit, got {other:?}"),
    }
}

fn percent(state: &AppState) -> u8 {
    state.view().progress.map(|p| p.percent).unwrap_or_default()
}

fn hinted(stage: Stage, hint: f64) -> ProgressEvent {
    ProgressEvent {
        estimated_total_seconds: Some(hint),
        ..ProgressEvent::new(stage, "working")
    }
}

#[test]
fn displayed_percent_never_regresses_when_estimates_grow() {
    mapjob_logging::initialize_for_tests();
    let (mut state, token, start) = processing();
    let schedule = [
        (5, Some(hinted(Stage::Geometry, 10.0))),
        (8, None),
        (9, Some(hinted(Stage::Querying, 300.0))),
        (20, None),
        (30, Some(hinted(Stage::Querying, 40.0))),
        (45, Some(hinted(Stage::Processing, 900.0))),
        (60, None),
    ];
    let mut last = 0;
    for (secs, event) in schedule {
        let now = start + Duration::from_secs(secs);
        if let Some(event) = event {
            state = update(state, Msg::JobProgress { token, event, now }).0;
        }
        state = update(state, Msg::Tick { now }).0;
        let shown = percent(&state);
        assert!(shown >= last, "percent went from {last} to {shown} at {secs}s");
        assert!(shown < 100);
        last = shown;
    }
}

#[test]
fn success_reports_exactly_one_hundred() {
    mapjob_logging::initialize_for_tests();
    let (state, token, start) = processing();
    let (state, _) = update(
        state,
        Msg::Tick {
            now: start + Duration::from_secs(3),
        },
    );
    assert!(percent(&state) < 100);
    let (state, _) = update(
        state,
        Msg::JobFinished {
            token,
            outcome: TerminalOutcome::Succeeded(JobSuccess {
                job_id: Some("j".to_string()),
                links: ResultLinks::default(),
            }),
            now: Utc::now(),
        },
    );
    assert_eq!(percent(&state), 100);
    let (state, _) = update(
        state,
        Msg::Tick {
            now: start + Duration::from_secs(4),
        },
    );
    assert_eq!(percent(&state), 100);
}

#[test]
fn stage_caps_hold_without_a_terminal_event() {
    let settings = EstimatorSettings::default();
    let start = Instant::now();
    let mut estimator = ProgressEstimator::new(&settings, start, None);
    estimator.observe(&hinted(Stage::Querying, 1.0), start);
    let shown = estimator.tick(start + Duration::from_secs(3_600));
    assert_eq!(shown, settings.stage_cap(Stage::Querying));
    estimator.observe(&ProgressEvent::new(Stage::Report, "Generating reports"), start);
    let shown = estimator.tick(start + Duration::from_secs(7_200));
    assert_eq!(shown, settings.stage_cap(Stage::Report));
    assert!(shown < 100);
}

#[test]
fn dense_bellwether_layers_extend_the_end_allowance() {
    let settings = EstimatorSettings::default();
    let start = Instant::now();
    let mut sparse = ProgressEstimator::new(&settings, start, Some(5.0));
    let mut dense = ProgressEstimator::new(&settings, start, Some(5.0));
    let sample = |category: &str, feature_count| ProgressEvent {
        density_sample: Some(DensitySample {
            category: category.to_string(),
            feature_count,
        }),
        ..ProgressEvent::new(Stage::Querying, "Querying layers")
    };
    sparse.observe(&sample("wetlands", 10), start);
    dense.observe(&sample("wetlands", 50_000), start);
    // Non-bellwether categories do not count toward density.
    sparse.observe(&sample("parcels", 50_000), start);

    sparse.observe(&hinted(Stage::Querying, 60.0), start);
    dense.observe(&hinted(Stage::Querying, 60.0), start);
    assert!(dense.estimated_total_seconds() > sparse.estimated_total_seconds());
    assert!(sparse.estimated_total_seconds() > 60.0);
}

#[test]
fn unusable_rotation_interval_does_not_break_ticking() {
    let settings = EstimatorSettings {
        rotation_interval_seconds: f64::INFINITY,
        ..EstimatorSettings::default()
    };
    assert_eq!(settings.rotation_interval(), Duration::MAX);
    let nan = EstimatorSettings {
        rotation_interval_seconds: f64::NAN,
        ..EstimatorSettings::default()
    };
    assert_eq!(nan.rotation_interval(), Duration::from_millis(100));

    let start = Instant::now();
    let mut estimator = ProgressEstimator::new(&settings, start, None);
    estimator.observe(&hinted(Stage::Querying, 10.0), start);
    let first = estimator.tick(start + Duration::from_secs(2));
    assert!(estimator.tick(start + Duration::from_secs(4)) >= first);
}
