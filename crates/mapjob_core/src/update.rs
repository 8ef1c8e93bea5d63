use std::time::Instant;

use chrono::{DateTime, Utc};
use mapjob_logging::{job_debug, job_info, job_warn, short_id};

use crate::claim::{claim_batch, detect_transition, AuthTransition};
use crate::state::{ClaimPrompt, ConfigureDraft};
use crate::storage::{ErrorSnapshot, TerminalSnapshot};
use crate::{
    AppState, DrawnGeometry, Effect, GeometrySummary, InputError, JobConfig, JobInput, JobRequest,
    JobSuccess, JobToken, Msg, ProgressEvent, TerminalOutcome, UiState, UploadedFile,
};

/// Applies a message to the controller and returns the effects to run.
///
/// This is the only place UI state changes. Terminal outcomes are written
/// to storage before the new state is committed.
pub fn update(mut state: AppState, msg: Msg) -> (AppState, Vec<Effect>) {
    let effects = match msg {
        Msg::Mounted {
            now,
            reset_requested,
        } => {
            mount(&mut state, now, reset_requested);
            Vec::new()
        }
        Msg::FileChosen { file, summary } => {
            choose_file(&mut state, file, summary);
            Vec::new()
        }
        Msg::DrawRequested => {
            request_draw(&mut state);
            Vec::new()
        }
        Msg::GeometryConfirmed(geometry) => {
            confirm_geometry(&mut state, geometry);
            Vec::new()
        }
        Msg::DrawCancelled => {
            if matches!(state.ui, UiState::Draw { .. }) {
                state.guard.clear();
                state.ui = UiState::Upload;
                state.input_error = None;
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::ConfigEdited(config) => {
            if let UiState::Configure(draft) = &mut state.ui {
                draft.config = config;
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::RunRequested { now } => run(&mut state, now),
        Msg::JobProgress { token, event, now } => {
            apply_progress(&mut state, token, event, now);
            Vec::new()
        }
        Msg::JobFinished {
            token,
            outcome,
            now,
        } => finish(&mut state, token, outcome, now),
        Msg::RetryClicked => {
            retry(&mut state);
            Vec::new()
        }
        Msg::StartOverClicked => {
            if !matches!(state.ui, UiState::Upload) {
                reset_to_upload(&mut state);
                job_info!("Started over; pending claims kept");
            }
            Vec::new()
        }
        Msg::Tick { now } => {
            tick(&mut state, now);
            Vec::new()
        }
        Msg::AuthChanged { user_id, now } => auth_changed(&mut state, user_id, now),
        Msg::ClaimFinished { result } => {
            claim_finished(&mut state, result);
            Vec::new()
        }
        Msg::ClaimPromptDue { job_id } => {
            let due = matches!(&state.claim_prompt, ClaimPrompt::Scheduled { job_id: scheduled } if *scheduled == job_id);
            if due && state.user_id.is_none() && state.ui.is_terminal() {
                state.claim_prompt = ClaimPrompt::Visible { job_id };
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::ClaimPromptDismissed => {
            if state.claim_prompt != ClaimPrompt::Idle {
                state.claim_prompt = ClaimPrompt::Idle;
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::DownloadRequested { url } => {
            if matches!(state.ui, UiState::Complete { .. }) {
                state.alert = None;
                state.mark_dirty();
                vec![Effect::Download { url }]
            } else {
                Vec::new()
            }
        }
        Msg::DownloadFinished { result } => {
            match result {
                Ok(path) => state.notification = Some(format!("Saved {}", path.display())),
                Err(message) => {
                    job_warn!("Download failed: {}", message);
                    state.alert = Some(format!("Download failed: {message}"));
                }
            }
            state.mark_dirty();
            Vec::new()
        }
        Msg::NotificationDismissed => {
            if state.notification.take().is_some() {
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::AlertDismissed => {
            if state.alert.take().is_some() {
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn mount(state: &mut AppState, now: DateTime<Utc>, reset_requested: bool) {
    state.guard.clear();
    state.estimator = None;
    state.events.clear();
    state.mark_dirty();

    if reset_requested {
        state.storage.outcomes.clear();
        state.ui = UiState::Upload;
        job_info!("Mounted with reset; skipping reconstruction");
        return;
    }

    if let Some(snapshot) = state.storage.outcomes.load_terminal(now) {
        job_info!(
            "Restored completed job {:?} captured at {}",
            snapshot.job_id,
            snapshot.captured_at
        );
        state.ui = UiState::Complete {
            input_label: snapshot.input_label,
            job_id: snapshot.job_id,
            links: snapshot.links,
        };
        return;
    }

    if let Some(snapshot) = state.storage.outcomes.load_error(now) {
        match snapshot.to_draft() {
            Some(draft) => {
                job_info!("Restored failed input {} for another run", snapshot.input_label);
                state.ui = UiState::Configure(draft);
                return;
            }
            None => job_warn!(
                "Failed job input {} could not be restored",
                snapshot.input_label
            ),
        }
    }

    state.ui = UiState::Upload;
}

fn choose_file(state: &mut AppState, file: UploadedFile, summary: Option<GeometrySummary>) {
    let config = match &state.ui {
        UiState::Upload => JobConfig::default(),
        UiState::Configure(draft) => draft.config.clone(),
        _ => return,
    };
    state.mark_dirty();
    if let Err(err) = file.validate() {
        job_info!("Rejected input {}: {}", file.name, err);
        state.input_error = Some(err.to_string());
        return;
    }
    state.input_error = None;
    state.ui = UiState::Configure(ConfigureDraft::new(JobInput::File(file), summary, config));
}

fn request_draw(state: &mut AppState) {
    let next = match &state.ui {
        UiState::Upload => UiState::Draw {
            seed: None,
            preserved: None,
        },
        UiState::Configure(draft) => UiState::Draw {
            seed: match &draft.input {
                JobInput::Drawn(geometry) => Some(geometry.clone()),
                JobInput::File(_) => None,
            },
            preserved: Some(draft.config.clone()),
        },
        _ => return,
    };
    state.ui = next;
    state.input_error = None;
    state.mark_dirty();
}

fn confirm_geometry(state: &mut AppState, geometry: DrawnGeometry) {
    let preserved = match &state.ui {
        UiState::Draw { preserved, .. } => preserved.clone(),
        _ => return,
    };
    state.mark_dirty();
    if geometry.is_empty() {
        state.input_error = Some(InputError::NoFeatures.to_string());
        return;
    }
    let config = preserved.unwrap_or_default();
    let summary = geometry.summary();
    state.input_error = None;
    state.ui = UiState::Configure(ConfigureDraft::new(
        JobInput::Drawn(geometry),
        Some(summary),
        config,
    ));
}

fn run(state: &mut AppState, now: Instant) -> Vec<Effect> {
    let draft = match std::mem::take(&mut state.ui) {
        UiState::Configure(draft) => draft,
        other => {
            state.ui = other;
            return Vec::new();
        }
    };
    state.mark_dirty();
    if let Err(err) = draft.input.validate() {
        state.input_error = Some(err.to_string());
        state.ui = UiState::Configure(draft);
        return Vec::new();
    }

    let token = state.guard.begin();
    state.events.clear();
    let area_hint = draft.summary.as_ref().and_then(|summary| summary.area_sq_miles);
    state.start_estimator(now, area_hint);
    // An older outcome must not be restored while this job runs.
    state.storage.outcomes.clear();
    state.claim_prompt = ClaimPrompt::Idle;
    state.input_error = None;
    state.alert = None;

    let request = JobRequest {
        input: draft.input.to_upload(),
        config: draft.config.clone(),
    };
    job_info!(
        "Submitting job token={} input={} ({} bytes)",
        token,
        draft.input.label(),
        request.input.bytes.len()
    );
    state.ui = UiState::Processing(draft);
    vec![Effect::SubmitJob { token, request }]
}

fn apply_progress(state: &mut AppState, token: JobToken, event: ProgressEvent, now: Instant) {
    if !state.guard.is_current(token) || !matches!(state.ui, UiState::Processing(_)) {
        job_debug!("Dropping progress from stale job token={}", token);
        return;
    }
    if let Some(estimator) = state.estimator.as_mut() {
        estimator.observe(&event, now);
        estimator.tick(now);
    }
    state.events.push(event);
    state.mark_dirty();
}

fn finish(
    state: &mut AppState,
    token: JobToken,
    outcome: TerminalOutcome,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    if !state.guard.is_current(token) {
        job_debug!("Discarding result of superseded job token={}", token);
        return Vec::new();
    }
    let draft = match std::mem::take(&mut state.ui) {
        UiState::Processing(draft) => draft,
        other => {
            // A second result for an already finished job.
            state.ui = other;
            return Vec::new();
        }
    };
    state.mark_dirty();

    match outcome {
        TerminalOutcome::Succeeded(success) => complete(state, token, draft, success, now),
        TerminalOutcome::Failed { message } => {
            fail(state, token, draft, message, false, now);
            Vec::new()
        }
        TerminalOutcome::RateLimited { message } => {
            fail(state, token, draft, message, true, now);
            Vec::new()
        }
    }
}

fn complete(
    state: &mut AppState,
    token: JobToken,
    draft: ConfigureDraft,
    success: JobSuccess,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    if let Some(estimator) = state.estimator.as_mut() {
        estimator.complete();
    }
    let JobSuccess { job_id, links } = success;
    let input_label = draft.input.label().to_string();

    state.storage.outcomes.save_terminal(&TerminalSnapshot {
        input_label: input_label.clone(),
        job_id: job_id.clone(),
        links: links.clone(),
        captured_at: now,
    });

    let mut effects = Vec::new();
    if state.user_id.is_none() {
        if let Some(job_id) = &job_id {
            state.storage.pending.add(job_id);
            state.claim_prompt = ClaimPrompt::Scheduled {
                job_id: job_id.clone(),
            };
            effects.push(Effect::ScheduleClaimPrompt {
                job_id: job_id.clone(),
                delay: state.settings.claim_prompt_delay(),
            });
        }
    }

    job_info!(
        "Job token={} completed as {} with {} link(s)",
        token,
        job_id.as_deref().map(short_id).unwrap_or("-"),
        links.count()
    );
    state.ui = UiState::Complete {
        input_label,
        job_id,
        links,
    };
    effects
}

fn fail(
    state: &mut AppState,
    token: JobToken,
    draft: ConfigureDraft,
    message: String,
    rate_limited: bool,
    now: DateTime<Utc>,
) {
    state
        .storage
        .outcomes
        .save_error(&ErrorSnapshot::capture(&draft, &message, rate_limited, now));
    job_info!(
        "Job token={} failed (rate_limited={}): {}",
        token,
        rate_limited,
        message
    );
    state.ui = UiState::Error {
        message,
        rate_limited,
        retry: ConfigureDraft {
            restored: false,
            ..draft
        },
    };
}

fn retry(state: &mut AppState) {
    let retry = match std::mem::take(&mut state.ui) {
        UiState::Error { retry, .. } => retry,
        other => {
            state.ui = other;
            return;
        }
    };
    state.guard.clear();
    state.estimator = None;
    state.events.clear();
    state.storage.outcomes.clear();
    state.claim_prompt = ClaimPrompt::Idle;
    state.ui = UiState::Configure(retry);
    state.mark_dirty();
}

fn reset_to_upload(state: &mut AppState) {
    state.guard.clear();
    state.estimator = None;
    state.events.clear();
    state.storage.outcomes.clear();
    state.claim_prompt = ClaimPrompt::Idle;
    state.input_error = None;
    state.alert = None;
    state.ui = UiState::Upload;
    state.mark_dirty();
}

fn tick(state: &mut AppState, now: Instant) {
    if !matches!(state.ui, UiState::Processing(_)) {
        return;
    }
    let Some(estimator) = state.estimator.as_mut() else {
        return;
    };
    let before = (estimator.displayed_percent(), estimator.message().to_string());
    let percent = estimator.tick(now);
    if percent != before.0 || estimator.message() != before.1 {
        state.mark_dirty();
    }
}

fn auth_changed(state: &mut AppState, user_id: Option<String>, now: DateTime<Utc>) -> Vec<Effect> {
    let transition = detect_transition(state.user_id.as_deref(), user_id.as_deref());
    state.user_id = user_id;
    match transition {
        AuthTransition::SignedIn { user_id } => {
            state.claim_prompt = ClaimPrompt::Idle;
            state.mark_dirty();
            let pending = state.storage.pending.list();
            let snapshot_job = state
                .storage
                .outcomes
                .load_terminal(now)
                .and_then(|snapshot| snapshot.job_id);
            let job_ids = claim_batch(&pending, snapshot_job.as_deref());
            if job_ids.is_empty() {
                return Vec::new();
            }
            job_info!("Signed in; claiming {} job(s)", job_ids.len());
            state.claim_in_flight = true;
            vec![Effect::ClaimJobs { user_id, job_ids }]
        }
        AuthTransition::SignedOut => {
            job_info!("Signed out; resetting job tracking");
            reset_to_upload(state);
            state.notification = None;
            state.claim_in_flight = false;
            Vec::new()
        }
        AuthTransition::Unchanged => Vec::new(),
    }
}

fn claim_finished(state: &mut AppState, result: Result<u32, String>) {
    state.claim_in_flight = false;
    state.mark_dirty();
    match result {
        Ok(claimed) => {
            job_info!("Claimed {} job(s)", claimed);
            state.storage.pending.clear();
            if claimed > 0 {
                let noun = if claimed == 1 { "map" } else { "maps" };
                state.notification = Some(format!("Saved {claimed} {noun} to your account"));
            }
        }
        Err(err) => job_warn!("Claiming jobs failed; keeping them pending: {}", err),
    }
}
