//! Predictive progress estimate.
//!
//! Backend percentages stall and jump between stages, so the displayed value
//! is driven by elapsed time against an estimated total duration instead.
//! Server hints only ever revise that total; the displayed percentage never
//! moves backward.

use std::time::{Duration, Instant};

use mapjob_logging::job_debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::{ProgressEvent, Stage};

/// One row of an end-stage allowance table: values below `below` get `seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowanceStep {
    pub below: f64,
    pub seconds: f64,
}

impl AllowanceStep {
    pub fn new(below: f64, seconds: f64) -> Self {
        Self { below, seconds }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCap {
    pub stage: Stage,
    pub cap: u8,
}

/// Tunables for the estimate. The step tables are empirical and safe to retune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub tick_interval_ms: u64,
    pub initial_total_seconds: f64,
    /// Allowance used when no input-size signal is known.
    pub flat_allowance_seconds: f64,
    /// Keyed by input area in square miles.
    pub area_steps: Vec<AllowanceStep>,
    pub area_beyond_seconds: f64,
    /// Keyed by the peak feature count seen across bellwether categories.
    pub density_steps: Vec<AllowanceStep>,
    pub density_beyond_seconds: f64,
    pub bellwether_categories: Vec<String>,
    pub stage_caps: Vec<StageCap>,
    pub default_stage_cap: u8,
    pub rotation_interval_seconds: f64,
    pub filler_messages: Vec<String>,
    /// Fixed seed for the filler shuffle; random when absent.
    pub filler_seed: Option<u64>,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            initial_total_seconds: 90.0,
            flat_allowance_seconds: 20.0,
            area_steps: vec![
                AllowanceStep::new(1.0, 8.0),
                AllowanceStep::new(10.0, 15.0),
                AllowanceStep::new(50.0, 25.0),
                AllowanceStep::new(250.0, 40.0),
            ],
            area_beyond_seconds: 60.0,
            density_steps: vec![
                AllowanceStep::new(100.0, 0.0),
                AllowanceStep::new(1_000.0, 10.0),
                AllowanceStep::new(5_000.0, 25.0),
                AllowanceStep::new(20_000.0, 45.0),
            ],
            density_beyond_seconds: 70.0,
            bellwether_categories: vec![
                "wetlands".to_string(),
                "flood_hazard".to_string(),
                "critical_habitat".to_string(),
                "historic_places".to_string(),
            ],
            stage_caps: vec![
                StageCap { stage: Stage::Upload, cap: 10 },
                StageCap { stage: Stage::Geometry, cap: 20 },
                StageCap { stage: Stage::Querying, cap: 80 },
                StageCap { stage: Stage::Processing, cap: 90 },
                StageCap { stage: Stage::Map, cap: 93 },
                StageCap { stage: Stage::Report, cap: 97 },
            ],
            default_stage_cap: 95,
            rotation_interval_seconds: 3.0,
            filler_messages: [
                "Checking wetland boundaries...",
                "Scanning flood hazard zones...",
                "Looking for critical habitat...",
                "Reviewing historic places...",
                "Cross-referencing protected lands...",
                "Tallying nearby facilities...",
                "Measuring distances to waterways...",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            filler_seed: None,
        }
    }
}

impl EstimatorSettings {
    /// Filler rotation period; non-finite or tiny values fall back to sane bounds.
    pub fn rotation_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.rotation_interval_seconds.max(0.1)).unwrap_or(Duration::MAX)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn stage_cap(&self, stage: Stage) -> u8 {
        self.stage_caps
            .iter()
            .find(|entry| entry.stage == stage)
            .map(|entry| entry.cap)
            .unwrap_or(self.default_stage_cap)
            .min(100)
    }

    /// Seconds added to a server duration hint to cover map and report rendering.
    pub fn end_stage_allowance(&self, area_sq_miles: Option<f64>, peak_density: Option<u64>) -> f64 {
        match (area_sq_miles, peak_density) {
            (Some(area), Some(density)) => {
                step_lookup(&self.area_steps, self.area_beyond_seconds, area)
                    + step_lookup(&self.density_steps, self.density_beyond_seconds, density as f64)
            }
            (Some(area), None) => step_lookup(&self.area_steps, self.area_beyond_seconds, area),
            (None, _) => self.flat_allowance_seconds,
        }
    }

    fn is_bellwether(&self, category: &str) -> bool {
        self.bellwether_categories
            .iter()
            .any(|known| known.eq_ignore_ascii_case(category))
    }
}

fn step_lookup(steps: &[AllowanceStep], beyond: f64, value: f64) -> f64 {
    steps
        .iter()
        .find(|step| value < step.below)
        .map(|step| step.seconds)
        .unwrap_or(beyond)
}

/// Cosmetic messages, each used once before any repeats.
#[derive(Debug, Clone)]
pub struct FillerRotation {
    pool: Vec<String>,
    queue: Vec<String>,
    last: Option<String>,
    rng: StdRng,
}

impl FillerRotation {
    pub fn new(pool: Vec<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            pool,
            queue: Vec::new(),
            last: None,
            rng,
        }
    }

    pub fn next_message(&mut self) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }
        if self.queue.is_empty() {
            self.queue = self.pool.clone();
            self.queue.shuffle(&mut self.rng);
            // Avoid repeating across the refill boundary.
            if self.queue.len() > 1 && self.queue.last() == self.last.as_ref() {
                let end = self.queue.len() - 1;
                self.queue.swap(0, end);
            }
        }
        let next = self.queue.pop();
        self.last = next.clone();
        next
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    settings: EstimatorSettings,
    started_at: Instant,
    estimated_total_seconds: f64,
    displayed_percent: u8,
    stage: Stage,
    area_sq_miles: Option<f64>,
    peak_density: Option<u64>,
    message: String,
    filler: FillerRotation,
    last_rotation: Instant,
    finished: bool,
}

impl ProgressEstimator {
    pub fn new(settings: &EstimatorSettings, started_at: Instant, area_hint: Option<f64>) -> Self {
        Self {
            settings: settings.clone(),
            started_at,
            estimated_total_seconds: settings.initial_total_seconds,
            displayed_percent: 0,
            stage: Stage::Upload,
            area_sq_miles: area_hint,
            peak_density: None,
            message: "Uploading input...".to_string(),
            filler: FillerRotation::new(settings.filler_messages.clone(), settings.filler_seed),
            last_rotation: started_at,
            finished: false,
        }
    }

    /// Folds one stream event into the estimate. Call before the tick of
    /// the same turn so the tick sees the revised total.
    pub fn observe(&mut self, event: &ProgressEvent, now: Instant) {
        if !event.stage.is_terminal() && event.stage != self.stage {
            self.stage = event.stage;
            self.last_rotation = now;
        }
        if let Some(area) = event.input_area_sq_miles.filter(|a| a.is_finite() && *a >= 0.0) {
            self.area_sq_miles = Some(area);
        }
        if let Some(sample) = &event.density_sample {
            if self.settings.is_bellwether(&sample.category) {
                let peak = self.peak_density.unwrap_or(0).max(sample.feature_count);
                self.peak_density = Some(peak);
            }
        }
        if let Some(hint) = event
            .estimated_total_seconds
            .filter(|h| h.is_finite() && *h > 0.0)
        {
            let allowance = self
                .settings
                .end_stage_allowance(self.area_sq_miles, self.peak_density);
            self.estimated_total_seconds = hint + allowance;
            job_debug!(
                "Revised total estimate to {:.1}s (hint {:.1}s + allowance {:.1}s)",
                self.estimated_total_seconds,
                hint,
                allowance
            );
        }
        if !event.message.is_empty() {
            self.message = match (event.layer_index, event.layer_total) {
                (Some(index), Some(total)) => format!("{} ({index}/{total})", event.message),
                _ => event.message.clone(),
            };
        }
    }

    /// Advances the displayed percentage for `now` and returns it.
    pub fn tick(&mut self, now: Instant) -> u8 {
        if self.finished {
            return self.displayed_percent;
        }
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let raw = if self.estimated_total_seconds > 0.0 {
            (elapsed / self.estimated_total_seconds * 100.0).floor()
        } else {
            0.0
        };
        let cap = self.settings.stage_cap(self.stage);
        let raw = raw.clamp(0.0, f64::from(cap)) as u8;
        self.displayed_percent = self.displayed_percent.max(raw);

        let interval = self.settings.rotation_interval();
        if self.stage == Stage::Querying
            && now.saturating_duration_since(self.last_rotation) >= interval
        {
            if let Some(message) = self.filler.next_message() {
                self.message = message;
            }
            self.last_rotation = now;
        }
        self.displayed_percent
    }

    /// Terminal success: pin the display at 100.
    pub fn complete(&mut self) {
        self.finished = true;
        self.displayed_percent = 100;
    }

    pub fn displayed_percent(&self) -> u8 {
        self.displayed_percent
    }

    pub fn estimated_total_seconds(&self) -> f64 {
        self.estimated_total_seconds
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowance_falls_back_without_signals() {
        let settings = EstimatorSettings::default();
        assert_eq!(settings.end_stage_allowance(None, Some(50_000)), 20.0);
        assert_eq!(settings.end_stage_allowance(Some(0.5), None), 8.0);
        assert_eq!(settings.end_stage_allowance(Some(20.0), Some(2_000)), 50.0);
        assert_eq!(settings.end_stage_allowance(Some(1_000.0), Some(90_000)), 130.0);
    }

    #[test]
    fn allowance_grows_with_size_and_density() {
        let settings = EstimatorSettings::default();
        let mut previous = 0.0;
        for area in [0.1, 5.0, 30.0, 100.0, 500.0] {
            let allowance = settings.end_stage_allowance(Some(area), Some(10));
            assert!(allowance >= previous);
            previous = allowance;
        }
        let mut previous = 0.0;
        for density in [10, 500, 2_000, 10_000, 40_000] {
            let allowance = settings.end_stage_allowance(Some(5.0), Some(density));
            assert!(allowance >= previous);
            previous = allowance;
        }
    }

    #[test]
    fn unknown_stages_use_default_cap() {
        let settings = EstimatorSettings::default();
        assert_eq!(settings.stage_cap(Stage::Querying), 80);
        assert_eq!(settings.stage_cap(Stage::Unknown), 95);
    }

    #[test]
    fn filler_does_not_repeat_until_pool_exhausted() {
        let pool: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
        let mut rotation = FillerRotation::new(pool.clone(), Some(7));
        for _ in 0..4 {
            let mut seen: Vec<String> = (0..5).filter_map(|_| rotation.next_message()).collect();
            seen.sort();
            assert_eq!(seen, pool);
        }
    }

    #[test]
    fn filler_never_repeats_back_to_back() {
        let pool: Vec<String> = (0..3).map(|i| format!("m{i}")).collect();
        let mut rotation = FillerRotation::new(pool, Some(11));
        let mut previous = rotation.next_message();
        for _ in 0..60 {
            let next = rotation.next_message();
            assert_ne!(next, previous);
            previous = next;
        }
    }
}
