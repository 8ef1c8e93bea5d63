//! Offline stand-in for the processing service.
//!
//! Used when no API URL is configured. Frames are encoded and then fed
//! through the same decoder a live stream goes through.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use mapjob_core::{
    DensitySample, DrawnGeometry, EstimatorSettings, JobRequest, Stage, TerminalOutcome,
    DRAWN_FILENAME,
};
use mapjob_logging::{job_info, job_warn};
use rand::Rng;

use crate::backend::{JobBackend, ProgressSink};
use crate::sse::{consume, WireFrame};
use crate::{BackendError, DownloadedFile, HealthStatus, RateLimitStatus};

const LOCAL_RUNS_PER_DAY: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    step_delay: Duration,
    bellwethers: Vec<String>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(Duration::from_millis(400))
    }
}

impl SimulatedBackend {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            bellwethers: EstimatorSettings::default().bellwether_categories,
        }
    }

    /// The scripted run for `request`, ending in a `complete` frame.
    pub fn script(&self, request: &JobRequest, job_id: &str) -> Vec<WireFrame> {
        let area = drawn_area(request);
        let step_secs = self.step_delay.as_secs_f64();
        let layer_total = self.bellwethers.len() as u32;
        // Upload, geometry, one frame per layer, then map, report, complete.
        let total_steps = f64::from(layer_total) + 5.0;

        let mut frames = vec![
            WireFrame {
                progress: Some(5.0),
                job_id: Some(job_id.to_string()),
                ..WireFrame::new(Stage::Upload, "File received, starting processing...")
            },
            WireFrame {
                progress: Some(10.0),
                input_area_sq_miles: area,
                ..WireFrame::new(Stage::Geometry, "Processing input geometry...")
            },
        ];
        for (index, category) in self.bellwethers.iter().enumerate() {
            let done = index as u32 + 1;
            frames.push(WireFrame {
                progress: Some(10.0 + 70.0 * f64::from(done) / f64::from(layer_total.max(1))),
                layer_index: Some(done),
                layer_total: Some(layer_total),
                estimated_total_seconds: Some(total_steps * step_secs),
                density_sample: Some(DensitySample {
                    category: category.clone(),
                    feature_count: 40 * u64::from(done),
                }),
                ..WireFrame::new(Stage::Querying, format!("Querying {}", category.replace('_', " ")))
            });
        }
        frames.push(WireFrame {
            progress: Some(85.0),
            ..WireFrame::new(Stage::Map, "Rendering map...")
        });
        frames.push(WireFrame {
            progress: Some(95.0),
            ..WireFrame::new(Stage::Report, "Generating reports...")
        });
        frames.push(WireFrame {
            progress: Some(100.0),
            job_id: Some(job_id.to_string()),
            ..WireFrame::new(Stage::Complete, "Processing complete!")
        });
        frames
    }
}

fn drawn_area(request: &JobRequest) -> Option<f64> {
    if request.input.name != DRAWN_FILENAME {
        return None;
    }
    let text = std::str::from_utf8(&request.input.bytes).ok()?;
    match DrawnGeometry::from_geojson(text) {
        Ok(geometry) => geometry.summary().area_sq_miles,
        Err(err) => {
            job_warn!("Simulated run could not read drawn geometry: {}", err);
            None
        }
    }
}

fn local_job_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("local-{suffix:08x}")
}

#[async_trait::async_trait]
impl JobBackend for SimulatedBackend {
    async fn submit(&self, request: &JobRequest, sink: &dyn ProgressSink) -> TerminalOutcome {
        let job_id = local_job_id();
        job_info!("Simulating job {} for {}", job_id, request.input.name);
        let delay = self.step_delay;
        let chunks = self
            .script(request, &job_id)
            .into_iter()
            .map(|frame| frame.to_sse())
            .collect::<Vec<_>>();
        let stream = stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Infallible>(Bytes::from(chunk))
        });
        match consume(stream, |event| sink.emit(event)).await {
            Ok(outcome) => outcome,
            Err(err) => TerminalOutcome::failed(err.to_string()),
        }
    }

    async fn claim(&self, user_id: &str, job_ids: &[String]) -> Result<u32, BackendError> {
        job_info!("Simulated claim of {} job(s) for {}", job_ids.len(), user_id);
        Ok(job_ids.len() as u32)
    }

    async fn download(&self, _url: &str) -> Result<DownloadedFile, BackendError> {
        Err(BackendError::Unsupported(
            "Downloads are not available in local simulation mode".to_string(),
        ))
    }

    async fn rate_limit(&self) -> Result<RateLimitStatus, BackendError> {
        Ok(RateLimitStatus {
            remaining_runs: LOCAL_RUNS_PER_DAY,
            max_runs_per_day: LOCAL_RUNS_PER_DAY,
            resets_at: "never (local simulation)".to_string(),
        })
    }

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            service: "local-simulation".to_string(),
        })
    }
}
