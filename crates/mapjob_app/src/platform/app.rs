use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use mapjob_core::{
    update, AppState, DrawnFeature, DrawnGeometry, GeometrySummary, Msg, Storage, UiState,
    UploadedFile,
};
use mapjob_engine::{BackendSettings, EngineEvent, EngineHandle, HttpBackend, JobBackend, SimulatedBackend};
use mapjob_logging::{job_info, job_warn};

use super::effects::EffectRunner;
use super::persistence::{load_settings, FileStore, NAVIGATION_SCOPE_FILE, SESSION_SCOPE_FILE};
use super::render::Renderer;
use crate::{Cli, Command};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run(cli: Cli) -> Result<()> {
    fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating data directory {}", cli.data_dir.display()))?;
    let settings = load_settings(&cli.data_dir);

    let backend: Arc<dyn JobBackend> = match &cli.api_url {
        Some(url) => Arc::new(
            HttpBackend::new(BackendSettings::new(url.clone())).context("building HTTP client")?,
        ),
        None => {
            job_info!("No API URL configured; running jobs in local simulation");
            Arc::new(SimulatedBackend::default())
        }
    };
    let engine = EngineHandle::new(backend, cli.download_dir.clone()).context("starting engine")?;

    if let Command::Status = cli.command {
        return report_status(&engine);
    }

    let storage = Storage::new(
        Box::new(FileStore::new(&cli.data_dir, SESSION_SCOPE_FILE)),
        Box::new(FileStore::new(&cli.data_dir, NAVIGATION_SCOPE_FILE)),
        &settings,
    );
    let tick_interval = settings.estimator.tick_interval();
    let (msg_tx, msg_rx) = mpsc::channel::<Msg>();
    let mut session = Session {
        state: AppState::new(storage, settings),
        runner: EffectRunner::new(engine, msg_tx.clone()),
        renderer: Renderer::new(),
    };

    session.dispatch(Msg::Mounted {
        now: Utc::now(),
        reset_requested: matches!(cli.command, Command::Reset),
    });
    if let Some(user) = &cli.user {
        session.dispatch(Msg::AuthChanged {
            user_id: Some(user.clone()),
            now: Utc::now(),
        });
    }

    let download = match &cli.command {
        Command::Run { file, job } => {
            let (file, summary) = read_input(file)?;
            session.leave_terminal();
            session.dispatch(Msg::FileChosen { file, summary });
            session.expect_configure()?;
            session.dispatch(Msg::ConfigEdited(job.config()));
            session.dispatch(Msg::RunRequested { now: Instant::now() });
            job.download
        }
        Command::Draw {
            polygons,
            lines,
            points,
            job,
        } => {
            let geometry = build_geometry(polygons, lines, points)?;
            session.leave_terminal();
            session.dispatch(Msg::DrawRequested);
            session.dispatch(Msg::GeometryConfirmed(geometry));
            session.expect_configure()?;
            session.dispatch(Msg::ConfigEdited(job.config()));
            session.dispatch(Msg::RunRequested { now: Instant::now() });
            job.download
        }
        Command::Retry { download } => {
            if matches!(session.state.ui(), UiState::Error { .. }) {
                session.dispatch(Msg::RetryClicked);
            }
            if !matches!(session.state.ui(), UiState::Configure(_)) {
                bail!("nothing to retry; the last failed input is gone or has expired");
            }
            session.dispatch(Msg::RunRequested { now: Instant::now() });
            *download
        }
        Command::Show { download } => *download,
        Command::Claim => {
            if cli.user.is_none() {
                bail!("claiming needs --user");
            }
            false
        }
        Command::Reset | Command::Status => false,
    };

    spawn_ticker(msg_tx, tick_interval);
    session.settle(&msg_rx, download);

    match session.state.ui() {
        UiState::Error { message, .. } => Err(anyhow!("job failed: {message}")),
        _ => Ok(()),
    }
}

struct Session {
    state: AppState,
    runner: EffectRunner,
    renderer: Renderer,
}

impl Session {
    fn dispatch(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (mut state, effects) = update(state, msg);
        if state.consume_dirty() {
            self.renderer.render(&state.view());
        }
        self.state = state;
        self.runner.run(effects);
    }

    /// A restored outcome screen does not accept new input.
    fn leave_terminal(&mut self) {
        if self.state.ui().is_terminal() {
            self.dispatch(Msg::StartOverClicked);
        }
    }

    fn expect_configure(&self) -> Result<()> {
        if matches!(self.state.ui(), UiState::Configure(_)) {
            return Ok(());
        }
        let reason = self
            .state
            .view()
            .input_error
            .unwrap_or_else(|| "input was not accepted".to_string());
        bail!(reason)
    }

    /// Pumps messages until no job, claim, download or timer is outstanding.
    fn settle(&mut self, msg_rx: &mpsc::Receiver<Msg>, download: bool) {
        let mut download_requested = false;
        loop {
            while let Some(msg) = self.runner.poll() {
                self.dispatch(msg);
            }
            match msg_rx.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => {
                    if matches!(msg, Msg::ClaimPromptDue { .. }) {
                        self.runner.timer_fired();
                    }
                    self.dispatch(msg);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if download && !download_requested {
                if let UiState::Complete { links, .. } = self.state.ui() {
                    download_requested = true;
                    match links.archive_url.clone() {
                        Some(url) => self.dispatch(Msg::DownloadRequested { url }),
                        None => job_warn!("Completed job has no archive to download"),
                    }
                }
            }

            let processing = matches!(self.state.ui(), UiState::Processing(_));
            if !processing && !self.runner.is_busy() {
                break;
            }
        }
    }
}

fn spawn_ticker(msg_tx: mpsc::Sender<Msg>, interval: Duration) {
    thread::spawn(move || {
        while msg_tx.send(Msg::Tick { now: Instant::now() }).is_ok() {
            thread::sleep(interval);
        }
    });
}

fn read_input(path: &Path) -> Result<(UploadedFile, Option<GeometrySummary>)> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
        .to_string();
    let summary = geojson_summary(&name, &bytes);
    Ok((UploadedFile::new(name, bytes), summary))
}

/// Summarizes GeoJSON uploads that use the simple shapes the drawing tool emits.
fn geojson_summary(name: &str, bytes: &[u8]) -> Option<GeometrySummary> {
    let lower = name.to_ascii_lowercase();
    if !(lower.ends_with(".geojson") || lower.ends_with(".json")) {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    DrawnGeometry::from_geojson(text)
        .ok()
        .filter(|geometry| !geometry.is_empty())
        .map(|geometry| geometry.summary())
}

fn build_geometry(polygons: &[String], lines: &[String], points: &[String]) -> Result<DrawnGeometry> {
    let mut features = Vec::new();
    for text in polygons {
        features.push(DrawnFeature::polygon(parse_coords(text)?));
    }
    for text in lines {
        features.push(DrawnFeature::line(parse_coords(text)?));
    }
    for text in points {
        let coords = parse_coords(text)?;
        let [lon, lat] = match coords.as_slice() {
            [single] => *single,
            _ => bail!("a point takes exactly one coordinate pair: {text}"),
        };
        features.push(DrawnFeature::point(lon, lat));
    }
    Ok(DrawnGeometry::new(features))
}

/// Parses `lon,lat;lon,lat;...`.
fn parse_coords(text: &str) -> Result<Vec<[f64; 2]>> {
    text.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (lon, lat) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("expected lon,lat but got {pair:?}"))?;
            let lon: f64 = lon.trim().parse().with_context(|| format!("bad longitude in {pair:?}"))?;
            let lat: f64 = lat.trim().parse().with_context(|| format!("bad latitude in {pair:?}"))?;
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                bail!("coordinate out of range: {pair:?}");
            }
            Ok([lon, lat])
        })
        .collect()
}

fn report_status(engine: &EngineHandle) -> Result<()> {
    engine.request_status();
    let deadline = Instant::now() + STATUS_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(EngineEvent::StatusReported { rate_limit, health }) =
            engine.recv_timeout(POLL_INTERVAL)
        {
            match health {
                Ok(health) => println!("Service: {} ({})", health.status, health.service),
                Err(err) => println!("Service: unreachable ({err})"),
            }
            match rate_limit {
                Ok(limit) => println!(
                    "Runs left today: {} of {} (resets {})",
                    limit.remaining_runs, limit.max_runs_per_day, limit.resets_at
                ),
                Err(err) => println!("Rate limit: unknown ({err})"),
            }
            return Ok(());
        }
    }
    bail!("no status response within {}s", STATUS_TIMEOUT.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_parse_with_whitespace() {
        assert_eq!(
            parse_coords(" -105.0,39.5; -104.9 , 39.6 ;").unwrap(),
            vec![[-105.0, 39.5], [-104.9, 39.6]]
        );
    }

    #[test]
    fn bad_coordinates_are_rejected() {
        assert!(parse_coords("1;2").is_err());
        assert!(parse_coords("200,10").is_err());
        assert!(parse_coords("a,b").is_err());
    }

    #[test]
    fn geometry_combines_all_kinds() {
        let geometry = build_geometry(
            &["-105,39;-104,39;-104,40".to_string()],
            &["-105,39;-104,40".to_string()],
            &["-104.5,39.5".to_string()],
        )
        .unwrap();
        assert_eq!(geometry.features.len(), 3);
        assert!(build_geometry(&[], &[], &["1,1;2,2".to_string()]).is_err());
    }

    #[test]
    fn only_geojson_names_get_a_summary() {
        let text = DrawnGeometry::new(vec![DrawnFeature::point(-120.0, 38.0)]).to_geojson();
        assert!(geojson_summary("area.geojson", text.as_bytes()).is_some());
        assert!(geojson_summary("area.kml", text.as_bytes()).is_none());
    }
}
