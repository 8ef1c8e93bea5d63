use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;

use mapjob_core::{JobRequest, JobToken, ProgressEvent};
use mapjob_logging::{job_debug, job_error, job_info, short_id};

use crate::backend::{JobBackend, ProgressSink};
use crate::persist::AtomicFileWriter;
use crate::EngineEvent;

enum EngineCommand {
    Submit { token: JobToken, request: JobRequest },
    Claim { user_id: String, job_ids: Vec<String> },
    Download { url: String },
    Status,
}

/// Forwards a job's progress events to the host, tagged with its token.
pub struct ChannelProgressSink {
    token: JobToken,
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(token: JobToken, tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { token, tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(EngineEvent::Progress {
            token: self.token,
            event,
        });
    }
}

/// Runs backend work on a tokio runtime owned by a background thread.
///
/// Commands are fire-and-forget; results come back as [`EngineEvent`]s.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    pub fn new(backend: Arc<dyn JobBackend>, download_dir: PathBuf) -> io::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let runtime = tokio::runtime::Runtime::new()?;
        let writer = AtomicFileWriter::new(download_dir);

        thread::Builder::new()
            .name("mapjob-engine".to_string())
            .spawn(move || {
                while let Ok(command) = cmd_rx.recv() {
                    let backend = backend.clone();
                    let event_tx = event_tx.clone();
                    let writer = writer.clone();
                    runtime.spawn(async move {
                        handle_command(backend.as_ref(), &writer, command, event_tx).await;
                    });
                }
                job_debug!("Engine command channel closed");
            })?;

        Ok(Self { cmd_tx, event_rx })
    }

    pub fn submit(&self, token: JobToken, request: JobRequest) {
        let _ = self.cmd_tx.send(EngineCommand::Submit { token, request });
    }

    pub fn claim(&self, user_id: String, job_ids: Vec<String>) {
        let _ = self.cmd_tx.send(EngineCommand::Claim { user_id, job_ids });
    }

    pub fn download(&self, url: impl Into<String>) {
        let _ = self.cmd_tx.send(EngineCommand::Download { url: url.into() });
    }

    pub fn request_status(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Status);
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

async fn handle_command(
    backend: &dyn JobBackend,
    writer: &AtomicFileWriter,
    command: EngineCommand,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::Submit { token, request } => {
            job_info!("Submitting job {} ({})", token, request.input.name);
            let sink = ChannelProgressSink::new(token, event_tx.clone());
            let outcome = backend.submit(&request, &sink).await;
            let _ = event_tx.send(EngineEvent::JobCompleted { token, outcome });
        }
        EngineCommand::Claim { user_id, job_ids } => {
            job_info!("Claiming {} job(s) for user {}", job_ids.len(), short_id(&user_id));
            let result = backend.claim(&user_id, &job_ids).await;
            let _ = event_tx.send(EngineEvent::ClaimCompleted { result });
        }
        EngineCommand::Download { url } => {
            let result = match backend.download(&url).await {
                Ok(file) => writer
                    .write(&file.filename, &file.bytes)
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match &result {
                Ok(path) => job_info!("Saved download to {}", path.display()),
                Err(err) => job_error!("Download of {} failed: {}", url, err),
            }
            let _ = event_tx.send(EngineEvent::DownloadCompleted { result });
        }
        EngineCommand::Status => {
            let rate_limit = backend.rate_limit().await;
            let health = backend.health().await;
            let _ = event_tx.send(EngineEvent::StatusReported { rate_limit, health });
        }
    }
}
