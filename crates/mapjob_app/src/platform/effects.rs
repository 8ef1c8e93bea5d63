use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use mapjob_core::{Effect, Msg};
use mapjob_engine::{EngineEvent, EngineHandle};
use mapjob_logging::{job_debug, job_info, short_id};

/// Executes controller effects and turns engine results back into messages.
pub struct EffectRunner {
    engine: EngineHandle,
    msg_tx: mpsc::Sender<Msg>,
    outstanding: usize,
}

impl EffectRunner {
    pub fn new(engine: EngineHandle, msg_tx: mpsc::Sender<Msg>) -> Self {
        Self {
            engine,
            msg_tx,
            outstanding: 0,
        }
    }

    pub fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.outstanding += 1;
            match effect {
                Effect::SubmitJob { token, request } => {
                    job_info!(
                        "SubmitJob token={} input={} bytes={}",
                        token,
                        request.input.name,
                        request.input.bytes.len()
                    );
                    self.engine.submit(token, request);
                }
                Effect::ScheduleClaimPrompt { job_id, delay } => {
                    let msg_tx = self.msg_tx.clone();
                    thread::spawn(move || {
                        thread::sleep(delay);
                        let _ = msg_tx.send(Msg::ClaimPromptDue { job_id });
                    });
                }
                Effect::ClaimJobs { user_id, job_ids } => {
                    job_info!("ClaimJobs user={} count={}", short_id(&user_id), job_ids.len());
                    self.engine.claim(user_id, job_ids);
                }
                Effect::Download { url } => {
                    job_info!("Download url={}", url);
                    self.engine.download(url);
                }
            }
        }
    }

    /// Next engine result as a controller message, if one is ready.
    pub fn poll(&mut self) -> Option<Msg> {
        loop {
            let event = self.engine.try_recv()?;
            if let Some(msg) = self.translate(event) {
                return Some(msg);
            }
        }
    }

    /// Called when a scheduled message has been delivered.
    pub fn timer_fired(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// True while a submitted job, claim, download or timer has not reported back.
    pub fn is_busy(&self) -> bool {
        self.outstanding > 0
    }

    fn translate(&mut self, event: EngineEvent) -> Option<Msg> {
        match event {
            EngineEvent::Progress { token, event } => Some(Msg::JobProgress {
                token,
                event,
                now: Instant::now(),
            }),
            EngineEvent::JobCompleted { token, outcome } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                Some(Msg::JobFinished {
                    token,
                    outcome,
                    now: Utc::now(),
                })
            }
            EngineEvent::ClaimCompleted { result } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                Some(Msg::ClaimFinished {
                    result: result.map_err(|err| err.to_string()),
                })
            }
            EngineEvent::DownloadCompleted { result } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                Some(Msg::DownloadFinished { result })
            }
            EngineEvent::StatusReported { .. } => {
                job_debug!("Ignoring status report outside the status command");
                None
            }
        }
    }
}
