use std::io::{self, Write};

use mapjob_core::{AppViewModel, ResultLinks, UiState, SUPPORTED_EXTENSIONS};

const BAR_WIDTH: usize = 30;

/// Prints view changes to stdout. Processing redraws a single line in place;
/// every other screen is printed once when it is entered.
#[derive(Default)]
pub struct Renderer {
    last_screen: Option<&'static str>,
    progress_open: bool,
    notices: Vec<String>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, view: &AppViewModel) {
        let mut out = io::stdout().lock();
        let screen = view.ui.name();

        if let UiState::Processing(_) = view.ui {
            let line = match &view.progress {
                Some(progress) => progress_line(progress.percent, &progress.message),
                None => progress_line(0, "Starting..."),
            };
            let _ = write!(out, "\r{line:<100}");
            let _ = out.flush();
            self.progress_open = true;
            self.last_screen = Some(screen);
        } else {
            if self.progress_open {
                if let Some(progress) = &view.progress {
                    let _ = write!(out, "\r{:<100}", progress_line(progress.percent, &progress.message));
                }
                let _ = writeln!(out);
                self.progress_open = false;
            }
            if self.last_screen != Some(screen) {
                for line in screen_lines(view) {
                    let _ = writeln!(out, "{line}");
                }
                self.last_screen = Some(screen);
            }
        }

        for notice in notices(view) {
            if !self.notices.contains(&notice) {
                if self.progress_open {
                    let _ = writeln!(out);
                    self.progress_open = false;
                }
                let _ = writeln!(out, "{notice}");
                self.notices.push(notice);
            }
        }
        let _ = out.flush();
    }
}

pub fn progress_line(percent: u8, message: &str) -> String {
    let percent = percent.min(100);
    let filled = usize::from(percent) * BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%  {}",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        percent,
        message
    )
}

pub fn screen_lines(view: &AppViewModel) -> Vec<String> {
    match &view.ui {
        UiState::Upload => {
            let mut lines = vec![format!(
                "Ready. Choose a file ({}) or draw an area.",
                SUPPORTED_EXTENSIONS.join(", ")
            )];
            if let Some(err) = &view.input_error {
                lines.push(format!("Input rejected: {err}"));
            }
            lines
        }
        UiState::Draw { seed, .. } => match seed {
            Some(geometry) => vec![format!("Editing {} drawn feature(s).", geometry.features.len())],
            None => vec!["Drawing a new area.".to_string()],
        },
        UiState::Configure(draft) => {
            let mut lines = vec![format!(
                "Configured {}: buffer {} ft, clip {} mi",
                draft.input.label(),
                draft.config.buffer_distance_feet,
                draft.config.clip_buffer_miles
            )];
            if let Some(summary) = &draft.summary {
                let area = summary
                    .area_sq_miles
                    .map(|area| format!(", about {area:.2} sq mi"))
                    .unwrap_or_default();
                lines.push(format!("  {} feature(s){area}", summary.feature_count));
            }
            if draft.restored {
                lines.push("  Restored from the previous attempt; run `mapjob retry` to submit again.".to_string());
            }
            if let Some(err) = &view.input_error {
                lines.push(format!("Input rejected: {err}"));
            }
            lines
        }
        UiState::Processing(_) => Vec::new(),
        UiState::Complete {
            input_label,
            job_id,
            links,
        } => {
            let mut lines = vec![match job_id {
                Some(id) => format!("Complete: {input_label} (job {id})"),
                None => format!("Complete: {input_label}"),
            }];
            lines.extend(link_lines(links));
            lines
        }
        UiState::Error {
            message,
            rate_limited,
            ..
        } => {
            let mut lines = vec![format!("Failed: {message}")];
            if *rate_limited && view.offer_sign_in {
                lines.push("  Sign in (--user <id>) to keep running maps today.".to_string());
            }
            lines.push("  Run `mapjob retry` to try again with the same input.".to_string());
            lines
        }
    }
}

fn link_lines(links: &ResultLinks) -> Vec<String> {
    if links.is_empty() {
        return vec!["  No downloadable results.".to_string()];
    }
    [
        ("Archive", &links.archive_url),
        ("Map", &links.map_url),
        ("PDF", &links.pdf_url),
        ("Spreadsheet", &links.spreadsheet_url),
    ]
    .iter()
    .filter_map(|(label, link)| link.as_ref().map(|url| format!("  {label}: {url}")))
    .collect()
}

fn notices(view: &AppViewModel) -> Vec<String> {
    let mut notices = Vec::new();
    if view.claim_prompt_visible {
        notices.push("Sign in (--user <id>) to save this map to your account.".to_string());
    }
    if let Some(notification) = &view.notification {
        notices.push(notification.clone());
    }
    if let Some(alert) = &view.alert {
        notices.push(format!("Alert: {alert}"));
    }
    notices
}
