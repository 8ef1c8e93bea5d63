use std::time::Duration;

use mapjob_core::{JobRequest, ProgressEvent, ResultLinks, TerminalOutcome};
use mapjob_logging::{job_debug, job_info, job_warn};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::disposition::download_filename;
use crate::sse::consume;
use crate::{BackendError, DownloadedFile, HealthStatus, RateLimitStatus};

const RATE_LIMIT_FALLBACK: &str = "Rate limit exceeded";

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base of the processing service, e.g. `https://api.example.com` or
    /// `https://host/peit`; endpoints are joined under its path.
    pub api_url: Url,
    pub connect_timeout: Duration,
    /// Hard ceiling on one request including its whole progress stream.
    pub request_timeout: Option<Duration>,
}

impl BackendSettings {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(15 * 60)),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Where jobs run. Network and parse failures of a submission come back as
/// a failed outcome, never as an error.
#[async_trait::async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit(&self, request: &JobRequest, sink: &dyn ProgressSink) -> TerminalOutcome;

    /// Returns how many of `job_ids` the service transferred to `user_id`.
    async fn claim(&self, user_id: &str, job_ids: &[String]) -> Result<u32, BackendError>;

    async fn download(&self, url: &str) -> Result<DownloadedFile, BackendError>;

    async fn rate_limit(&self) -> Result<RateLimitStatus, BackendError>;

    async fn health(&self) -> Result<HealthStatus, BackendError>;
}

#[derive(Serialize)]
struct ClaimRequest<'a> {
    user_id: &'a str,
    job_ids: &'a [String],
}

#[derive(Deserialize)]
struct ClaimResponse {
    claimed: u32,
}

/// Error bodies come as `{"detail": ...}` or `{"message": ...}`.
#[derive(Deserialize, Default)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn text(&self) -> Option<String> {
        let detail = self.detail.as_ref().map(|value| match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        });
        detail
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    settings: BackendSettings,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder().connect_timeout(settings.connect_timeout);
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| BackendError::Network(err.to_string()))?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// Joins `path` under the configured API URL, keeping any path prefix
    /// such as `https://host/peit/`.
    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        let mut base = self.settings.api_url.clone();
        if !base.path().ends_with('/') {
            let prefixed = format!("{}/", base.path());
            base.set_path(&prefixed);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|err| BackendError::InvalidUrl(err.to_string()))
    }

    /// Resolves a result link that may be relative to the API URL.
    pub fn resolve_link(&self, link: &str) -> Result<Url, BackendError> {
        match Url::parse(link) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.endpoint(link),
            Err(err) => Err(BackendError::InvalidUrl(err.to_string())),
        }
    }

    fn resolve_links(&self, links: ResultLinks) -> ResultLinks {
        let resolve = |link: Option<String>| {
            link.map(|link| match self.resolve_link(&link) {
                Ok(url) => url.to_string(),
                Err(err) => {
                    job_warn!("Keeping unresolvable result link {}: {}", link, err);
                    link
                }
            })
        };
        ResultLinks {
            archive_url: resolve(links.archive_url),
            map_url: resolve(links.map_url),
            pdf_url: resolve(links.pdf_url),
            spreadsheet_url: resolve(links.spreadsheet_url),
        }
    }

    async fn open_stream(&self, request: &JobRequest) -> Result<Response, BackendError> {
        let part = Part::bytes(request.input.bytes.clone()).file_name(request.input.name.clone());
        let config = &request.config;
        let form = Form::new()
            .part("file", part)
            .text("project_name", config.project_name.clone())
            .text("project_id", config.project_id.clone())
            .text("buffer_distance_feet", config.buffer_distance_feet.to_string())
            .text("clip_buffer_miles", config.clip_buffer_miles.to_string());
        self.client
            .post(self.endpoint("/api/process")?)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let response = self
            .client
            .get(self.endpoint(path)?)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))
    }
}

#[async_trait::async_trait]
impl JobBackend for HttpBackend {
    async fn submit(&self, request: &JobRequest, sink: &dyn ProgressSink) -> TerminalOutcome {
        let response = match self.open_stream(request).await {
            Ok(response) => response,
            Err(err) => {
                job_warn!("Submission of {} failed: {}", request.input.name, err);
                return TerminalOutcome::failed(err.to_string());
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            let message = body
                .message
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| RATE_LIMIT_FALLBACK.to_string());
            job_info!("Submission rate limited: {}", message);
            return TerminalOutcome::RateLimited { message };
        }
        if !status.is_success() {
            let err = status_error(response).await;
            job_warn!("Submission rejected: {}", err);
            return TerminalOutcome::failed(err.to_string());
        }

        match consume(response.bytes_stream(), |event| sink.emit(event)).await {
            Ok(TerminalOutcome::Succeeded(mut success)) => {
                success.links = self.resolve_links(success.links);
                TerminalOutcome::Succeeded(success)
            }
            Ok(outcome) => outcome,
            Err(err) => {
                job_warn!("Progress stream broke: {}", err);
                TerminalOutcome::failed(err.to_string())
            }
        }
    }

    async fn claim(&self, user_id: &str, job_ids: &[String]) -> Result<u32, BackendError> {
        let response = self
            .client
            .post(self.endpoint("/api/claim-jobs")?)
            .json(&ClaimRequest { user_id, job_ids })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = ensure_success(response).await?;
        let body: ClaimResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        Ok(body.claimed)
    }

    async fn download(&self, url: &str) -> Result<DownloadedFile, BackendError> {
        let url = self.resolve_link(url)?;
        job_debug!("Downloading {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = ensure_success(response).await?;
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let filename = download_filename(disposition.as_deref(), url.as_str());
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(DownloadedFile {
            filename,
            bytes: bytes.to_vec(),
        })
    }

    async fn rate_limit(&self) -> Result<RateLimitStatus, BackendError> {
        self.get_json("/api/rate-limit").await
    }

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        self.get_json("/api/health").await
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

async fn status_error(response: Response) -> BackendError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let detail = body.text().unwrap_or_else(|| status.to_string());
    BackendError::Status {
        status: status.as_u16(),
        detail,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        return BackendError::Timeout;
    }
    BackendError::Network(err.to_string())
}
