//! Progress stream decoding.
//!
//! The processing service answers a submission with server-sent events:
//! each frame is one JSON object on a `data:` line, frames are separated by
//! a blank line, and the stream ends after a `complete` or `error` frame.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use mapjob_core::{DensitySample, JobSuccess, ProgressEvent, ResultLinks, Stage, TerminalOutcome};
use mapjob_logging::{job_debug, job_trace, job_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INCOMPLETE_STREAM_MESSAGE: &str = "Stream ended without completion";
const GENERIC_FAILURE_MESSAGE: &str = "Processing failed";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    #[error("stream read failed: {0}")]
    Transport(String),
}

/// One frame as the service writes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireFrame {
    pub stage: Stage,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xlsx_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_total_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_area_sq_miles: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density_sample: Option<DensitySample>,
}

impl WireFrame {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent {
            stage: self.stage,
            message: self.message.clone(),
            progress_hint: self.progress,
            layer_index: self.layer_index,
            layer_total: self.layer_total,
            estimated_total_seconds: self.estimated_total_seconds,
            input_area_sq_miles: self.input_area_sq_miles,
            density_sample: self.density_sample.clone(),
            error_detail: self.error.clone(),
        }
    }

    /// The job's outcome if this is a terminal frame.
    pub fn outcome(&self) -> Option<TerminalOutcome> {
        match self.stage {
            Stage::Complete => Some(TerminalOutcome::Succeeded(JobSuccess {
                job_id: self.job_id.clone(),
                links: ResultLinks {
                    archive_url: self.download_url.clone(),
                    map_url: self.map_url.clone(),
                    pdf_url: self.pdf_url.clone(),
                    spreadsheet_url: self.xlsx_url.clone(),
                },
            })),
            Stage::Error => {
                let message = self
                    .error
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .or_else(|| Some(self.message.clone()).filter(|text| !text.trim().is_empty()))
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
                Some(TerminalOutcome::failed(message))
            }
            _ => None,
        }
    }

    /// Serializes as one `data:` frame including its blank-line terminator.
    pub fn to_sse(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {json}\n\n"),
            Err(err) => {
                job_warn!("Failed to encode frame: {}", err);
                String::new()
            }
        }
    }
}

/// Splits a byte stream into frames, tolerating frames cut across chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WireFrame> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));
        let mut frames = Vec::new();
        while let Some(end) = find_separator(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&raw[..end]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parses whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<WireFrame> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        parse_frame(&rest)
    }
}

fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_frame(raw: &[u8]) -> Option<WireFrame> {
    let text = String::from_utf8_lossy(raw);
    let mut payload = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            payload.push(data.strip_prefix(' ').unwrap_or(data));
        } else if ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
        {
            continue;
        } else {
            payload.push(line);
        }
    }
    if payload.is_empty() {
        return None;
    }
    let json = payload.join("\n");
    match serde_json::from_str::<WireFrame>(&json) {
        Ok(frame) => Some(frame),
        Err(err) => {
            job_debug!("Dropping malformed frame ({}): {}", err, json);
            None
        }
    }
}

/// Reads `stream` to its terminal frame, handing each event to `on_event`
/// in arrival order. The terminal frame's event is delivered too.
pub async fn consume<S, E, F>(stream: S, mut on_event: F) -> Result<TerminalOutcome, ConsumerError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
    F: FnMut(ProgressEvent),
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = FrameDecoder::new();
    let mut delivered = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| ConsumerError::Transport(err.to_string()))?;
        for frame in decoder.push(&chunk) {
            delivered += 1;
            if let Some(outcome) = deliver(&frame, &mut on_event) {
                return Ok(outcome);
            }
        }
    }
    if let Some(frame) = decoder.finish() {
        delivered += 1;
        if let Some(outcome) = deliver(&frame, &mut on_event) {
            return Ok(outcome);
        }
    }

    job_warn!("Progress stream closed after {} frame(s) without a result", delivered);
    Ok(TerminalOutcome::failed(INCOMPLETE_STREAM_MESSAGE))
}

fn deliver<F: FnMut(ProgressEvent)>(frame: &WireFrame, on_event: &mut F) -> Option<TerminalOutcome> {
    job_trace!("Frame stage={} message={}", frame.stage, frame.message);
    on_event(frame.to_event());
    frame.outcome()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_split_across_chunks_is_reassembled() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"stage\":\"geom").is_empty());
        let frames = decoder.push(b"etry\",\"message\":\"Buffering\"}\n\ndata: {\"st");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stage, Stage::Geometry);
        assert_eq!(frames[0].message, "Buffering");
        let frames = decoder.push(b"age\":\"map\",\"message\":\"\"}\n\n");
        assert_eq!(frames[0].stage, Stage::Map);
    }

    #[test]
    fn crlf_comments_and_fields_are_tolerated() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(
            b": keep-alive\r\n\r\nevent: progress\r\nid: 4\r\ndata: {\"stage\":\"report\",\"message\":\"Writing\"}\r\n\r\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stage, Stage::Report);
    }

    #[test]
    fn unprefixed_lines_are_accepted() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"{\"stage\":\"upload\",\"message\":\"File received\"}\n\n");
        assert_eq!(frames[0].message, "File received");
    }

    #[test]
    fn malformed_frame_is_dropped_and_decoding_continues() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(
            b"data: {oops\n\ndata: {\"message\":\"no stage\"}\n\ndata: {\"stage\":\"querying\",\"message\":\"ok\"}\n\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stage, Stage::Querying);
    }

    #[test]
    fn trailing_frame_without_blank_line_is_flushed() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder
            .push(b"data: {\"stage\":\"complete\",\"message\":\"done\",\"job_id\":\"ab12cd34\"}\n")
            .is_empty());
        let frame = decoder.finish().expect("trailing frame");
        assert!(matches!(
            frame.outcome(),
            Some(TerminalOutcome::Succeeded(JobSuccess { job_id: Some(ref id), .. })) if id == "ab12cd34"
        ));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn unknown_stage_names_still_decode() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"stage\":\"tiling\",\"message\":\"Cutting tiles\"}\n\n");
        assert_eq!(frames[0].stage, Stage::Unknown);
        assert!(frames[0].outcome().is_none());
    }

    #[test]
    fn error_frame_prefers_error_field() {
        let frame = WireFrame {
            error: Some("Invalid geometry".to_string()),
            ..WireFrame::new(Stage::Error, "Something went wrong")
        };
        assert_eq!(frame.outcome(), Some(TerminalOutcome::failed("Invalid geometry")));
        let bare = WireFrame::new(Stage::Error, "");
        assert_eq!(bare.outcome(), Some(TerminalOutcome::failed("Processing failed")));
    }

    #[test]
    fn encoded_frame_decodes_to_itself() {
        let frame = WireFrame {
            layer_index: Some(3),
            layer_total: Some(12),
            estimated_total_seconds: Some(140.0),
            ..WireFrame::new(Stage::Querying, "Querying wetlands")
        };
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(frame.to_sse().as_bytes()), vec![frame]);
    }
}
