//! Hosted transcription adapters.
//!
//! Both hosted backends speak the same OpenAI-compatible
//! `audio/transcriptions` wire contract (multipart upload, `verbose_json`
//! with word granularity); only the endpoint descriptor differs. This
//! module is the only place that understands that response shape.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::backend::{group_words_into_segments, Engine};
use crate::error::{TsError, TsResult};
use crate::model::{BackendKind, TranscriptionResult, Word};
use crate::orchestrator::CancellationToken;
use crate::probe::{BATCH_KEY_ENV, REALTIME_KEY_ENV};

const DEFAULT_REALTIME_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_BATCH_BASE_URL: &str = "https://api.openai.com/v1";

/// Descriptor for one hosted endpoint. Pure data; both adapters share the
/// same code path.
#[derive(Debug, Clone)]
pub struct HostedEndpoint {
    pub kind: BackendKind,
    pub service_name: &'static str,
    pub base_url: String,
    pub api_key_env: &'static str,
    pub model: String,
}

pub struct HostedEngine {
    endpoint: HostedEndpoint,
}

impl HostedEngine {
    #[must_use]
    pub fn new(endpoint: HostedEndpoint) -> Self {
        Self { endpoint }
    }

    /// The low-latency hosted backend (20 MB ceiling).
    #[must_use]
    pub fn realtime() -> Self {
        Self::new(HostedEndpoint {
            kind: BackendKind::HostedRealtime,
            service_name: BackendKind::HostedRealtime.service_name(),
            base_url: std::env::var("TS_REALTIME_API_URL")
                .unwrap_or_else(|_| DEFAULT_REALTIME_BASE_URL.to_owned()),
            api_key_env: REALTIME_KEY_ENV,
            model: std::env::var("TS_REALTIME_MODEL")
                .unwrap_or_else(|_| "whisper-large-v3".to_owned()),
        })
    }

    /// The general hosted backend (25 MB ceiling).
    #[must_use]
    pub fn batch() -> Self {
        Self::new(HostedEndpoint {
            kind: BackendKind::HostedBatch,
            service_name: BackendKind::HostedBatch.service_name(),
            base_url: std::env::var("TS_BATCH_API_URL")
                .unwrap_or_else(|_| DEFAULT_BATCH_BASE_URL.to_owned()),
            api_key_env: BATCH_KEY_ENV,
            model: std::env::var("TS_BATCH_MODEL").unwrap_or_else(|_| "whisper-1".to_owned()),
        })
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(self.endpoint.api_key_env)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }
}

impl Engine for HostedEngine {
    fn name(&self) -> &'static str {
        self.endpoint.service_name
    }

    fn kind(&self) -> BackendKind {
        self.endpoint.kind
    }

    fn is_available(&self) -> bool {
        self.api_key().is_some()
    }

    fn run(
        &self,
        audio_path: &Path,
        _work_dir: &Path,
        timeout: Duration,
        token: &CancellationToken,
    ) -> TsResult<TranscriptionResult> {
        token.checkpoint()?;
        let api_key = self.api_key().ok_or_else(|| {
            TsError::BackendUnavailable(format!("{} missing", self.endpoint.api_key_env))
        })?;

        let bytes = fs::read(audio_path)?;
        let file_name = audio_path
            .file_name()
            .map_or_else(|| "audio.wav".to_owned(), |n| n.to_string_lossy().into_owned());

        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|err| TsError::BackendUnavailable(format!("multipart mime: {err}")))?;
        let form = reqwest::blocking::multipart::Form::new()
            .text("model", self.endpoint.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .part("file", part);

        let url = format!("{}/audio/transcriptions", self.endpoint.base_url);
        tracing::debug!(url = %url, model = %self.endpoint.model, "uploading audio");

        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        let response = client
            .post(&url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "unknown error".to_owned());
            return Err(TsError::BackendUnavailable(format!(
                "{}: status {status}: {body}",
                self.endpoint.service_name
            )));
        }

        let raw: Value = response.json()?;
        shape_verbose_json(&raw)
    }
}

/// Convert a `verbose_json` response into the canonical result shape.
///
/// Word timestamps may arrive top-level (`words`) or nested under
/// `segments[].words`; both are handled. Confidence falls back through the
/// field names the providers use (`probability`, `score`, `confidence`),
/// defaulting to 0.
pub fn shape_verbose_json(raw: &Value) -> TsResult<TranscriptionResult> {
    let words = extract_words(raw);
    let duration_seconds = raw
        .get("duration")
        .and_then(Value::as_f64)
        .filter(|d| *d > 0.0)
        .unwrap_or_else(|| words.last().map_or(0.0, |w| w.end));

    let language = raw
        .get("language")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let language_confidence = raw.get("language_probability").and_then(Value::as_f64);

    Ok(TranscriptionResult {
        segments: group_words_into_segments(words),
        language,
        language_confidence,
        duration_seconds,
    })
}

fn extract_words(raw: &Value) -> Vec<Word> {
    if let Some(top_level) = raw.get("words").and_then(Value::as_array) {
        return top_level.iter().filter_map(word_from_value).collect();
    }
    raw.get("segments")
        .and_then(Value::as_array)
        .map(|segments| {
            segments
                .iter()
                .filter_map(|segment| segment.get("words").and_then(Value::as_array))
                .flatten()
                .filter_map(word_from_value)
                .collect()
        })
        .unwrap_or_default()
}

fn word_from_value(value: &Value) -> Option<Word> {
    let text = value
        .get("word")
        .or_else(|| value.get("text"))
        .and_then(Value::as_str)?
        .to_owned();
    let start = value.get("start").and_then(Value::as_f64)?;
    let end = value.get("end").and_then(Value::as_f64)?;
    let confidence = value
        .get("probability")
        .or_else(|| value.get("score"))
        .or_else(|| value.get("confidence"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    Some(Word {
        text,
        start,
        end,
        confidence,
    })
}
