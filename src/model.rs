//! Core data model shared across the orchestration pipeline.
//!
//! Every backend adapter, the chunk merger, and the normalizer speak these
//! types; nothing downstream of an adapter ever sees a backend's native
//! output shape.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcript shapes
// ---------------------------------------------------------------------------

/// A single recognized word with its time span and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// Start offset in seconds from the beginning of the source audio.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
    /// Recognition confidence in `[0.0, 1.0]`; 0.0 when the backend does not
    /// report one.
    pub confidence: f64,
}

/// A contiguous span of transcript text with optional word-level breakdown.
///
/// Invariant: `start <= end`, and `words` (when present) are time-ordered and
/// lie within `[start, end]` modulo a small alignment tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
}

/// Canonical transcription output, regardless of which backend served it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub language_confidence: Option<f64>,
    pub duration_seconds: f64,
}

impl TranscriptionResult {
    /// Total word count across all segments.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.words.len()).sum()
    }

    /// The minimum-content gate a result must pass before being accepted as
    /// the run's answer: non-empty segments, at least one word somewhere,
    /// and a positive duration.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.segments.is_empty() && self.word_count() > 0 && self.duration_seconds > 0.0
    }
}

// ---------------------------------------------------------------------------
// Backend descriptors
// ---------------------------------------------------------------------------

/// The interchangeable transcription backends, in fixed priority order
/// (lowest `priority()` value is tried first when eligible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Low-latency hosted endpoint; needs its API key and audio <= 20 MB.
    HostedRealtime,
    /// Local whisper.cpp on an accelerator; needs a detected GPU.
    LocalGpu,
    /// General hosted endpoint; needs its API key and audio <= 25 MB.
    HostedBatch,
    /// Local whisper.cpp on CPU; the universal fallback, no precondition.
    LocalCpu,
}

impl BackendKind {
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::HostedRealtime => 1,
            Self::LocalGpu => 2,
            Self::HostedBatch => 3,
            Self::LocalCpu => 4,
        }
    }

    /// Service name recorded in attempt logs and run outcomes.
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::HostedRealtime => "hosted-realtime",
            Self::LocalGpu => "local-whisper-gpu",
            Self::HostedBatch => "hosted-batch",
            Self::LocalCpu => "local-whisper-cpu",
        }
    }

    /// Payload size ceiling imposed by the backend, in megabytes.
    #[must_use]
    pub const fn size_limit_mb(self) -> Option<f64> {
        match self {
            Self::HostedRealtime => Some(20.0),
            Self::HostedBatch => Some(25.0),
            Self::LocalGpu | Self::LocalCpu => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt log
// ---------------------------------------------------------------------------

/// One backend attempt, success or failure. Append-only within a run;
/// retained for the lifetime of the run for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLogEntry {
    pub service: String,
    pub audio_size_mb: f64,
    pub accelerator_available: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed_seconds: f64,
}

// ---------------------------------------------------------------------------
// Run request / outcome
// ---------------------------------------------------------------------------

/// Input to a single transcription run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Reference to the remote video source (URL or bare id).
    pub source_ref: String,
    /// Direct audio URL produced by an upstream collaborator; when present,
    /// strategy-based acquisition is skipped entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precomputed_audio_url: Option<String>,
    /// Diagnostic from an upstream collaborator that already tried and
    /// failed to fetch audio; triggers fallback acquisition immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precomputed_audio_error: Option<String>,
}

/// Structured result of a run. Produced on every exit path, including
/// failures; the caller never sees an unhandled crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    /// Service name of the backend that produced the accepted result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_method: Option<String>,
    pub processing_time_seconds: f64,
    pub attempt_log: Vec<AttemptLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TranscriptMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized views
// ---------------------------------------------------------------------------

/// Summary metadata derived from a normalized transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMetadata {
    pub source_ref: String,
    pub word_count: usize,
    /// End timestamp of the last word, 0 when there are no words.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Mean per-word confidence, 0 when there are no words.
    pub confidence: f64,
}

/// The caller-facing normalized transcript: flat word list plus derived
/// subtitle and plain-text views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTranscript {
    pub words: Vec<Word>,
    pub srt: String,
    pub plain_text: String,
    pub metadata: TranscriptMetadata,
}
