//! Transcription backends and the fallback engine.
//!
//! Each backend adapter implements [`Engine`] and is the only code that
//! understands its native output shape; everything downstream sees the
//! canonical [`TranscriptionResult`]. The [`FallbackEngine`] executes
//! engines in capability-ranked order, chunking oversized audio for
//! payload-limited engines, validating every result, and logging every
//! attempt.

pub mod hosted;
pub mod local;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::audio::{self, AudioAsset};
use crate::error::{TsError, TsResult};
use crate::model::{AttemptLogEntry, BackendKind, Segment, TranscriptionResult, Word};
use crate::orchestrator::CancellationToken;
use crate::probe::CapabilityProbe;
use crate::telemetry::ProgressSink;

/// Segment shaping rule applied uniformly to every backend's raw words:
/// at most this many words per segment.
pub const MAX_WORDS_PER_SEGMENT: usize = 10;
/// A segment boundary is also forced once its span would exceed this.
pub const MAX_SEGMENT_SPAN_SECONDS: f64 = 5.0;

/// Per-backend invocation budget.
const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Engine trait
// ---------------------------------------------------------------------------

/// Contract every backend adapter implements. Engines are stateless
/// descriptors resolved at call time; ranking owns the order, not the
/// engines.
pub trait Engine: Send + Sync {
    /// Service name recorded in attempt logs.
    fn name(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    /// Payload ceiling in megabytes, if the backend has one.
    fn size_limit_mb(&self) -> Option<f64> {
        self.kind().size_limit_mb()
    }

    /// Whether the backend can be invoked right now (binary on PATH,
    /// credential present). Must not panic or error.
    fn is_available(&self) -> bool;

    /// Transcribe the audio file at `audio_path`.
    fn run(
        &self,
        audio_path: &Path,
        work_dir: &Path,
        timeout: Duration,
        token: &CancellationToken,
    ) -> TsResult<TranscriptionResult>;
}

// ---------------------------------------------------------------------------
// Word grouping (uniform segment shaping)
// ---------------------------------------------------------------------------

/// Group a flat, time-ordered word list into segments of at most
/// [`MAX_WORDS_PER_SEGMENT`] words, forcing a boundary whenever the
/// cumulative span reaches [`MAX_SEGMENT_SPAN_SECONDS`]. Applied to every
/// backend's raw output so downstream consumers see one granularity.
#[must_use]
pub fn group_words_into_segments(words: Vec<Word>) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Vec<Word> = Vec::new();
    let mut group_start = 0.0_f64;

    for word in words {
        if current.is_empty() {
            group_start = word.start;
        }
        let group_end = word.end;
        current.push(word);

        let full = current.len() >= MAX_WORDS_PER_SEGMENT
            || (group_end - group_start) >= MAX_SEGMENT_SPAN_SECONDS;
        if full {
            segments.push(segment_from_words(segments.len(), std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        segments.push(segment_from_words(segments.len(), current));
    }
    segments
}

fn segment_from_words(id: usize, words: Vec<Word>) -> Segment {
    let start = words.first().map_or(0.0, |w| w.start);
    let end = words.last().map_or(0.0, |w| w.end);
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    Segment {
        id,
        start,
        end,
        text,
        words,
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Explicit retry policy applied at the fallback engine's call sites, in
/// place of decorator-style wrapping. `max_attempts == 1` means no retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn run<T>(&self, mut op: impl FnMut() -> TsResult<T>) -> TsResult<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err @ TsError::Cancelled(_)) => return Err(err),
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %err, "retrying after failure");
                    std::thread::sleep(self.backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Model handle cache
// ---------------------------------------------------------------------------

/// Caller-owned cache of resolved local model files, created at process
/// start and invalidated on configuration change. Replaces process-wide
/// mutable dictionaries keyed by model name.
#[derive(Debug, Default)]
pub struct ModelHandleCache {
    resolved: HashMap<String, PathBuf>,
    search_dirs: Vec<PathBuf>,
}

impl ModelHandleCache {
    #[must_use]
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            resolved: HashMap::new(),
            search_dirs,
        }
    }

    /// Resolve `model_name` to a file path, consulting the cache first.
    pub fn resolve(&mut self, model_name: &str) -> Option<PathBuf> {
        if let Some(path) = self.resolved.get(model_name) {
            if path.is_file() {
                return Some(path.clone());
            }
            // Stale handle: the file moved since resolution.
            self.resolved.remove(model_name);
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(model_name);
            if candidate.is_file() {
                self.resolved.insert(model_name.to_owned(), candidate.clone());
                return Some(candidate);
            }
        }
        None
    }

    /// Drop every resolved handle; call after configuration changes.
    pub fn invalidate(&mut self) {
        self.resolved.clear();
    }
}

// ---------------------------------------------------------------------------
// Alignment capability
// ---------------------------------------------------------------------------

/// Optional external timestamp-refinement capability.
pub trait Aligner: Send + Sync {
    fn align(&self, audio_path: &Path, segments: &[Segment]) -> TsResult<Vec<Segment>>;
}

/// Apply an aligner to a valid result; on any failure the unaligned
/// segments pass through unchanged.
pub fn apply_alignment(
    aligner: Option<&dyn Aligner>,
    audio_path: &Path,
    mut result: TranscriptionResult,
) -> TranscriptionResult {
    let Some(aligner) = aligner else {
        return result;
    };
    match aligner.align(audio_path, &result.segments) {
        Ok(aligned) => {
            result.segments = aligned;
            result
        }
        Err(err) => {
            tracing::warn!(error = %err, "alignment failed; keeping backend timestamps");
            result
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback engine
// ---------------------------------------------------------------------------

/// Executes backends in ranked order until one produces a valid result.
pub struct FallbackEngine {
    engines: Vec<Box<dyn Engine>>,
    retry: RetryPolicy,
    backend_timeout: Duration,
}

impl FallbackEngine {
    #[must_use]
    pub fn new(engines: Vec<Box<dyn Engine>>) -> Self {
        Self {
            engines,
            retry: RetryPolicy::default(),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// The default production registry: both hosted adapters plus the two
    /// local whisper.cpp variants.
    #[must_use]
    pub fn with_default_engines(models: &mut ModelHandleCache) -> Self {
        let engines: Vec<Box<dyn Engine>> = vec![
            Box::new(hosted::HostedEngine::realtime()),
            Box::new(local::LocalWhisperEngine::gpu(models)),
            Box::new(hosted::HostedEngine::batch()),
            Box::new(local::LocalWhisperEngine::cpu(models)),
        ];
        Self::new(engines)
    }

    fn engine_for(&self, kind: BackendKind) -> Option<&dyn Engine> {
        self.engines
            .iter()
            .map(AsRef::as_ref)
            .find(|engine| engine.kind() == kind)
    }

    /// Transcribe `asset`, falling back across ranked backends.
    ///
    /// Every invoked backend gets exactly one attempt-log entry, success or
    /// failure; ineligible or unavailable backends are never attempted and
    /// never logged. Returns the first valid result together with the
    /// serving backend's service name, or `AllBackendsFailed` after
    /// exhausting the ranking.
    pub fn transcribe(
        &self,
        asset: &AudioAsset,
        probe: &CapabilityProbe,
        work_dir: &Path,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
        attempt_log: &mut Vec<AttemptLogEntry>,
    ) -> TsResult<(TranscriptionResult, String)> {
        let size_mb = asset.size_mb();
        let ranked = probe.rank(size_mb);
        tracing::info!(
            candidates = ?ranked.iter().map(|k| k.service_name()).collect::<Vec<_>>(),
            size_mb = format!("{size_mb:.1}"),
            "ranked transcription backends"
        );

        for kind in ranked {
            token.checkpoint()?;
            let Some(engine) = self.engine_for(kind) else {
                tracing::debug!(backend = kind.service_name(), "no engine registered");
                continue;
            };
            if !engine.is_available() {
                tracing::debug!(backend = engine.name(), "engine unavailable; skipping");
                continue;
            }

            sink.report(
                "transcribe",
                45,
                &format!("Transcribing with `{}`...", engine.name()),
            );
            let started = Instant::now();
            let outcome = self.invoke(engine, asset, work_dir, token);
            let elapsed = started.elapsed().as_secs_f64();

            match outcome {
                Ok(result) if result.is_valid() => {
                    attempt_log.push(AttemptLogEntry {
                        service: engine.name().to_owned(),
                        audio_size_mb: size_mb,
                        accelerator_available: probe.accelerator_available,
                        success: true,
                        error_message: None,
                        elapsed_seconds: elapsed,
                    });
                    tracing::info!(
                        backend = engine.name(),
                        words = result.word_count(),
                        elapsed_s = format!("{elapsed:.1}"),
                        "transcription accepted"
                    );
                    sink.report("transcribe", 70, "Transcription completed");
                    return Ok((result, engine.name().to_owned()));
                }
                Ok(result) => {
                    let message = format!(
                        "result rejected: {} segments, {} words, {:.1}s duration",
                        result.segments.len(),
                        result.word_count(),
                        result.duration_seconds
                    );
                    tracing::warn!(backend = engine.name(), "{message}");
                    attempt_log.push(AttemptLogEntry {
                        service: engine.name().to_owned(),
                        audio_size_mb: size_mb,
                        accelerator_available: probe.accelerator_available,
                        success: false,
                        error_message: Some(message),
                        elapsed_seconds: elapsed,
                    });
                }
                Err(err @ TsError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(backend = engine.name(), error = %err, "backend attempt failed");
                    attempt_log.push(AttemptLogEntry {
                        service: engine.name().to_owned(),
                        audio_size_mb: size_mb,
                        accelerator_available: probe.accelerator_available,
                        success: false,
                        error_message: Some(err.to_string()),
                        elapsed_seconds: elapsed,
                    });
                }
            }
        }

        Err(TsError::AllBackendsFailed {
            attempt_log: attempt_log.clone(),
        })
    }

    /// Invoke one engine, splitting the audio first when the engine declares
    /// a payload ceiling smaller than the asset.
    fn invoke(
        &self,
        engine: &dyn Engine,
        asset: &AudioAsset,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> TsResult<TranscriptionResult> {
        let needs_chunking = engine
            .size_limit_mb()
            .is_some_and(|limit| asset.size_mb() > limit);
        if !needs_chunking {
            return self
                .retry
                .run(|| engine.run(&asset.path, work_dir, self.backend_timeout, token));
        }

        let limit = engine.size_limit_mb().unwrap_or(f64::MAX);
        let chunks = audio::split(asset, limit, work_dir, token)?;
        let mut per_chunk: Vec<Option<TranscriptionResult>> = Vec::with_capacity(chunks.len());
        let mut any_ok = false;
        for chunk in &chunks {
            token.checkpoint()?;
            let result = self
                .retry
                .run(|| engine.run(&chunk.path, work_dir, self.backend_timeout, token));
            match result {
                Ok(result) => {
                    any_ok = true;
                    per_chunk.push(Some(result));
                }
                Err(err @ TsError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(chunk = chunk.index, error = %err, "chunk transcription failed");
                    per_chunk.push(None);
                }
            }
        }
        if !any_ok {
            return Err(TsError::BackendUnavailable(format!(
                "{}: every chunk failed",
                engine.name()
            )));
        }
        Ok(audio::merge(&chunks, per_chunk))
    }
}
