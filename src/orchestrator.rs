//! The transcription pipeline: one strictly sequential run per request.
//!
//! Stage order: credential provisioning, cache lookup, acquisition (or
//! direct download), optional vocal isolation, capability-ranked fallback
//! transcription (chunking and merging inside), optional alignment,
//! normalization, publish. The only work off the critical path is the
//! fire-and-forget audio cache write.
//!
//! Every temporary resource is scope-owned (run temp dir, cookie jar guard)
//! and released on all exit paths; the whole-run deadline is the only
//! cancellation signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::acquire::{download_direct, AcquisitionCoordinator};
use crate::audio::{isolate_vocals, AudioAsset};
use crate::backend::{apply_alignment, Aligner, FallbackEngine};
use crate::cache::{extract_video_id, AudioCache, BlobStore};
use crate::credentials;
use crate::error::{TsError, TsResult};
use crate::model::{AttemptLogEntry, NormalizedTranscript, RunOutcome, RunRequest};
use crate::probe::CapabilityProbe;
use crate::telemetry::ProgressSink;

/// Whole-run budget.
pub const RUN_BUDGET: Duration = Duration::from_secs(30 * 60);

/// Environment variable holding the cookie blob (plain or base64).
pub const COOKIES_ENV: &str = "TS_COOKIES_CONTENT";

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Deadline-based cancellation token threaded through every subprocess poll
/// loop. Expiry is the run's single cancellation signal; cleanup rides on
/// scope guards, not on signal handlers.
#[derive(Debug, Clone, Copy)]
pub struct CancellationToken {
    deadline: Option<DateTime<Utc>>,
}

impl CancellationToken {
    #[must_use]
    pub fn with_deadline_from_now(duration: Duration) -> Self {
        Self {
            deadline: Some(Utc::now() + chrono::Duration::milliseconds(duration.as_millis() as i64)),
        }
    }

    /// A token that never cancels.
    #[must_use]
    pub fn no_deadline() -> Self {
        Self { deadline: None }
    }

    /// A token whose deadline has already passed.
    #[must_use]
    pub fn already_expired() -> Self {
        Self {
            deadline: Some(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn checkpoint(&self) -> TsResult<()> {
        match self.deadline {
            Some(deadline) if Utc::now() >= deadline => {
                Err(TsError::Cancelled("run deadline exceeded".to_owned()))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    store: Arc<dyn BlobStore>,
    sink: Arc<dyn ProgressSink>,
    engine: FallbackEngine,
    aligner: Option<Box<dyn Aligner>>,
    coordinator: AcquisitionCoordinator,
    run_budget: Duration,
    isolate_vocals: bool,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn BlobStore>,
        sink: Arc<dyn ProgressSink>,
        engine: FallbackEngine,
    ) -> Self {
        Self {
            store,
            sink,
            engine,
            aligner: None,
            coordinator: AcquisitionCoordinator::default(),
            run_budget: RUN_BUDGET,
            isolate_vocals: true,
        }
    }

    #[must_use]
    pub fn with_aligner(mut self, aligner: Box<dyn Aligner>) -> Self {
        self.aligner = Some(aligner);
        self
    }

    #[must_use]
    pub fn with_coordinator(mut self, coordinator: AcquisitionCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    #[must_use]
    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    #[must_use]
    pub fn with_vocal_isolation(mut self, enabled: bool) -> Self {
        self.isolate_vocals = enabled;
        self
    }

    /// Execute one run. Always returns a structured outcome; terminal errors
    /// become `success = false` with the attempt log collected so far.
    pub fn run(&self, request: &RunRequest) -> RunOutcome {
        let started = Instant::now();
        let video_id = extract_video_id(&request.source_ref);
        let mut attempt_log: Vec<AttemptLogEntry> = Vec::new();

        let result = self.run_inner(request, video_id.as_deref(), &mut attempt_log);
        let processing_time_seconds = started.elapsed().as_secs_f64();

        match result {
            Ok((normalized, result_url, processing_method)) => RunOutcome {
                success: true,
                result_url: Some(result_url),
                video_id,
                processing_method: Some(processing_method),
                processing_time_seconds,
                attempt_log,
                metadata: Some(normalized.metadata),
                error: None,
            },
            Err(err) => {
                tracing::error!(code = err.error_code(), error = %err, "run failed");
                RunOutcome {
                    success: false,
                    result_url: None,
                    video_id,
                    processing_method: None,
                    processing_time_seconds,
                    attempt_log,
                    metadata: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn run_inner(
        &self,
        request: &RunRequest,
        video_id: Option<&str>,
        attempt_log: &mut Vec<AttemptLogEntry>,
    ) -> TsResult<(NormalizedTranscript, String, String)> {
        if request.source_ref.trim().is_empty() {
            return Err(TsError::InvalidRequest("empty source reference".to_owned()));
        }

        let token = CancellationToken::with_deadline_from_now(self.run_budget);
        let work_dir = tempfile::tempdir()?;
        let work = work_dir.path();
        let sink = self.sink.as_ref();

        // Cookie jar lives for the whole run and is removed when dropped.
        let cookie_blob = std::env::var(COOKIES_ENV).ok();
        let cookie_file = credentials::provision(cookie_blob.as_deref(), work)?;

        let cache = AudioCache::new(Arc::clone(&self.store));
        let asset = self.obtain_audio(request, video_id, cookie_file.as_ref(), &cache, work, &token)?;

        let transcribe_input = if self.isolate_vocals {
            sink.report("isolate", 25, "Separating vocals...");
            match isolate_vocals(&asset.path, work, &token).map(|p| AudioAsset::from_path(&p)) {
                Some(Ok(vocals)) => {
                    sink.report("isolate", 40, "Vocal separation completed");
                    vocals
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "isolated vocals unreadable; using original audio");
                    asset.clone()
                }
                None => asset.clone(),
            }
        } else {
            asset.clone()
        };

        let probe = CapabilityProbe::detect();
        let (result, processing_method) =
            self.engine
                .transcribe(&transcribe_input, &probe, work, sink, &token, attempt_log)?;

        sink.report("align", 75, "Refining word timestamps...");
        let result = apply_alignment(self.aligner.as_deref(), &transcribe_input.path, result);
        sink.report("align", 90, "Word alignment completed");

        sink.report("finalize", 95, "Generating final results...");
        let normalized = crate::normalize::normalize(&result, &request.source_ref);

        let result_url = self.publish(video_id, &normalized)?;
        sink.report("finalize", 100, "Transcription completed successfully");
        Ok((normalized, result_url, processing_method))
    }

    /// Resolve the run's audio: direct download when a precomputed URL is
    /// present, otherwise cache lookup followed by strategy acquisition.
    fn obtain_audio(
        &self,
        request: &RunRequest,
        video_id: Option<&str>,
        cookie_file: Option<&credentials::CookieFile>,
        cache: &AudioCache,
        work: &std::path::Path,
        token: &CancellationToken,
    ) -> TsResult<AudioAsset> {
        if let Some(url) = request.precomputed_audio_url.as_deref() {
            self.sink.report("download", 10, "Downloading precomputed audio...");
            let asset = download_direct(url, work)?;
            self.sink.report("download", 20, "Audio download completed");
            if let Some(id) = video_id {
                cache.put(id, &asset);
            }
            return Ok(asset);
        }

        if let Some(diag) = request.precomputed_audio_error.as_deref() {
            tracing::warn!(upstream_error = diag, "upstream fetch already failed; using fallback acquisition");
        }

        if let Some(id) = video_id {
            if let Some(cached) = cache.get(id, work) {
                self.sink.report("download", 20, "Using cached audio");
                return Ok(cached);
            }
        } else {
            tracing::debug!("no video id derivable; caching skipped for this run");
        }

        let asset = self.coordinator.acquire(
            &request.source_ref,
            cookie_file,
            work,
            self.sink.as_ref(),
            token,
        )?;
        if let Some(id) = video_id {
            cache.put(id, &asset);
        }
        Ok(asset)
    }

    /// Publish the normalized transcript. This is the one store interaction
    /// whose failure is fatal for the run.
    fn publish(&self, video_id: Option<&str>, normalized: &NormalizedTranscript) -> TsResult<String> {
        let run_key = video_id
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = format!("transcriptions/{run_key}/results.json");
        let bytes = serde_json::to_vec(normalized)?;
        self.store
            .put(&key, &bytes, "application/json")
            .ok_or_else(|| TsError::Publish(format!("blob store rejected `{key}`")))
    }
}
