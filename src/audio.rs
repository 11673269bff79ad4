//! Audio assets, duration probing, size-aware chunking, and chunk merging.
//!
//! Chunking exists solely to satisfy hosted backends' payload ceilings: an
//! oversized asset is cut into 10-minute spans with a 1-second overlap on
//! both boundaries, transcribed per chunk, and re-merged into one continuous
//! timeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TsError, TsResult};
use crate::model::{Segment, TranscriptionResult};
use crate::orchestrator::CancellationToken;
use crate::process::{run_command_cancellable, run_command_with_timeout};

/// Nominal chunk length when splitting oversized audio.
pub const CHUNK_DURATION_MS: u64 = 600_000;

/// Overlap added on both sides of each interior chunk boundary, so the
/// backend keeps acoustic context across cut points.
pub const CHUNK_OVERLAP_SECONDS: f64 = 1.0;

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(300);
const FFPROBE_TIMEOUT: Duration = Duration::from_secs(30);
const ISOLATION_TIMEOUT: Duration = Duration::from_secs(300);

/// A local audio file owned exclusively by one pipeline run.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub size_bytes: u64,
}

impl AudioAsset {
    /// Build an asset from a file on disk, probing its duration with
    /// ffprobe. A failed probe degrades to duration 0 rather than erroring;
    /// size is always taken from file metadata.
    pub fn from_path(path: &Path) -> TsResult<Self> {
        if !path.is_file() {
            return Err(TsError::MissingArtifact(path.to_path_buf()));
        }
        let size_bytes = fs::metadata(path)?.len();
        let duration_seconds = probe_duration_seconds(path).unwrap_or(0.0);
        Ok(Self {
            path: path.to_path_buf(),
            duration_seconds,
            size_bytes,
        })
    }

    #[must_use]
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

pub fn probe_duration_seconds(input: &Path) -> Option<f64> {
    probe_duration_seconds_with_timeout(input, FFPROBE_TIMEOUT)
}

pub fn probe_duration_seconds_with_timeout(input: &Path, timeout: Duration) -> Option<f64> {
    let args = vec![
        "-v".to_owned(),
        "error".to_owned(),
        "-show_entries".to_owned(),
        "format=duration".to_owned(),
        "-of".to_owned(),
        "default=nokey=1:noprint_wrappers=1".to_owned(),
        input.display().to_string(),
    ];

    let output = run_command_with_timeout("ffprobe", &args, None, Some(timeout)).ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let secs = stdout.trim().parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(secs)
}

// ---------------------------------------------------------------------------
// Vocal isolation (optional external filter)
// ---------------------------------------------------------------------------

/// Run the vocal-isolation collaborator over `audio`, returning the isolated
/// vocals track if one was produced.
///
/// Any failure mode (missing binary, non-zero exit, timeout, vocals file
/// absent even on exit 0) yields `None`; the pipeline continues with the
/// original audio.
pub fn isolate_vocals(
    audio: &Path,
    work_dir: &Path,
    token: &CancellationToken,
) -> Option<PathBuf> {
    let output_dir = work_dir.join("separated");
    let args = vec![
        "--two-stems".to_owned(),
        "vocals".to_owned(),
        "--model".to_owned(),
        "htdemucs".to_owned(),
        "--out".to_owned(),
        output_dir.display().to_string(),
        audio.display().to_string(),
    ];

    match run_command_cancellable("demucs", &args, None, token, Some(ISOLATION_TIMEOUT)) {
        Ok(_) => {}
        Err(TsError::Cancelled(msg)) => {
            tracing::warn!(error = %msg, "vocal isolation cancelled");
            return None;
        }
        Err(err) => {
            tracing::warn!(error = %err, "vocal isolation failed; using original audio");
            return None;
        }
    }

    let vocals = find_file_named(&output_dir, "vocals.wav");
    if vocals.is_none() {
        tracing::warn!("vocal isolation produced no vocals file; using original audio");
    }
    vocals
}

fn find_file_named(root: &Path, name: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_named(&path, name) {
                return Some(found);
            }
        } else if path.file_name().is_some_and(|n| n == name) {
            return Some(path);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Size-aware chunker
// ---------------------------------------------------------------------------

/// A time-bounded sub-slice of an audio asset, created solely to satisfy a
/// backend's payload-size limit. `source_start_offset` is the exact start of
/// this chunk's audio within the source timeline (overlap included), which
/// is what the merger rebases by.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub path: PathBuf,
    pub source_start_offset: f64,
}

/// Planned cut for one chunk: `(start_seconds, duration_seconds)` within the
/// source, overlap already applied and clamped to asset bounds.
#[must_use]
pub fn plan_chunk_spans(total_duration_seconds: f64) -> Vec<(f64, f64)> {
    if total_duration_seconds <= 0.0 {
        return Vec::new();
    }
    let total_ms = (total_duration_seconds * 1000.0).ceil() as u64;
    let count = total_ms.div_ceil(CHUNK_DURATION_MS);
    let nominal = CHUNK_DURATION_MS as f64 / 1000.0;

    (0..count)
        .map(|i| {
            let nominal_start = i as f64 * nominal;
            let nominal_end = ((i + 1) as f64 * nominal).min(total_duration_seconds);
            let start = (nominal_start - CHUNK_OVERLAP_SECONDS).max(0.0);
            let end = (nominal_end + CHUNK_OVERLAP_SECONDS).min(total_duration_seconds);
            (start, end - start)
        })
        .collect()
}

/// Split `asset` into chunks no longer than ten minutes each when its size
/// exceeds `max_size_mb`; otherwise return a single chunk covering the whole
/// asset (no subprocess is run in that case).
pub fn split(
    asset: &AudioAsset,
    max_size_mb: f64,
    work_dir: &Path,
    token: &CancellationToken,
) -> TsResult<Vec<Chunk>> {
    if asset.size_mb() <= max_size_mb {
        return Ok(vec![Chunk {
            index: 0,
            path: asset.path.clone(),
            source_start_offset: 0.0,
        }]);
    }
    if asset.duration_seconds <= 0.0 {
        // Cannot plan cuts without a duration.
        return Err(TsError::InvalidRequest(format!(
            "audio at {} exceeds {max_size_mb} MB but its duration is unknown",
            asset.path.display()
        )));
    }

    let chunk_dir = work_dir.join("chunks");
    fs::create_dir_all(&chunk_dir)?;

    let spans = plan_chunk_spans(asset.duration_seconds);
    tracing::info!(
        chunks = spans.len(),
        size_mb = format!("{:.1}", asset.size_mb()),
        "splitting oversized audio"
    );

    let mut chunks = Vec::with_capacity(spans.len());
    for (index, (start, duration)) in spans.into_iter().enumerate() {
        let path = chunk_dir.join(format!("chunk_{index:03}.wav"));
        let args = vec![
            "-hide_banner".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-y".to_owned(),
            "-ss".to_owned(),
            format!("{start:.3}"),
            "-t".to_owned(),
            format!("{duration:.3}"),
            "-i".to_owned(),
            asset.path.display().to_string(),
            "-ac".to_owned(),
            "1".to_owned(),
            "-ar".to_owned(),
            "16000".to_owned(),
            "-c:a".to_owned(),
            "pcm_s16le".to_owned(),
            path.display().to_string(),
        ];
        run_command_cancellable("ffmpeg", &args, None, token, Some(FFMPEG_TIMEOUT))?;
        if !path.is_file() {
            return Err(TsError::MissingArtifact(path));
        }
        chunks.push(Chunk {
            index,
            path,
            source_start_offset: start,
        });
    }
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Chunk merger
// ---------------------------------------------------------------------------

/// Reassemble per-chunk transcription results into one continuous timeline.
///
/// Each chunk's timestamps are rebased by that chunk's known
/// `source_start_offset`, so a short final segment (tail silence) cannot
/// drift the arithmetic. Words falling entirely inside the span already
/// covered by an earlier chunk (the overlap) are dropped. Failed chunks
/// (`None`) contribute nothing; the surviving timeline stays monotonic.
/// Segment ids are renumbered densely across the merged sequence.
#[must_use]
pub fn merge(chunks: &[Chunk], per_chunk: Vec<Option<TranscriptionResult>>) -> TranscriptionResult {
    const EPSILON: f64 = 1e-6;

    let mut segments: Vec<Segment> = Vec::new();
    let mut language = None;
    let mut language_confidence = None;
    let mut high_water = 0.0_f64;

    for (chunk, result) in chunks.iter().zip(per_chunk) {
        let Some(result) = result else {
            tracing::warn!(chunk = chunk.index, "chunk produced no result; skipping");
            continue;
        };
        if language.is_none() {
            language = result.language.clone();
            language_confidence = result.language_confidence;
        }

        for segment in result.segments {
            let start = segment.start + chunk.source_start_offset;
            let end = segment.end + chunk.source_start_offset;

            let had_words = !segment.words.is_empty();
            let words: Vec<_> = segment
                .words
                .into_iter()
                .map(|mut word| {
                    word.start += chunk.source_start_offset;
                    word.end += chunk.source_start_offset;
                    word
                })
                .filter(|word| word.end > high_water + EPSILON)
                .collect();

            // A segment whose every word was already covered by the previous
            // chunk's overlap carries nothing new.
            if (had_words && words.is_empty()) || end <= high_water + EPSILON {
                continue;
            }

            let clamped_start = start.max(high_water).min(end);
            high_water = high_water.max(end);
            segments.push(Segment {
                id: segments.len(),
                start: clamped_start,
                end,
                text: segment.text,
                words,
            });
        }
    }

    TranscriptionResult {
        segments,
        language,
        language_confidence,
        duration_seconds: high_water,
    }
}
