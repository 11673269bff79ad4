//! Local whisper.cpp adapters.
//!
//! Runs `whisper-cli` as a subprocess with JSON output and one-token
//! segments, then shapes the timed entries into the uniform segment
//! granularity. The GPU and CPU variants share the invocation; only the
//! descriptor and the GPU flag differ.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::backend::{group_words_into_segments, Engine, ModelHandleCache};
use crate::error::{TsError, TsResult};
use crate::model::{BackendKind, TranscriptionResult, Word};
use crate::orchestrator::CancellationToken;
use crate::process::{command_exists, run_command_cancellable};

const DEFAULT_WHISPER_BIN: &str = "whisper-cli";
const DEFAULT_WHISPER_MODEL: &str = "ggml-base.en.bin";

pub struct LocalWhisperEngine {
    kind: BackendKind,
    binary: String,
    model_path: Option<PathBuf>,
    use_gpu: bool,
}

impl LocalWhisperEngine {
    fn new(kind: BackendKind, use_gpu: bool, models: &mut ModelHandleCache) -> Self {
        let model_name =
            std::env::var("TS_WHISPER_MODEL").unwrap_or_else(|_| DEFAULT_WHISPER_MODEL.to_owned());
        Self {
            kind,
            binary: std::env::var("TS_WHISPER_BIN")
                .unwrap_or_else(|_| DEFAULT_WHISPER_BIN.to_owned()),
            model_path: models.resolve(&model_name),
            use_gpu,
        }
    }

    #[must_use]
    pub fn gpu(models: &mut ModelHandleCache) -> Self {
        Self::new(BackendKind::LocalGpu, true, models)
    }

    #[must_use]
    pub fn cpu(models: &mut ModelHandleCache) -> Self {
        Self::new(BackendKind::LocalCpu, false, models)
    }
}

impl Engine for LocalWhisperEngine {
    fn name(&self) -> &'static str {
        self.kind.service_name()
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary) && self.model_path.is_some()
    }

    fn run(
        &self,
        audio_path: &Path,
        work_dir: &Path,
        timeout: Duration,
        token: &CancellationToken,
    ) -> TsResult<TranscriptionResult> {
        let model = self
            .model_path
            .as_ref()
            .ok_or_else(|| TsError::BackendUnavailable("whisper model not resolved".to_owned()))?;

        let output_prefix = work_dir.join(format!("{}_output", self.name().replace('-', "_")));
        let mut args = vec![
            "-m".to_owned(),
            model.display().to_string(),
            "-f".to_owned(),
            audio_path.display().to_string(),
            "-oj".to_owned(),
            "-of".to_owned(),
            output_prefix.display().to_string(),
            // One token per segment gives word-granular offsets.
            "-ml".to_owned(),
            "1".to_owned(),
        ];
        if !self.use_gpu {
            args.push("-ng".to_owned());
        }

        run_command_cancellable(&self.binary, &args, None, token, Some(timeout))?;

        let json_path = PathBuf::from(format!("{}.json", output_prefix.display()));
        if !json_path.exists() {
            return Err(TsError::MissingArtifact(json_path));
        }
        let raw: Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        shape_whisper_cpp_json(&raw)
    }
}

/// Shape whisper.cpp JSON output (`transcription` array with millisecond
/// offsets) into the canonical result. Local whisper reports no per-word
/// confidence; words carry 0.
pub fn shape_whisper_cpp_json(raw: &Value) -> TsResult<TranscriptionResult> {
    let entries = raw
        .get("transcription")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let words: Vec<Word> = entries
        .iter()
        .filter_map(|entry| {
            let text = entry.get("text").and_then(Value::as_str)?.trim().to_owned();
            if text.is_empty() {
                return None;
            }
            let start = entry
                .pointer("/offsets/from")
                .and_then(Value::as_f64)
                .map(|ms| ms / 1000.0)?;
            let end = entry
                .pointer("/offsets/to")
                .and_then(Value::as_f64)
                .map(|ms| ms / 1000.0)?;
            Some(Word {
                text,
                start,
                end,
                confidence: 0.0,
            })
        })
        .collect();

    let language = raw
        .pointer("/result/language")
        .or_else(|| raw.get("language"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    let duration_seconds = words.last().map_or(0.0, |w| w.end);

    Ok(TranscriptionResult {
        segments: group_words_into_segments(words),
        language,
        language_confidence: None,
        duration_seconds,
    })
}
