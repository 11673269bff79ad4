//! Thin command-line surface over the pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::backend::{FallbackEngine, ModelHandleCache};
use crate::cache::LocalDirStore;
use crate::error::TsResult;
use crate::model::RunRequest;
use crate::orchestrator::Pipeline;
use crate::telemetry::TracingSink;

#[derive(Debug, Parser)]
#[command(name = "tubescribe", version, about = "Transcribe remote video audio to word-level text")]
pub struct Cli {
    /// Video source reference (URL or watch link).
    pub source_ref: String,

    /// Direct audio URL; skips strategy-based acquisition.
    #[arg(long)]
    pub audio_url: Option<String>,

    /// Root directory for the blob store (cache + published results).
    #[arg(long, default_value = "./tubescribe-store")]
    pub store_dir: PathBuf,

    /// Directory searched for local whisper models (in addition to
    /// `TS_MODEL_DIR`).
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Skip the vocal-isolation stage.
    #[arg(long)]
    pub no_isolation: bool,

    /// Whole-run budget in seconds.
    #[arg(long, default_value_t = 1800)]
    pub budget_secs: u64,
}

impl Cli {
    /// Build and execute a run, printing the structured outcome as JSON.
    /// The process exit code tracks the outcome's `success` flag.
    pub fn execute(self) -> TsResult<i32> {
        let mut search_dirs: Vec<PathBuf> = Vec::new();
        if let Ok(dir) = std::env::var("TS_MODEL_DIR") {
            search_dirs.push(PathBuf::from(dir));
        }
        if let Some(dir) = self.model_dir {
            search_dirs.push(dir);
        }
        let mut models = ModelHandleCache::new(search_dirs);

        let store = Arc::new(LocalDirStore::new(self.store_dir));
        let pipeline = Pipeline::new(
            store,
            Arc::new(TracingSink),
            FallbackEngine::with_default_engines(&mut models),
        )
        .with_vocal_isolation(!self.no_isolation)
        .with_run_budget(Duration::from_secs(self.budget_secs));

        let request = RunRequest {
            source_ref: self.source_ref,
            precomputed_audio_url: self.audio_url,
            precomputed_audio_error: None,
        };

        let outcome = pipeline.run(&request);
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        Ok(if outcome.success { 0 } else { 1 })
    }
}
