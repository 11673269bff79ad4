//! Runtime capability probing and backend ranking.
//!
//! Probing inspects the environment (accelerator presence, hosted API
//! credentials) and the audio asset size, then ranks the candidate backends
//! in fixed priority order. Probing never errors: a failed detection
//! degrades to "not available".

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::BackendKind;
use crate::process::{command_exists, run_command_with_timeout};

const ACCELERATOR_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Env var holding the low-latency hosted backend's API key.
pub const REALTIME_KEY_ENV: &str = "TS_REALTIME_API_KEY";
/// Env var holding the general hosted backend's API key.
pub const BATCH_KEY_ENV: &str = "OPENAI_API_KEY";

/// Snapshot of runtime capabilities taken once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProbe {
    pub accelerator_available: bool,
    pub realtime_key_present: bool,
    pub batch_key_present: bool,
}

impl CapabilityProbe {
    /// Probe the current environment. Detection failures (e.g. `nvidia-smi`
    /// missing or erroring) read as "not available", never as an error.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            accelerator_available: accelerator_available(),
            realtime_key_present: env_key_present(REALTIME_KEY_ENV),
            batch_key_present: env_key_present(BATCH_KEY_ENV),
        }
    }

    /// Rank candidate backends for an asset of `audio_size_mb`, most
    /// preferred first. Deterministic and idempotent for identical inputs.
    #[must_use]
    pub fn rank(&self, audio_size_mb: f64) -> Vec<BackendKind> {
        let mut eligible: Vec<BackendKind> = [
            BackendKind::HostedRealtime,
            BackendKind::LocalGpu,
            BackendKind::HostedBatch,
            BackendKind::LocalCpu,
        ]
        .into_iter()
        .filter(|kind| self.is_eligible(*kind, audio_size_mb))
        .collect();
        eligible.sort_by_key(|kind| kind.priority());
        eligible
    }

    fn is_eligible(&self, kind: BackendKind, audio_size_mb: f64) -> bool {
        let within_limit = kind
            .size_limit_mb()
            .is_none_or(|limit| audio_size_mb <= limit);
        match kind {
            BackendKind::HostedRealtime => self.realtime_key_present && within_limit,
            BackendKind::LocalGpu => self.accelerator_available,
            BackendKind::HostedBatch => self.batch_key_present && within_limit,
            BackendKind::LocalCpu => true,
        }
    }
}

fn env_key_present(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| !value.trim().is_empty())
}

/// Detect an accelerator by asking `nvidia-smi` to enumerate GPUs. Any
/// failure to query reads as no accelerator.
fn accelerator_available() -> bool {
    if !command_exists("nvidia-smi") {
        return false;
    }
    let args = vec!["--list-gpus".to_owned()];
    match run_command_with_timeout("nvidia-smi", &args, None, Some(ACCELERATOR_PROBE_TIMEOUT)) {
        Ok(output) => !String::from_utf8_lossy(&output.stdout).trim().is_empty(),
        Err(_) => false,
    }
}
