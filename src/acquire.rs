//! Audio acquisition from the upstream video source.
//!
//! The upstream actively varies behavior by client identity and
//! authentication state, so acquisition walks an ordered strategy table —
//! authenticated strategies first (only when a cookie jar exists), then
//! unauthenticated ones per declared client identity — until one attempt
//! yields a usable file. The ordering is policy, not an accident.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::AudioAsset;
use crate::credentials::CookieFile;
use crate::error::{TsError, TsResult};
use crate::orchestrator::CancellationToken;
use crate::process::run_command_cancellable;
use crate::telemetry::ProgressSink;

/// Per-strategy fetch budget.
pub const STRATEGY_TIMEOUT: Duration = Duration::from_secs(120);

const DIRECT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A named fetch recipe: pure configuration, no behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStrategy {
    pub name: &'static str,
    /// Client identity passed to the fetcher's extractor.
    pub player_client: &'static str,
    pub requires_auth: bool,
}

/// The ordered strategy table. Authenticated entries lead; unauthenticated
/// entries follow in declared client order.
pub const STRATEGIES: [DownloadStrategy; 5] = [
    DownloadStrategy {
        name: "web-auth",
        player_client: "web",
        requires_auth: true,
    },
    DownloadStrategy {
        name: "tv-auth",
        player_client: "tv_embedded",
        requires_auth: true,
    },
    DownloadStrategy {
        name: "ios",
        player_client: "ios",
        requires_auth: false,
    },
    DownloadStrategy {
        name: "android",
        player_client: "android",
        requires_auth: false,
    },
    DownloadStrategy {
        name: "web",
        player_client: "web",
        requires_auth: false,
    },
];

/// Drives the external fetch collaborator through the strategy table.
pub struct AcquisitionCoordinator {
    fetch_program: String,
    strategy_timeout: Duration,
}

impl Default for AcquisitionCoordinator {
    fn default() -> Self {
        Self {
            fetch_program: std::env::var("TS_FETCH_BIN").unwrap_or_else(|_| "yt-dlp".to_owned()),
            strategy_timeout: STRATEGY_TIMEOUT,
        }
    }
}

impl AcquisitionCoordinator {
    #[must_use]
    pub fn new(fetch_program: impl Into<String>, strategy_timeout: Duration) -> Self {
        Self {
            fetch_program: fetch_program.into(),
            strategy_timeout,
        }
    }

    /// Strategies applicable to this run, in attempt order.
    #[must_use]
    pub fn applicable_strategies(authenticated: bool) -> Vec<DownloadStrategy> {
        STRATEGIES
            .iter()
            .copied()
            .filter(|s| authenticated || !s.requires_auth)
            .collect()
    }

    /// Fetch audio for `source_ref`, trying each applicable strategy with a
    /// bounded timeout. First success wins; exhaustion raises a single
    /// aggregate failure carrying every attempt diagnostic.
    pub fn acquire(
        &self,
        source_ref: &str,
        cookie_file: Option<&CookieFile>,
        work_dir: &Path,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> TsResult<AudioAsset> {
        let strategies = Self::applicable_strategies(cookie_file.is_some());
        let mut attempts: Vec<String> = Vec::new();

        for strategy in strategies {
            token.checkpoint()?;
            sink.report(
                "download",
                10,
                &format!("Fetching audio via strategy `{}`...", strategy.name),
            );

            let attempt_dir = work_dir.join(format!("fetch_{}", strategy.name));
            fs::create_dir_all(&attempt_dir)?;

            let args = self.fetch_args(source_ref, strategy, cookie_file, &attempt_dir);
            match run_command_cancellable(
                &self.fetch_program,
                &args,
                None,
                token,
                Some(self.strategy_timeout),
            ) {
                Ok(_) => match find_fetched_audio(&attempt_dir) {
                    Some(path) => match AudioAsset::from_path(&path) {
                        Ok(asset) => {
                            tracing::info!(
                                strategy = strategy.name,
                                size_mb = format!("{:.1}", asset.size_mb()),
                                "audio acquired"
                            );
                            sink.report("download", 20, "Audio download completed");
                            return Ok(asset);
                        }
                        Err(err) => {
                            tracing::warn!(strategy = strategy.name, error = %err, "fetched audio unusable");
                            attempts.push(format!("{}: fetched audio unusable: {err}", strategy.name));
                        }
                    },
                    None => {
                        let diag = format!("{}: fetcher exited 0 but produced no audio file", strategy.name);
                        tracing::warn!(strategy = strategy.name, "fetch produced no file");
                        attempts.push(diag);
                    }
                },
                Err(err @ TsError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(strategy = strategy.name, error = %err, "fetch attempt failed");
                    attempts.push(format!("{}: {err}", strategy.name));
                }
            }
        }

        let last_error = attempts
            .last()
            .cloned()
            .unwrap_or_else(|| "no applicable strategies".to_owned());
        Err(TsError::AcquisitionFailed {
            attempts,
            last_error,
        })
    }

    fn fetch_args(
        &self,
        source_ref: &str,
        strategy: DownloadStrategy,
        cookie_file: Option<&CookieFile>,
        attempt_dir: &Path,
    ) -> Vec<String> {
        let template = attempt_dir.join("audio.%(ext)s");
        let mut args = vec![
            source_ref.to_owned(),
            "-f".to_owned(),
            "bestaudio/best".to_owned(),
            "--no-playlist".to_owned(),
            "-x".to_owned(),
            "--audio-format".to_owned(),
            "wav".to_owned(),
            "--audio-quality".to_owned(),
            "0".to_owned(),
            "-o".to_owned(),
            template.display().to_string(),
            "--no-check-certificate".to_owned(),
            "--socket-timeout".to_owned(),
            "30".to_owned(),
            "--retries".to_owned(),
            "3".to_owned(),
            "--user-agent".to_owned(),
            DESKTOP_USER_AGENT.to_owned(),
            "--extractor-args".to_owned(),
            format!("youtube:player_client={}", strategy.player_client),
        ];
        if strategy.requires_auth {
            if let Some(jar) = cookie_file {
                args.push("--cookies".to_owned());
                args.push(jar.path().display().to_string());
            }
        }
        args
    }
}

/// Locate the fetched artifact matching the output template. Whether the
/// artifact is actually usable audio is decided by `AudioAsset::from_path`,
/// so a bogus entry surfaces as that strategy's diagnostic.
fn find_fetched_audio(attempt_dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(attempt_dir).ok()?;
    entries
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.file_stem()
                .is_some_and(|stem| stem.to_string_lossy() == "audio")
        })
}

/// Download a precomputed audio URL directly, bypassing the strategy table.
pub fn download_direct(url: &str, work_dir: &Path) -> TsResult<AudioAsset> {
    tracing::info!(url, "downloading precomputed audio");
    let client = reqwest::blocking::Client::builder()
        .timeout(DIRECT_DOWNLOAD_TIMEOUT)
        .build()?;
    let response = client.get(url).send()?.error_for_status()?;
    let bytes = response.bytes()?;

    let path = work_dir.join("direct_audio.wav");
    let mut file = fs::File::create(&path)?;
    file.write_all(&bytes)?;
    AudioAsset::from_path(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_runs_skip_auth_strategies() {
        let strategies = AcquisitionCoordinator::applicable_strategies(false);
        let names: Vec<_> = strategies.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["ios", "android", "web"]);
    }

    #[test]
    fn authenticated_runs_lead_with_auth_strategies() {
        let strategies = AcquisitionCoordinator::applicable_strategies(true);
        let names: Vec<_> = strategies.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["web-auth", "tv-auth", "ios", "android", "web"]);
    }

    #[test]
    fn fetch_args_carry_client_identity_and_cookies_flag() {
        let coordinator = AcquisitionCoordinator::new("yt-dlp", STRATEGY_TIMEOUT);
        let dir = tempfile::tempdir().expect("tempdir");
        let args = coordinator.fetch_args(
            "https://x/watch?v=abc12345678",
            STRATEGIES[3],
            None,
            dir.path(),
        );
        assert!(args.contains(&"youtube:player_client=android".to_owned()));
        assert!(!args.contains(&"--cookies".to_owned()));
    }

    #[test]
    fn find_fetched_audio_matches_template_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(find_fetched_audio(dir.path()).is_none());

        fs::write(dir.path().join("audio.wav"), b"wav").expect("write");
        fs::write(dir.path().join("other.wav"), b"wav").expect("write");
        let found = find_fetched_audio(dir.path()).expect("found");
        assert_eq!(found.file_name().unwrap(), "audio.wav");
    }
}
