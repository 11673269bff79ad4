//! Shared test doubles: mock engines, an in-memory blob store, and mock
//! fetch scripts standing in for the external downloader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tubescribe::backend::{group_words_into_segments, Engine};
use tubescribe::cache::BlobStore;
use tubescribe::error::{TsError, TsResult};
use tubescribe::model::{BackendKind, TranscriptionResult, Word};
use tubescribe::orchestrator::CancellationToken;

/// What a [`MockEngine`] does when invoked.
#[allow(dead_code)]
pub enum MockBehavior {
    /// Return a valid result with the given words.
    Succeed(Vec<(&'static str, f64, f64)>),
    /// Return an error.
    Fail(&'static str),
    /// Return a structurally empty (invalid) result.
    Empty,
}

pub struct MockEngine {
    pub kind: BackendKind,
    pub service: &'static str,
    pub available: bool,
    pub behavior: MockBehavior,
    /// Shared so callers can observe invocation counts after boxing.
    pub calls: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new(kind: BackendKind, service: &'static str, behavior: MockBehavior) -> Self {
        Self {
            kind,
            service,
            available: true,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Engine for MockEngine {
    fn name(&self) -> &'static str {
        self.service
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn run(
        &self,
        _audio_path: &Path,
        _work_dir: &Path,
        _timeout: Duration,
        _token: &CancellationToken,
    ) -> TsResult<TranscriptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Succeed(words) => {
                let words: Vec<Word> = words
                    .iter()
                    .map(|(text, start, end)| Word {
                        text: (*text).to_owned(),
                        start: *start,
                        end: *end,
                        confidence: 0.9,
                    })
                    .collect();
                let duration = words.last().map_or(0.0, |w| w.end);
                Ok(TranscriptionResult {
                    segments: group_words_into_segments(words),
                    language: Some("en".to_owned()),
                    language_confidence: Some(0.98),
                    duration_seconds: duration,
                })
            }
            MockBehavior::Fail(message) => {
                Err(TsError::BackendUnavailable((*message).to_owned()))
            }
            MockBehavior::Empty => Ok(TranscriptionResult {
                segments: vec![],
                language: None,
                language_confidence: None,
                duration_seconds: 0.0,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory blob store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl BlobStore for MemoryStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Option<String> {
        self.blobs
            .lock()
            .expect("lock")
            .insert(key.to_owned(), bytes.to_vec());
        Some(format!("mem://{key}"))
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().expect("lock").get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Mock fetch scripts
// ---------------------------------------------------------------------------

/// Write an executable shell script that mimics the external fetcher.
///
/// The script extracts the `-o` output template and the `--extractor-args`
/// client identity from its arguments, appends the identity to
/// `invocations.log` next to the script itself, and then either produces
/// an `audio.wav` (success) or exits 1 (failure).
#[cfg(unix)]
#[allow(dead_code)]
pub fn write_fetch_script(dir: &Path, succeed: bool) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let log_path = dir.join("invocations.log");
    let body = format!(
        r#"#!/bin/sh
out=""
extractor=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  if [ "$prev" = "--extractor-args" ]; then extractor="$arg"; fi
  prev="$arg"
done
attempt_dir=$(dirname "$out")
echo "$extractor" >> "{log}"
{action}
"#,
        log = log_path.display(),
        action = if succeed {
            r#"printf 'RIFFfakewav' > "$attempt_dir/audio.wav"
exit 0"#
        } else {
            r#"echo 'ERROR: sign in to confirm you are not a bot' >&2
exit 1"#
        }
    );

    let path = dir.join(if succeed { "fetch_ok.sh" } else { "fetch_fail.sh" });
    std::fs::write(&path, body).expect("write fetch script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fetch script");
    path
}

/// Like [`write_fetch_script`], but the "successful" fetch leaves a
/// directory where the audio file should be, so the artifact exists yet
/// cannot be read as audio.
#[cfg(unix)]
#[allow(dead_code)]
pub fn write_fetch_script_dir_artifact(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let log_path = dir.join("invocations.log");
    let body = format!(
        r#"#!/bin/sh
out=""
extractor=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  if [ "$prev" = "--extractor-args" ]; then extractor="$arg"; fi
  prev="$arg"
done
attempt_dir=$(dirname "$out")
echo "$extractor" >> "{log}"
mkdir "$attempt_dir/audio.wav"
exit 0
"#,
        log = log_path.display(),
    );

    let path = dir.join("fetch_dir_artifact.sh");
    std::fs::write(&path, body).expect("write fetch script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fetch script");
    path
}

/// Read the client identities recorded by the mock fetcher, in order.
#[allow(dead_code)]
pub fn read_invocations(work_dir: &Path) -> Vec<String> {
    std::fs::read_to_string(work_dir.join("invocations.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}
