//! Strategy-table acquisition exercised against a scripted mock fetcher.

#![cfg(unix)]

mod helpers;

use std::time::Duration;

use tubescribe::acquire::AcquisitionCoordinator;
use tubescribe::credentials;
use tubescribe::error::TsError;
use tubescribe::orchestrator::CancellationToken;
use tubescribe::telemetry::NullSink;

use helpers::{read_invocations, write_fetch_script, write_fetch_script_dir_artifact};

const SOURCE: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

fn coordinator_for(script: &std::path::Path) -> AcquisitionCoordinator {
    AcquisitionCoordinator::new(script.display().to_string(), Duration::from_secs(30))
}

#[test]
fn first_successful_strategy_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fetch_script(dir.path(), true);

    let asset = coordinator_for(&script)
        .acquire(
            SOURCE,
            None,
            dir.path(),
            &NullSink,
            &CancellationToken::no_deadline(),
        )
        .expect("acquisition succeeds");

    assert!(asset.path.is_file());
    assert_eq!(asset.path.file_name().unwrap(), "audio.wav");
    // Only the first unauthenticated client identity was tried.
    assert_eq!(
        read_invocations(dir.path()),
        vec!["youtube:player_client=ios"]
    );
}

#[test]
fn exhausted_strategies_aggregate_every_diagnostic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fetch_script(dir.path(), false);

    let err = coordinator_for(&script)
        .acquire(
            SOURCE,
            None,
            dir.path(),
            &NullSink,
            &CancellationToken::no_deadline(),
        )
        .expect_err("every strategy fails");

    match err {
        TsError::AcquisitionFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts.len(), 3);
            assert!(attempts[0].starts_with("ios:"));
            assert!(attempts[1].starts_with("android:"));
            assert!(attempts[2].starts_with("web:"));
            assert!(last_error.starts_with("web:"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(
        read_invocations(dir.path()),
        vec![
            "youtube:player_client=ios",
            "youtube:player_client=android",
            "youtube:player_client=web",
        ]
    );
}

#[test]
fn cookie_jar_unlocks_authenticated_strategies_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fetch_script(dir.path(), false);

    let cookies = ".youtube.com\tTRUE\t/\tTRUE\t9999999999\tSID\tsession-value";
    let jar = credentials::provision(Some(cookies), dir.path())
        .expect("provisioning succeeds")
        .expect("one valid cookie record");

    let err = coordinator_for(&script)
        .acquire(
            SOURCE,
            Some(&jar),
            dir.path(),
            &NullSink,
            &CancellationToken::no_deadline(),
        )
        .expect_err("mock fetcher always fails");

    assert!(matches!(err, TsError::AcquisitionFailed { .. }));
    // Authenticated identities lead the attempt order.
    assert_eq!(
        read_invocations(dir.path()),
        vec![
            "youtube:player_client=web",
            "youtube:player_client=tv_embedded",
            "youtube:player_client=ios",
            "youtube:player_client=android",
            "youtube:player_client=web",
        ]
    );
}

#[test]
fn unusable_artifact_becomes_a_diagnostic_not_an_abort() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_fetch_script_dir_artifact(dir.path());

    let err = coordinator_for(&script)
        .acquire(
            SOURCE,
            None,
            dir.path(),
            &NullSink,
            &CancellationToken::no_deadline(),
        )
        .expect_err("every artifact is unusable");

    // The walk continues past each bad artifact instead of aborting on the
    // first one.
    match err {
        TsError::AcquisitionFailed { attempts, .. } => {
            assert_eq!(attempts.len(), 3);
            assert!(attempts
                .iter()
                .all(|diag| diag.contains("fetched audio unusable")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(read_invocations(dir.path()).len(), 3);
}

#[test]
fn missing_fetcher_binary_fails_every_strategy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator =
        AcquisitionCoordinator::new("definitely-not-a-real-fetcher", Duration::from_secs(5));

    let err = coordinator
        .acquire(
            SOURCE,
            None,
            dir.path(),
            &NullSink,
            &CancellationToken::no_deadline(),
        )
        .expect_err("fetcher missing");
    assert!(matches!(err, TsError::AcquisitionFailed { .. }));
}
