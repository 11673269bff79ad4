//! Credential provisioning for the audio-fetch collaborator.
//!
//! The upstream source varies behavior by authentication state, so runs may
//! carry a Netscape-format cookie jar supplied as an environment blob
//! (plain text or base64). Only records that are still valid at provision
//! time are materialized; the resulting file is owner-read-only and removed
//! when the run's `CookieFile` guard drops.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;

use crate::error::TsResult;

/// One validated Netscape cookie record.
///
/// Invariant: `expires_at_unix` is strictly greater than the clock at
/// validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub expires_at_unix: i64,
    pub name: String,
    pub value: String,
}

impl CookieRecord {
    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            if self.include_subdomains {
                "TRUE"
            } else {
                "FALSE"
            },
            self.path,
            if self.secure { "TRUE" } else { "FALSE" },
            self.expires_at_unix,
            self.name,
            self.value
        )
    }
}

/// A materialized cookie jar, deleted on drop.
///
/// Cleanup is a scoped-resource contract: the file disappears on every exit
/// path of the owning run, not just the happy one.
#[derive(Debug)]
pub struct CookieFile {
    path: PathBuf,
    record_count: usize,
}

impl CookieFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

impl Drop for CookieFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove cookie file");
            }
        }
    }
}

/// Turn the raw environment blob into a usable cookie file.
///
/// - `None` / empty input yields `Ok(None)`: callers proceed without
///   authentication, this is not an error.
/// - Base64 decoding is attempted first; on failure the input is treated as
///   already-decoded text. Decode ambiguity never fails the call.
/// - Records with fewer than 7 tab-separated fields, or whose expiration
///   field does not parse, or which are already expired, are silently
///   dropped.
/// - Zero surviving records yields `Ok(None)`, never a partial jar.
pub fn provision(raw_blob: Option<&str>, work_dir: &Path) -> TsResult<Option<CookieFile>> {
    let raw = match raw_blob.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => return Ok(None),
    };

    let decoded = decode_blob(raw);
    let now = Utc::now().timestamp();
    let records = parse_cookie_records(&decoded, now);
    if records.is_empty() {
        tracing::warn!("credential blob contained no unexpired cookie records");
        return Ok(None);
    }

    let path = work_dir.join("cookies.txt");
    let mut body = String::from("# Netscape HTTP Cookie File\n");
    for record in &records {
        body.push_str(&record.to_line());
        body.push('\n');
    }
    fs::write(&path, body)?;
    restrict_permissions(&path)?;

    tracing::info!(records = records.len(), "provisioned cookie jar");
    Ok(Some(CookieFile {
        path,
        record_count: records.len(),
    }))
}

fn decode_blob(raw: &str) -> String {
    match BASE64.decode(raw.trim()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => raw.to_owned(),
        },
        Err(_) => raw.to_owned(),
    }
}

/// Parse Netscape cookie lines, keeping only records that expire after
/// `now`. Comment lines and malformed lines are skipped, not fatal.
pub fn parse_cookie_records(text: &str, now: i64) -> Vec<CookieRecord> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            let expires_at_unix = fields[4].parse::<i64>().ok()?;
            if expires_at_unix <= now {
                return None;
            }
            Some(CookieRecord {
                domain: fields[0].to_owned(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: fields[2].to_owned(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                expires_at_unix,
                name: fields[5].to_owned(),
                value: fields[6].to_owned(),
            })
        })
        .collect()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> TsResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> TsResult<()> {
    Ok(())
}
