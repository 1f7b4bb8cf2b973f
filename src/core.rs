use serde::Serialize;
use std::{
    fs,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::StorageError;

/// Monotonic counter for generating unique temp/backup file suffixes.
static FILE_SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn restrict_file_permissions(path: &Path) {
    if path.exists() {
        if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::debug!(?path, %error, "failed to restrict file permissions");
        }
    }
}

/// Replaces the stream URL's query (which carries the client token) before
/// it reaches a log line.
pub fn redact_ws_url(url: &str) -> String {
    let mut parsed = match reqwest::Url::parse(url) {
        Ok(url) => url,
        Err(_) => return "<invalid-url>".to_string(),
    };
    if parsed.query().is_some() {
        parsed.set_query(Some("token=***"));
    }
    parsed.to_string()
}

pub fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub fn unix_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn unique_time_suffix() -> u64 {
    FILE_SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Writes `value` next to `path` and renames it into place so readers never
/// observe a half-written document.
pub fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
    what: &'static str,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::Write { what, source })?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|source| StorageError::Serialize { what, source })?;
    let tmp_path = path.with_extension(format!("tmp-{}", unique_time_suffix()));
    fs::write(&tmp_path, content).map_err(|source| StorageError::Write { what, source })?;
    restrict_file_permissions(&tmp_path);
    fs::rename(&tmp_path, path).map_err(|source| StorageError::Write { what, source })
}

/// Moves an unreadable document aside so the next write starts fresh.
pub fn back_up_corrupt_file(path: &Path) -> Option<PathBuf> {
    let backup_path = path.with_extension(format!("corrupt-{}.json", unique_time_suffix()));
    match fs::rename(path, &backup_path) {
        Ok(()) => {
            tracing::warn!(backup = %backup_path.display(), "moved corrupt file aside");
            Some(backup_path)
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to back up corrupt file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_token_query() {
        let redacted = redact_ws_url("wss://push.example.com/stream?token=secret123456");
        assert_eq!(redacted, "wss://push.example.com/stream?token=***");
        assert!(!redacted.contains("secret"));
    }

    #[test]
    fn redaction_leaves_urls_without_query_alone() {
        assert_eq!(
            redact_ws_url("ws://localhost:8080/stream"),
            "ws://localhost:8080/stream"
        );
        assert_eq!(redact_ws_url("not a url"), "<invalid-url>");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_message("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_message("short", 10), "short");
    }

    #[test]
    fn atomic_write_replaces_content_and_restricts_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc.json");
        write_json_atomic(&path, &vec![1, 2, 3], "test document").expect("first write");
        write_json_atomic(&path, &vec![4], "test document").expect("second write");

        let content = fs::read_to_string(&path).expect("read back");
        let parsed: Vec<i32> = serde_json::from_str(&content).expect("parse");
        assert_eq!(parsed, vec![4]);
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let leftovers = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .map(|e| e.file_name().to_string_lossy().contains("tmp-"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
