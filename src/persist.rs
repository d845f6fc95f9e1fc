//! Atomic JSON persistence shared by the on-disk caches
//!
//! Writes go to a temp file in the destination directory and are renamed
//! into place, so readers never observe a half-written document. The file
//! is left world-writable: containers running under other uids update the
//! same caches through the bind mount.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Permission errors are retried this many times before giving up.
const PERMISSION_RETRIES: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Read a JSON document, returning `None` when the file does not exist.
///
/// Malformed JSON is an error: a corrupt cache must not be silently replaced.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match with_permission_retry(|| fs::read_to_string(path)) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed JSON in {}", path.display()))?;
    Ok(Some(value))
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    write_atomic(path, body.as_bytes())
}

/// Atomically replace `path` with `bytes` (temp file + rename, mode 0666).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    with_permission_retry(|| {
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o666))?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    })
    .with_context(|| format!("Failed to write {}", path.display()))
}

fn with_permission_retry<T>(mut op: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.kind() == ErrorKind::PermissionDenied && attempt < PERMISSION_RETRIES => {
                attempt += 1;
                tracing::debug!("permission denied, retry {}/{}", attempt, PERMISSION_RETRIES);
                thread::sleep(RETRY_DELAY);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<BTreeMap<String, bool>> =
            read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), true);
        write_json_atomic(&path, &map).unwrap();

        let back: BTreeMap<String, bool> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, map);

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o666, 0o666);
    }

    #[test]
    fn test_malformed_json_is_loud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let result: Result<Option<BTreeMap<String, bool>>> = read_json(&path);
        assert!(result.is_err());
    }
}
