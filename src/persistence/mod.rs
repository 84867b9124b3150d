//! Shared persistence primitives: atomic JSON snapshot writes and
//! append-only newline-delimited files.
//!
//! Grounded on `examples/Zuytan-rustrade/src/infrastructure/settings_persistence.rs`'s
//! write-to-temp-then-rename pattern.

use crate::domain::PersistenceError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Atomically write `value` as pretty JSON to `path`.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::Write {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
    }

    let content = serde_json::to_string_pretty(value).map_err(|e| PersistenceError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| PersistenceError::Write {
            path: tmp_path.display().to_string(),
            reason: e.to_string(),
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

/// Read and parse a JSON snapshot, returning `None` if it does not exist.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PersistenceError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    let value = serde_json::from_str(&content).map_err(|e| PersistenceError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(value))
}

/// Append a single JSON-serialized record followed by a newline.
pub async fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::Write {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
    }
    let mut line = serde_json::to_string(record).map_err(|e| PersistenceError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    file.flush().await.map_err(|e| PersistenceError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Read all newline-delimited JSON records from `path`, skipping blank lines.
/// Returns an empty vector if the file does not exist.
pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PersistenceError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| PersistenceError::Parse {
            path: format!("{} (line {})", path.display(), line_no + 1),
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile_shim::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    // Minimal self-contained temp-dir helper so we do not need an extra
    // dev-dependency just for this module's tests.
    mod tempfile_shim {
        use std::path::PathBuf;

        pub struct TempDir(pub PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("spotcore-test-{}", uuid::Uuid::new_v4()));
                std::fs::create_dir_all(&path).unwrap();
                Self(path)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[tokio::test]
    async fn json_round_trip() {
        let dir = TempDir::new();
        let path = dir.path().join("state.json");
        let value = Sample {
            a: 1,
            b: "hello".to_string(),
        };
        write_json_atomic(&path, &value).await.unwrap();
        let loaded: Option<Sample> = read_json_opt(&path).await.unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn jsonl_append_and_read_back() {
        let dir = TempDir::new();
        let path = dir.path().join("ledger.jsonl");
        append_jsonl(&path, &Sample { a: 1, b: "x".into() })
            .await
            .unwrap();
        append_jsonl(&path, &Sample { a: 2, b: "y".into() })
            .await
            .unwrap();

        let records: Vec<Sample> = read_jsonl(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].a, 1);
        assert_eq!(records[1].a, 2);
    }

    #[tokio::test]
    async fn missing_json_file_returns_none() {
        let dir = TempDir::new();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = read_json_opt(&path).await.unwrap();
        assert_eq!(loaded, None);
    }
}
