// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Rule-set file writer.
//!
//! Every document lands in a fresh `policy_{YYYYMMDD_HHMMSS_micros}.rego`
//! file opened with create-new semantics; earlier files are never touched.

use crate::domain::rule_set::schema;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CREATE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
#[error("Failed to write rule-set into {dir:?}: {source}")]
pub struct RuleFileError {
    pub dir: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone)]
pub struct RuleSetFileWriter {
    output_dir: PathBuf,
}

impl RuleSetFileWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_name_at(timestamp: chrono::DateTime<Utc>) -> String {
        format!(
            "policy_{}.{}",
            timestamp.format("%Y%m%d_%H%M%S_%6f"),
            schema::FILE_EXTENSION
        )
    }

    /// Write `text` into a new file and return its path.
    pub async fn write(&self, text: &str) -> Result<PathBuf, RuleFileError> {
        let to_error = |source: std::io::Error| RuleFileError {
            dir: self.output_dir.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(to_error)?;

        let mut last_collision = None;
        for _ in 0..CREATE_ATTEMPTS {
            let path = self.output_dir.join(Self::file_name_at(Utc::now()));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(text.as_bytes()).await.map_err(to_error)?;
                    file.flush().await.map_err(to_error)?;
                    debug!(path = %path.display(), bytes = text.len(), "Wrote rule-set");
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    last_collision = Some(e);
                    tokio::time::sleep(std::time::Duration::from_micros(1)).await;
                }
                Err(e) => return Err(to_error(e)),
            }
        }
        Err(to_error(last_collision.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "rule-set file name collision")
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap() + chrono::Duration::microseconds(89);
        assert_eq!(RuleSetFileWriter::file_name_at(at), "policy_20260304_050607_000089.rego");
    }

    #[tokio::test]
    async fn test_write_creates_dir_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RuleSetFileWriter::new(dir.path().join("nested").join("policies"));

        let first = writer.write("package a\n").await.unwrap();
        let second = writer.write("package b\n").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "package a\n");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "package b\n");
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("policy_"));
    }
}
