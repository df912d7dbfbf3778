//! Plan Feedback
//!
//! Users rate planning results after the fact. Feedback is validated, stamped
//! and handed to a [`FeedbackSink`]; the default sink appends one JSON line
//! per record to a daily file:
//!
//! ```text
//! {feedback_dir}/feedback-2026-10-19.jsonl
//! ```
//!
//! Submission is fire-and-forget from the caller's point of view: a failed
//! write is logged, never surfaced to the user who left the feedback.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::request::Fingerprint;

/// Maximum comment length in characters
pub const MAX_COMMENT_CHARS: usize = 4096;

/// Feedback errors
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Comment exceeds {MAX_COMMENT_CHARS} characters")]
    CommentTooLong,

    #[error("Feedback must include a rating or a comment")]
    Empty,

    #[error("Failed to encode feedback: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write feedback to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Feedback as submitted by a client
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackSubmission {
    /// Fingerprint of the plan being rated
    pub fingerprint: String,
    /// Rating from 1 (poor) to 5 (excellent)
    #[serde(default)]
    pub rating: Option<u8>,
    /// Free-text comment
    #[serde(default)]
    pub comment: Option<String>,
    /// The result the user saw, if the client wants to attach it
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl FeedbackSubmission {
    /// Validate and stamp a submission
    ///
    /// # Errors
    ///
    /// Returns `FeedbackError` if any field is out of range.
    pub fn into_record(self, received_at: DateTime<Utc>) -> Result<FeedbackRecord, FeedbackError> {
        let fingerprint = Fingerprint::parse(self.fingerprint.trim())
            .ok_or_else(|| FeedbackError::InvalidFingerprint(self.fingerprint.clone()))?;

        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(FeedbackError::InvalidRating(rating));
            }
        }

        let comment = self
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS)
        {
            return Err(FeedbackError::CommentTooLong);
        }
        if self.rating.is_none() && comment.is_none() {
            return Err(FeedbackError::Empty);
        }

        Ok(FeedbackRecord {
            fingerprint,
            rating: self.rating,
            comment,
            result: self.result,
            received_at,
        })
    }
}

/// Validated feedback, as persisted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub fingerprint: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

/// Destination for feedback records
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Persist one record
    async fn record(&self, feedback: &FeedbackRecord) -> Result<(), FeedbackError>;
}

/// Appends feedback as JSON lines, one file per UTC day
#[derive(Debug)]
pub struct FileFeedbackSink {
    dir: PathBuf,
    /// Serializes appends so concurrent lines never interleave
    write_lock: Mutex<()>,
}

impl FileFeedbackSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the feedback files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a record received at `at` is appended to
    #[must_use]
    pub fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("feedback-{}.jsonl", at.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl FeedbackSink for FileFeedbackSink {
    async fn record(&self, feedback: &FeedbackRecord) -> Result<(), FeedbackError> {
        let mut line = serde_json::to_vec(feedback)?;
        line.push(b'\n');
        let path = self.file_for(feedback.received_at);
        let io_error = |source| FeedbackError::Io {
            path: path.clone(),
            source,
        };

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;
        file.write_all(&line).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;

        tracing::debug!(
            fingerprint = %feedback.fingerprint.short(),
            path = %path.display(),
            "Feedback recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fingerprint() -> String {
        Fingerprint::of_bytes(b"plan").to_string()
    }

    fn submission(rating: Option<u8>, comment: Option<&str>) -> FeedbackSubmission {
        FeedbackSubmission {
            fingerprint: fingerprint(),
            rating,
            comment: comment.map(String::from),
            result: None,
        }
    }

    #[test]
    fn test_validation() {
        let now = Utc::now();
        assert!(submission(Some(5), None).into_record(now).is_ok());
        assert!(submission(None, Some("route crosses a river")).into_record(now).is_ok());
        assert!(matches!(
            submission(Some(0), None).into_record(now),
            Err(FeedbackError::InvalidRating(0))
        ));
        assert!(matches!(
            submission(None, Some("   ")).into_record(now),
            Err(FeedbackError::Empty)
        ));
        assert!(matches!(
            submission(Some(3), Some(&"x".repeat(MAX_COMMENT_CHARS + 1))).into_record(now),
            Err(FeedbackError::CommentTooLong)
        ));

        let mut bad = submission(Some(3), None);
        bad.fingerprint = "not-a-fingerprint".into();
        assert!(matches!(
            bad.into_record(now),
            Err(FeedbackError::InvalidFingerprint(_))
        ));
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let sink = FileFeedbackSink::new(dir.path().join("nested"));
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        let first = submission(Some(4), Some("good")).into_record(at).unwrap();
        let second = submission(Some(2), None).into_record(at).unwrap();
        sink.record(&first).await.unwrap();
        sink.record(&second).await.unwrap();

        let path = sink.file_for(at);
        assert!(path.ends_with("feedback-2026-10-19.jsonl"));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<FeedbackRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records, vec![first, second]);
    }
}
