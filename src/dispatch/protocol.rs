//! Progress protocol spoken by download workers.
//!
//! Each worker writes one JSON object per line to stdout:
//!
//! ```text
//! {"type":"start","plugin":"akismet","download_path":"plugins/akismet.zip","download_url":"https://..."}
//! {"type":"done","plugin":"akismet"}
//! {"type":"fail","plugin":"akismet"}
//! {"type":"error","details":"..."}
//! ```

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// One progress update from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "start")]
    Started {
        #[serde(rename = "plugin")]
        item: String,
        download_path: PathBuf,
        download_url: String,
    },

    #[serde(rename = "done")]
    Done {
        #[serde(rename = "plugin")]
        item: String,
    },

    #[serde(rename = "fail")]
    Failed {
        #[serde(rename = "plugin")]
        item: String,
    },

    /// The worker hit a condition it cannot report per item.
    #[serde(rename = "error")]
    Error { details: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid progress update message: {line}: {source}")]
    Malformed {
        line: String,
        source: serde_json::Error,
    },

    #[error("Invalid progress update message: {line}: empty plugin name")]
    EmptyItem { line: String },

    #[error("Progress update for {item} exceeds the {total} queued items")]
    Overreported { item: String, total: usize },

    #[error("Progress update for {item}, which was not queued")]
    UnknownItem { item: String },
}

impl ProgressEvent {
    /// Parse one protocol line. Unknown tags and missing fields are errors.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let event: ProgressEvent =
            serde_json::from_str(line).map_err(|source| ProtocolError::Malformed {
                line: line.to_string(),
                source,
            })?;

        if event.item().is_some_and(str::is_empty) {
            return Err(ProtocolError::EmptyItem {
                line: line.to_string(),
            });
        }
        Ok(event)
    }

    /// The item this event is about; `None` for worker errors.
    pub fn item(&self) -> Option<&str> {
        match self {
            ProgressEvent::Started { item, .. }
            | ProgressEvent::Done { item }
            | ProgressEvent::Failed { item } => Some(item),
            ProgressEvent::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let event = ProgressEvent::parse(
            r#"{"type":"start","plugin":"akismet","download_path":"plugins/akismet.zip","download_url":"https://downloads.example.org/akismet.zip"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ProgressEvent::Started {
                item: "akismet".into(),
                download_path: PathBuf::from("plugins/akismet.zip"),
                download_url: "https://downloads.example.org/akismet.zip".into(),
            }
        );
    }

    #[test]
    fn test_parse_done_and_fail() {
        assert_eq!(
            ProgressEvent::parse(r#"{"type":"done","plugin":"a"}"#).unwrap(),
            ProgressEvent::Done { item: "a".into() }
        );
        assert_eq!(
            ProgressEvent::parse("  {\"type\":\"fail\",\"plugin\":\"b\"}\n").unwrap(),
            ProgressEvent::Failed { item: "b".into() }
        );
    }

    #[test]
    fn test_parse_error_needs_no_plugin() {
        let event = ProgressEvent::parse(r#"{"type":"error","details":"disk full"}"#).unwrap();
        assert_eq!(
            event,
            ProgressEvent::Error {
                details: "disk full".into()
            }
        );
        assert_eq!(event.item(), None);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let event =
            ProgressEvent::parse(r#"{"type":"done","plugin":"a","elapsed":1.5}"#).unwrap();
        assert_eq!(event.item(), Some("a"));
    }

    #[test]
    fn test_rejects_missing_plugin() {
        let err = ProgressEvent::parse(r#"{"type":"done"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_rejects_empty_plugin() {
        let err = ProgressEvent::parse(r#"{"type":"fail","plugin":""}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyItem { .. }));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = ProgressEvent::parse(r#"{"type":"skipped","plugin":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
        assert!(err.to_string().contains("skipped"));
    }

    #[test]
    fn test_rejects_start_without_download_fields() {
        let err = ProgressEvent::parse(r#"{"type":"start","plugin":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(ProgressEvent::parse("").is_err());
        assert!(ProgressEvent::parse("Downloading akismet...").is_err());
        assert!(ProgressEvent::parse("[1,2,3]").is_err());
    }
}
