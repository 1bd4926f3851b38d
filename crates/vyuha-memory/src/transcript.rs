// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only session transcripts, one JSONL file per `(project, session)`.
//!
//! Records are written in turn order and read back verbatim; field names are
//! part of the on-disk format and must never be renamed.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MemoryError;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_number: u32,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed transcript store.
pub struct TranscriptLog {
    base: PathBuf,
}

impl TranscriptLog {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path(&self, project: &str, session_id: &str) -> PathBuf {
        self.base
            .join("transcripts")
            .join(sanitize(project))
            .join(format!("{}.jsonl", sanitize(session_id)))
    }

    /// Append one turn to the session log, creating it on first write.
    pub fn append(
        &self,
        project: &str,
        session_id: &str,
        record: &TurnRecord,
    ) -> Result<(), MemoryError> {
        let path = self.path(project, session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read the full ordered turn list of a session.  A session that was
    /// never written reads as empty.
    pub fn read(&self, project: &str, session_id: &str) -> Result<Vec<TurnRecord>, MemoryError> {
        let path = self.path(project, session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    /// Session ids recorded for a project, sorted.  Unknown projects list as
    /// empty.
    pub fn list_sessions(&self, project: &str) -> Result<Vec<String>, MemoryError> {
        let dir = self.base.join("transcripts").join(sanitize(project));
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.path().file_stem() {
                sessions.push(name.to_string_lossy().to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

/// Make a key safe to use as a file-system component.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32, role: &str, content: &str) -> TurnRecord {
        TurnRecord {
            turn_number: n,
            role: role.into(),
            content: content.into(),
            agent: None,
            model: Some("mock-model".into()),
            tool_calls: None,
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn write_then_read_yields_exact_ordered_list() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        let records = vec![
            record(1, "user", "hello"),
            record(2, "assistant", "hi there"),
            record(3, "user", "bye"),
        ];
        for r in &records {
            log.append("proj", "sess-1", r).unwrap();
        }
        let back = log.read("proj", "sess-1").unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn unknown_session_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        assert!(log.read("proj", "nope").unwrap().is_empty());
    }

    #[test]
    fn list_sessions_empty_for_unknown_project() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        assert!(log.list_sessions("ghost").unwrap().is_empty());
    }

    #[test]
    fn list_sessions_returns_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        log.append("proj", "b", &record(1, "user", "x")).unwrap();
        log.append("proj", "a", &record(1, "user", "y")).unwrap();
        assert_eq!(log.list_sessions("proj").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn sessions_are_isolated_per_project() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        log.append("p1", "s", &record(1, "user", "one")).unwrap();
        log.append("p2", "s", &record(1, "user", "two")).unwrap();
        assert_eq!(log.read("p1", "s").unwrap()[0].content, "one");
        assert_eq!(log.read("p2", "s").unwrap()[0].content, "two");
    }

    #[test]
    fn tool_calls_field_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        let mut r = record(1, "assistant", "calling");
        r.tool_calls = Some(vec![serde_json::json!({"name": "read", "id": "c1"})]);
        log.append("proj", "s", &r).unwrap();
        assert_eq!(log.read("proj", "s").unwrap()[0], r);
    }

    #[test]
    fn weird_keys_are_sanitized_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        log.append("a/b", "s:1", &record(1, "user", "x")).unwrap();
        assert_eq!(log.read("a/b", "s:1").unwrap().len(), 1);
    }
}
