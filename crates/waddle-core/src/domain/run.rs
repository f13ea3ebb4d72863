//! Run identity and per-run execution trace.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

const RUN_ID_SECONDS_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Time-derived identifier of one pipeline execution, e.g. `20250314_093012_004521`.
///
/// Run ids sort lexicographically in creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Format a run id from a timestamp (microsecond precision).
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y%m%d_%H%M%S_%6f").to_string())
    }

    /// Wrap an existing id, e.g. a directory name read back from disk.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The wall-clock time encoded in the id, if it has the standard shape.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let (seconds, micros) = self.0.rsplit_once('_')?;
        if micros.len() != 6 || !micros.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let micros: i64 = micros.parse().ok()?;
        let naive = NaiveDateTime::parse_from_str(seconds, RUN_ID_SECONDS_FORMAT).ok()?;
        Some(naive.and_utc() + Duration::microseconds(micros))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hands out run ids that strictly increase within a process, even when two
/// runs start within the same microsecond.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl RunIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> RunId {
        self.next_at(Utc::now())
    }

    /// Next id given the current time `now`.
    pub fn next_at(&self, now: DateTime<Utc>) -> RunId {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut at = now.trunc_subsecs(6);
        if let Some(prev) = *last {
            if at <= prev {
                at = prev + Duration::microseconds(1);
            }
        }
        *last = Some(at);
        RunId::from_timestamp(at)
    }
}

/// Human-readable execution trace accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Append a titled block of captured output; empty bodies are skipped.
    pub fn section(&mut self, heading: &str, body: &str) {
        let body = body.trim_end();
        if body.is_empty() {
            return;
        }
        self.lines.push(format!("{heading}:"));
        self.lines.push(body.to_string());
    }

    pub fn warning(&mut self, message: impl fmt::Display) {
        self.lines.push(format!("Warning: {message}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn joined(&self) -> String {
        self.lines.join("\n")
    }
}
