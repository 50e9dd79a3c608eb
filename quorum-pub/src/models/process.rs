//! Publication process record
//!
//! A process is the persisted trace of one publication run: its lifecycle
//! state and an NDJSON log (one `{content, level, date}` object per line).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Kind of work a process performs
pub const PROCESS_MODE_CORPUS_EXPORT: &str = "corpus_export";

/// Process lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Created,
    Running,
    Completed,
    Error,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Created => "created",
            ProcessState::Running => "running",
            ProcessState::Completed => "completed",
            ProcessState::Error => "error",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Error)
    }
}

impl FromStr for ProcessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ProcessState::Created),
            "running" => Ok(ProcessState::Running),
            "completed" => Ok(ProcessState::Completed),
            "error" => Ok(ProcessState::Error),
            other => Err(format!("Unknown process state: {}", other)),
        }
    }
}

/// Severity of a process log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One line of a process log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub content: String,
    pub level: LogLevel,
    pub date: DateTime<Utc>,
}

/// Persisted publication run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: Uuid,
    pub name: String,
    pub mode: String,
    pub state: ProcessState,
    pub configuration: serde_json::Value,
    pub project_id: Uuid,
    pub logs: String,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

impl Process {
    /// Decode the NDJSON log, ignoring lines that do not parse
    pub fn parsed_logs(&self) -> Vec<LogEntry> {
        self.logs
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}
