//! Run diagnostics
//!
//! Every message a publication run produces is kept as a [`LogEntry`] so it
//! can be stored on the process record, and mirrored to `tracing` at the
//! matching level.

use chrono::Utc;

use crate::models::{LogEntry, LogLevel};

/// Diagnostic accumulator of one run
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
    /// Entries already written to the process record
    flushed: usize,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, level: LogLevel, content: impl Into<String>) {
        let content = content.into();

        match level {
            LogLevel::Debug => tracing::debug!("{}", content),
            LogLevel::Info => tracing::info!("{}", content),
            LogLevel::Warning => tracing::warn!("{}", content),
            LogLevel::Error => tracing::error!("{}", content),
        }

        self.entries.push(LogEntry {
            content,
            level,
            date: Utc::now(),
        });
    }

    pub fn debug(&mut self, content: impl Into<String>) {
        self.log(LogLevel::Debug, content);
    }

    pub fn info(&mut self, content: impl Into<String>) {
        self.log(LogLevel::Info, content);
    }

    pub fn warning(&mut self, content: impl Into<String>) {
        self.log(LogLevel::Warning, content);
    }

    pub fn error(&mut self, content: impl Into<String>) {
        self.log(LogLevel::Error, content);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries at exactly `level`
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// NDJSON of the entries not flushed yet; marks them flushed
    pub fn take_unflushed(&mut self) -> String {
        let mut out = String::new();
        for entry in &self.entries[self.flushed..] {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(e) => tracing::warn!("Dropping unserializable log entry: {}", e),
            }
        }
        self.flushed = self.entries.len();
        out
    }
}
