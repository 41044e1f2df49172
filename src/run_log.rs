// src/run_log.rs
//! Per-run execution log buffer. Lines are mirrored to `tracing` as they are
//! written and appended to the agent's execution log on flush.

use chrono::Utc;

use crate::store::{ExecutionLog, LogEntry};

#[derive(Debug)]
pub struct RunLog {
    agent_id: String,
    pending: Vec<LogEntry>,
}

impl RunLog {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            pending: Vec::new(),
        }
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!(target: "agent_run", agent = %self.agent_id, "{msg}");
        self.push(msg);
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!(target: "agent_run", agent = %self.agent_id, "{msg}");
        self.push(format!("WARN: {msg}"));
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!(target: "agent_run", agent = %self.agent_id, "{msg}");
        self.push(format!("ERROR: {msg}"));
    }

    fn push(&mut self, message: String) {
        self.pending.push(LogEntry {
            at: Utc::now(),
            message,
        });
    }

    pub fn pending(&self) -> &[LogEntry] {
        &self.pending
    }

    /// Append buffered lines to the execution log. A failing log sink is
    /// reported through `tracing` only; the log never affects run outcome.
    pub async fn flush(&mut self, sink: &dyn ExecutionLog) {
        if self.pending.is_empty() {
            return;
        }
        match sink.append(&self.agent_id, &self.pending).await {
            Ok(()) => self.pending.clear(),
            Err(e) => {
                tracing::warn!(target: "agent_run", agent = %self.agent_id, error = ?e, "execution log flush failed")
            }
        }
    }
}
