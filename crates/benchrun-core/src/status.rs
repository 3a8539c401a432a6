use crate::error::Result;
use crate::paths;
use crate::tips::PoolSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Finished,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Snapshot of a run for outside readers: current stage, whether the run is
/// waiting on someone, and how many consumables are left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    pub protocol: String,
    pub stage: Option<String>,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub consumables: Vec<PoolSummary>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunStatus {
    pub fn new(protocol: impl Into<String>, resume_point: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            protocol: protocol.into(),
            stage: None,
            state: RunState::Running,
            waiting_for: None,
            resume_point,
            error: None,
            consumables: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// The last written status, or `None` if no run has been recorded.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        crate::io::read_json(&paths::status_path(root))
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        crate::io::write_json(&paths::status_path(root), self)
    }
}

// ---------------------------------------------------------------------------
// StatusBoard
// ---------------------------------------------------------------------------

/// Owns the live status and rewrites `status.json` on every change. Without
/// a root it only keeps the status in memory.
#[derive(Debug)]
pub struct StatusBoard {
    root: Option<PathBuf>,
    status: RunStatus,
}

impl StatusBoard {
    pub fn new(root: Option<PathBuf>, status: RunStatus) -> Self {
        Self { root, status }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn stage(&mut self, name: &str, consumables: Vec<PoolSummary>) -> Result<()> {
        self.status.stage = Some(name.to_string());
        self.status.consumables = consumables;
        self.publish()
    }

    pub fn waiting(&mut self, reason: &str) -> Result<()> {
        self.status.state = RunState::Paused;
        self.status.waiting_for = Some(reason.to_string());
        self.publish()
    }

    pub fn running(&mut self) -> Result<()> {
        self.status.state = RunState::Running;
        self.status.waiting_for = None;
        self.publish()
    }

    pub fn finish(&mut self, error: Option<String>, consumables: Vec<PoolSummary>) -> Result<()> {
        self.status.state = if error.is_some() {
            RunState::Failed
        } else {
            RunState::Finished
        };
        self.status.waiting_for = None;
        self.status.error = error;
        self.status.consumables = consumables;
        self.publish()
    }

    fn publish(&mut self) -> Result<()> {
        self.status.updated_at = Utc::now();
        match &self.root {
            Some(root) => self.status.save(root),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
