//! Linear stage sequencing with resume-from-stage support.
//!
//! Before the resume point every stage is still entered and logged, but
//! `enter` reports that physical side effects must be suppressed.

use crate::error::{BenchError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub index: usize,
    pub name: String,
    pub executed: bool,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StageController {
    resume_point: Option<String>,
    executing: bool,
    trace: Vec<StageRecord>,
}

impl StageController {
    pub fn new(resume_point: Option<String>) -> Self {
        Self {
            executing: resume_point.is_none(),
            resume_point,
            trace: Vec::new(),
        }
    }

    /// Announce `name` as the current stage. Returns whether its side
    /// effects run. Reaching the resume point switches to executing for
    /// the rest of the run.
    pub fn enter(&mut self, name: &str) -> bool {
        if !self.executing && self.resume_point.as_deref() == Some(name) {
            self.executing = true;
        }
        let index = self.trace.len();
        info!(stage = name, index, executing = self.executing, "entering stage");
        self.trace.push(StageRecord {
            index,
            name: name.to_string(),
            executed: self.executing,
            entered_at: Utc::now(),
        });
        self.executing
    }

    /// Fails if a resume point was requested but never entered. Call once,
    /// after the run.
    pub fn assert_resume_point_seen(&self) -> Result<()> {
        match &self.resume_point {
            Some(point) if !self.trace.iter().any(|r| &r.name == point) => {
                Err(BenchError::ResumePointNotReached(point.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.trace.last().map(|r| r.name.as_str())
    }

    pub fn trace(&self) -> &[StageRecord] {
        &self.trace
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn resume_point(&self) -> Option<&str> {
        self.resume_point.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
