//! The human at the bench: acknowledgements, wait notifications, and the
//! pause/resume/kill control surface.

use crate::error::{BenchError, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Blocks until a person confirms `prompt`. An error aborts the run.
pub trait Operator {
    fn acknowledge(&mut self, prompt: &str) -> Result<()>;
}

/// Confirms every prompt immediately (`--yes`, dry walks, tests) and keeps
/// the prompts it was shown.
#[derive(Debug, Default)]
pub struct AutoOperator {
    prompts: Vec<String>,
    refuse: bool,
}

impl AutoOperator {
    /// An operator that declines every prompt.
    pub fn refusing() -> Self {
        Self {
            prompts: Vec::new(),
            refuse: true,
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Operator for AutoOperator {
    fn acknowledge(&mut self, prompt: &str) -> Result<()> {
        self.prompts.push(prompt.to_string());
        if self.refuse {
            return Err(BenchError::OperatorAborted(prompt.to_string()));
        }
        info!(prompt, "auto-acknowledged");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wait notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WaitEvent {
    Begin { reason: String },
    End,
}

/// Receives wait begin/end so something outside the run loop can blink a
/// light or play a sound while the operator is needed.
pub trait WaitObserver {
    fn on_wait(&mut self, event: &WaitEvent);
}

/// Writes wait events to the log.
#[derive(Debug, Default)]
pub struct LogObserver;

impl WaitObserver for LogObserver {
    fn on_wait(&mut self, event: &WaitEvent) {
        match event {
            WaitEvent::Begin { reason } => warn!(reason = %reason, "waiting for operator"),
            WaitEvent::End => info!("operator wait finished"),
        }
    }
}

// ---------------------------------------------------------------------------
// ControlHandle
// ---------------------------------------------------------------------------

pub type KillAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct ControlState {
    pause_requested: bool,
}

/// Pause/resume/kill requests from outside the control thread. Pauses take
/// effect at the next stage boundary.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<(Mutex<ControlState>, Condvar)>,
    kill: KillAction,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::with_kill_action(Arc::new(|| std::process::exit(crate::watchdog::KILL_EXIT_CODE)))
    }
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("pause_requested", &self.is_pause_requested())
            .finish()
    }
}

impl ControlHandle {
    pub fn with_kill_action(kill: KillAction) -> Self {
        Self {
            shared: Arc::new((Mutex::new(ControlState::default()), Condvar::new())),
            kill,
        }
    }

    pub fn request_pause(&self) {
        let (lock, _) = &*self.shared;
        lock.lock().unwrap_or_else(PoisonError::into_inner).pause_requested = true;
        info!("pause requested");
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.shared;
        lock.lock().unwrap_or_else(PoisonError::into_inner).pause_requested = false;
        cvar.notify_all();
        info!("resume requested");
    }

    pub fn is_pause_requested(&self) -> bool {
        let (lock, _) = &*self.shared;
        lock.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pause_requested
    }

    /// Block the calling thread until no pause is pending.
    pub fn wait_while_paused(&self) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while state.pause_requested {
            state = cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Terminate the process after `delay`. There is no finer-grained
    /// cancellation of an in-flight physical action.
    pub fn kill_after(&self, delay: Duration) -> std::thread::JoinHandle<()> {
        warn!(delay_secs = delay.as_secs(), "kill scheduled");
        let kill = Arc::clone(&self.kill);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            kill();
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
