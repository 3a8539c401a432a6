//! Liveness guard for a hung device: if no stage is entered within the
//! timeout, log and kill the process.

use crate::error::BenchError;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Exit status used when the watchdog or a kill request ends the process.
pub const KILL_EXIT_CODE: i32 = 3;

pub type TimeoutAction = Arc<dyn Fn(&BenchError) + Send + Sync>;

/// The production timeout action.
pub fn exit_process() -> TimeoutAction {
    Arc::new(|_| std::process::exit(KILL_EXIT_CODE))
}

enum Signal {
    Kick(String),
    Suspend,
    Resume,
    Stop,
}

pub struct Watchdog {
    tx: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Watchdog {
    /// Start the watchdog thread. It is armed immediately.
    pub fn start(timeout: Duration, action: TimeoutAction) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = std::thread::spawn(move || {
            let mut stage = String::from("<start>");
            let mut deadline = Some(Instant::now() + timeout);
            loop {
                let signal = match deadline {
                    Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match signal {
                    Ok(Signal::Kick(name)) => {
                        stage = name;
                        deadline = Some(Instant::now() + timeout);
                    }
                    Ok(Signal::Suspend) => deadline = None,
                    Ok(Signal::Resume) => deadline = Some(Instant::now() + timeout),
                    Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let err = BenchError::WatchdogTimeout {
                            stage,
                            minutes: timeout.as_secs() / 60,
                        };
                        error!("{err}");
                        action(&err);
                        break;
                    }
                }
            }
            debug!("watchdog stopped");
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Record progress into `stage` and restart the countdown.
    pub fn kick(&self, stage: &str) {
        let _ = self.tx.send(Signal::Kick(stage.to_string()));
    }

    /// Stop counting while the operator is being waited on.
    pub fn suspend(&self) {
        let _ = self.tx.send(Signal::Suspend);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Signal::Resume);
    }

    pub fn disarm(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
