//! Runs a calibration session on its own thread.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use super::session::{CalibrationError, CalibrationPhase, CalibrationReport, CalibrationSession};
use crate::tracker::UserId;

type SessionResult = Result<CalibrationReport, CalibrationError>;

/// Owner of a calibration running in the background.
///
/// Dropping the handle cancels the session and waits for the thread.
pub struct CalibrationHandle {
    user: UserId,
    cancel: Option<Sender<()>>,
    result: Receiver<SessionResult>,
    phase: Arc<Mutex<CalibrationPhase>>,
    thread: Option<JoinHandle<()>>,
}

impl CalibrationHandle {
    /// Start `session` on a new thread.
    pub fn spawn(session: CalibrationSession) -> Result<Self, CalibrationError> {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<SessionResult>(1);

        let user = session.user();
        let mut session = session.with_cancel(cancel_rx);
        let phase = session.phase_handle();

        let thread = std::thread::Builder::new()
            .name("calibration".to_string())
            .spawn(move || {
                let result = session.run();
                let _ = result_tx.send(result);
            })
            .map_err(|e| CalibrationError::Spawn(e.to_string()))?;

        tracing::info!(user, "Calibration worker started");

        Ok(Self {
            user,
            cancel: Some(cancel_tx),
            result: result_rx,
            phase,
            thread: Some(thread),
        })
    }

    /// User being calibrated.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Current protocol phase.
    pub fn phase(&self) -> CalibrationPhase {
        self.phase.lock().clone()
    }

    /// Result if the session has finished (non-blocking).
    pub fn try_result(&self) -> Option<SessionResult> {
        match self.result.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CalibrationError::WorkerLost)),
        }
    }

    /// Block until the session finishes or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<SessionResult> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Some(Err(CalibrationError::WorkerLost))
            }
        }
    }

    /// Ask the session to stop at its next wait.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            let _ = cancel.try_send(());
        }
    }
}

impl Drop for CalibrationHandle {
    fn drop(&mut self) {
        // Disconnecting the cancel channel aborts any pending wait.
        self.cancel.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Calibration thread panicked");
            }
        }
    }
}
