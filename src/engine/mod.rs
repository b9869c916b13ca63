//! Gesture engine: the per-tick control loop.
//!
//! Each tick reads the tracked users' joints, builds head-to-hand pointer
//! rays and feeds the result into the device focus state machines. Until the
//! devices are calibrated the engine runs a calibration session in the
//! background instead.

mod dimming;
mod snapshot;

pub use dimming::{DimDirection, DimmingGesture};
pub use snapshot::{PointerRays, RaySnapshot};

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::calibration::{
    CalibrationHandle, CalibrationPhase, CalibrationRecord, CalibrationSession, CalibrationStore,
    StoreError,
};
use crate::config::ControllerConfig;
use crate::context::ControllerContext;
use crate::device::{DeviceId, DeviceTarget, FocusOutcome};
use crate::tracker::{GestureSample, UserId};

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No calibration yet. The next tracked user starts one.
    Idle,
    /// A calibration session is running.
    Calibrating,
    /// Devices are calibrated and gestures are live.
    Ready,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Calibrating => write!(f, "Calibrating"),
            EngineState::Ready => write!(f, "Ready"),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// State after the tick.
    pub state: EngineState,
    /// Devices switched this tick, with their new on/off state.
    pub toggled: Vec<(DeviceId, bool)>,
    /// Level sent to every device by the dimming gesture.
    pub dim_level: Option<u8>,
    /// The tracker failed and the tick did nothing.
    pub skipped: bool,
}

impl TickReport {
    fn new(state: EngineState) -> Self {
        Self {
            state,
            toggled: Vec::new(),
            dim_level: None,
            skipped: false,
        }
    }
}

pub struct GestureEngine {
    ctx: ControllerContext,
    config: ControllerConfig,
    store: CalibrationStore,
    state: EngineState,
    calibration: Option<CalibrationHandle>,
    targets: Vec<DeviceTarget>,
    dimming: DimmingGesture,
    snapshot: RaySnapshot,
}

impl GestureEngine {
    /// Create the engine, loading a stored calibration when it matches the
    /// live devices.
    pub fn new(ctx: ControllerContext, config: ControllerConfig, now: Instant) -> Self {
        let store = CalibrationStore::new(config.calibration_file.clone());
        let dimming = DimmingGesture::new(config.dimming);

        let mut engine = Self {
            ctx,
            config,
            store,
            state: EngineState::Idle,
            calibration: None,
            targets: Vec::new(),
            dimming,
            snapshot: RaySnapshot::new(),
        };

        match engine.load_calibration() {
            Ok(records) => {
                info!(
                    "Loaded calibration for {} device(s) from {}",
                    records.len(),
                    engine.store.path().display()
                );
                engine.install(&records, now);
            }
            Err(StoreError::NotFound(path)) => {
                info!("No calibration at {}, calibration required", path.display());
            }
            Err(e) => warn!("Ignoring stored calibration: {}", e),
        }

        engine
    }

    fn load_calibration(&self) -> Result<Vec<CalibrationRecord>, StoreError> {
        let live = match self.ctx.devices.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Could not enumerate devices: {}", e);
                Vec::new()
            }
        };
        self.store.load_matching(&live)
    }

    fn install(&mut self, records: &[CalibrationRecord], now: Instant) {
        self.targets = records
            .iter()
            .map(|r| DeviceTarget::new(r.device, r.position, self.config.focus, now))
            .collect();
        self.state = EngineState::Ready;
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == EngineState::Ready
    }

    pub fn targets(&self) -> &[DeviceTarget] {
        &self.targets
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Handle to the shared pointer-ray snapshot.
    pub fn ray_snapshot(&self) -> RaySnapshot {
        self.snapshot.clone()
    }

    /// Phase of the running calibration, if any.
    pub fn calibration_phase(&self) -> Option<CalibrationPhase> {
        self.calibration.as_ref().map(|c| c.phase())
    }

    /// Stop a running calibration and return to `Idle`.
    pub fn cancel_calibration(&mut self) {
        if let Some(handle) = self.calibration.take() {
            info!(user = handle.user(), "Cancelling calibration");
            handle.cancel();
            // Dropping the handle waits for the worker to wind down.
            drop(handle);
            self.state = EngineState::Idle;
        }
    }

    /// Forget the current calibration. The next tracked user recalibrates.
    pub fn recalibrate(&mut self) {
        self.cancel_calibration();
        self.targets.clear();
        self.dimming.reset();
        self.snapshot.clear();
        self.state = EngineState::Idle;
        info!("Calibration discarded");
    }

    /// Run one control step.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        if self.state == EngineState::Calibrating {
            self.poll_calibration(now);
            return TickReport::new(self.state);
        }

        let users = match self.ctx.tracker.tracked_users() {
            Ok(users) => users,
            Err(e) => {
                debug!("Skipping tick: {}", e);
                let mut report = TickReport::new(self.state);
                report.skipped = true;
                return report;
            }
        };

        match self.state {
            EngineState::Idle => {
                if let Some(&user) = users.first() {
                    self.start_calibration(user);
                }
                TickReport::new(self.state)
            }
            EngineState::Calibrating => TickReport::new(self.state),
            EngineState::Ready => self.track_gestures(&users, now),
        }
    }

    fn start_calibration(&mut self, user: UserId) {
        let session = CalibrationSession::new(self.ctx.clone(), &self.config, user)
            .with_store(self.store.clone());

        match CalibrationHandle::spawn(session) {
            Ok(handle) => {
                info!(user, "Calibrating with user {}", user);
                self.calibration = Some(handle);
                self.state = EngineState::Calibrating;
            }
            Err(e) => warn!(user, "Could not start calibration: {}", e),
        }
    }

    fn poll_calibration(&mut self, now: Instant) {
        let Some(result) = self.calibration.as_ref().and_then(|c| c.try_result()) else {
            return;
        };
        self.calibration = None;

        match result {
            Ok(report) => {
                let records = report.records();
                info!(
                    "Calibration finished: {} of {} device(s) located",
                    report.converged_count(),
                    report.devices.len()
                );
                self.install(&records, now);
            }
            Err(e) => {
                warn!("Calibration did not finish: {}", e);
                self.state = EngineState::Idle;
            }
        }
    }

    fn track_gestures(&mut self, users: &[UserId], now: Instant) -> TickReport {
        let mut report = TickReport::new(self.state);

        let tracker = self.ctx.tracker.as_ref();
        let min_confidence = self.config.min_joint_confidence;
        let samples: Vec<(UserId, GestureSample)> = users
            .iter()
            .filter_map(|&user| {
                match GestureSample::capture(tracker, user, min_confidence) {
                    Ok(sample) => Some((user, sample)),
                    Err(e) => {
                        debug!(user, "Skipping user this tick: {}", e);
                        None
                    }
                }
            })
            .collect();

        let Some(&(first_user, first)) = samples.first() else {
            self.snapshot.clear();
            self.dimming.reset();
            self.release_all();
            return report;
        };

        self.snapshot.publish(PointerRays {
            user: first_user,
            left: first.left_pointer(),
            right: first.right_pointer(),
        });

        if let Some(level) = self.dimming.update(&first) {
            match self.ctx.devices.set_all_levels(level) {
                Ok(()) => {
                    for target in &mut self.targets {
                        target.set_level_applied(level);
                    }
                }
                Err(e) => warn!(level, "Dimming command failed: {}", e),
            }
            report.dim_level = Some(level);
            self.release_all();
            return report;
        }

        let max_distance = self.config.geometry.max_command_distance;
        let pointers: Vec<_> = samples
            .iter()
            .flat_map(|(_, s)| [s.left_pointer(), s.right_pointer()])
            .flatten()
            .collect();

        for target in &mut self.targets {
            let position = target.position();
            let targeted = pointers.iter().any(|ray| ray.close_to(position, max_distance));

            let outcome = if targeted {
                target.notify_in_focus(now, self.ctx.devices.as_ref())
            } else {
                target.notify_not_in_focus()
            };

            if let FocusOutcome::Toggled { on } = outcome {
                report.toggled.push((target.id(), on));
            }
        }

        report
    }

    fn release_all(&mut self) {
        for target in &mut self.targets {
            target.notify_not_in_focus();
        }
    }
}
