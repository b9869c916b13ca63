//! Calibration session: locate each device by triangulating two pointing rays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use super::prompt::{CalibrationPrompt, Station};
use super::store::{CalibrationRecord, CalibrationStore};
use crate::config::{CalibrationConfig, ControllerConfig, DivergencePolicy};
use crate::context::ControllerContext;
use crate::device::{DeviceError, DeviceId};
use crate::geometry::{average, Ray3D, Vector3};
use crate::tracker::{confident_joint, Joint, TrackerError, UserId};

/// Where the session currently is in the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationPhase {
    /// Not started yet.
    Idle,
    /// Waiting for the user to walk to a station.
    Relocating(Station),
    /// A device is lit and the user's pointing arm is being sampled.
    Sampling { station: Station, device: DeviceId },
    /// Intersecting the rays.
    Computing,
    /// Finished successfully.
    Complete,
    /// Stopped early.
    Failed(String),
}

impl CalibrationPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, CalibrationPhase::Complete | CalibrationPhase::Failed(_))
    }
}

impl std::fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationPhase::Idle => write!(f, "Idle"),
            CalibrationPhase::Relocating(station) => write!(f, "Moving to station {}", station),
            CalibrationPhase::Sampling { station, device } => {
                write!(f, "Sampling device {} from station {}", device, station)
            }
            CalibrationPhase::Computing => write!(f, "Computing"),
            CalibrationPhase::Complete => write!(f, "Complete"),
            CalibrationPhase::Failed(msg) => write!(f, "Failed: {}", msg),
        }
    }
}

/// Why a session stopped without a report.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Calibration was cancelled")]
    Cancelled,
    #[error("Calibration timed out")]
    TimedOut,
    #[error("No devices to calibrate")]
    NoDevices,
    #[error("Device directory failed: {0}")]
    Devices(#[from] DeviceError),
    #[error("No usable samples for device {device} from station {station}")]
    NoUsableSamples { device: DeviceId, station: Station },
    #[error("Failed to start calibration worker: {0}")]
    Spawn(String),
    #[error("Calibration worker exited without a result")]
    WorkerLost,
}

/// Result of triangulating one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceOutcome {
    /// The rays met within tolerance.
    Converged { position: Vector3 },
    /// The rays did not meet. `gap` is their closest distance, `None` if parallel.
    Diverged { gap: Option<f64> },
}

/// Per-device calibration data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCalibration {
    pub device: DeviceId,
    /// Ray sampled from station A.
    pub ray_a: Ray3D,
    /// Ray sampled from station B.
    pub ray_b: Ray3D,
    pub outcome: DeviceOutcome,
}

impl DeviceCalibration {
    pub fn converged(&self) -> bool {
        matches!(self.outcome, DeviceOutcome::Converged { .. })
    }

    /// Position to use for this device under `policy`.
    pub fn position(&self, policy: DivergencePolicy) -> Option<Vector3> {
        match (self.outcome, policy) {
            (DeviceOutcome::Converged { position }, _) => Some(position),
            (DeviceOutcome::Diverged { .. }, DivergencePolicy::UseOrigin) => Some(Vector3::ZERO),
            (DeviceOutcome::Diverged { .. }, DivergencePolicy::Skip) => None,
        }
    }
}

/// Everything a finished session produced.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub devices: Vec<DeviceCalibration>,
    pub policy: DivergencePolicy,
    /// Whether the records were written to the store.
    pub persisted: bool,
}

impl CalibrationReport {
    /// Device positions after applying the divergence policy.
    pub fn records(&self) -> Vec<CalibrationRecord> {
        self.devices
            .iter()
            .filter_map(|d| d.position(self.policy).map(|p| CalibrationRecord::new(d.device, p)))
            .collect()
    }

    pub fn converged_count(&self) -> usize {
        self.devices.iter().filter(|d| d.converged()).count()
    }

    pub fn diverged(&self) -> impl Iterator<Item = &DeviceCalibration> {
        self.devices.iter().filter(|d| !d.converged())
    }
}

/// A single run of the calibration protocol.
///
/// [`CalibrationSession::run`] blocks for the whole protocol. The engine runs
/// it on its own thread through [`super::CalibrationHandle`].
pub struct CalibrationSession {
    ctx: ControllerContext,
    config: CalibrationConfig,
    max_calibration_distance: f64,
    min_confidence: f32,
    user: UserId,
    store: Option<CalibrationStore>,
    cancel: Receiver<()>,
    deadline: Instant,
    phase: Arc<Mutex<CalibrationPhase>>,
}

impl CalibrationSession {
    pub fn new(ctx: ControllerContext, config: &ControllerConfig, user: UserId) -> Self {
        Self {
            ctx,
            config: config.calibration.clone(),
            max_calibration_distance: config.geometry.max_calibration_distance,
            min_confidence: config.min_joint_confidence,
            user,
            store: None,
            cancel: crossbeam_channel::never(),
            deadline: Instant::now(),
            phase: Arc::new(Mutex::new(CalibrationPhase::Idle)),
        }
    }

    /// Persist the result to `store` when the session completes.
    pub fn with_store(mut self, store: CalibrationStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Abort the session when `cancel` receives a message or disconnects.
    pub fn with_cancel(mut self, cancel: Receiver<()>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Shared view of the current phase.
    pub fn phase_handle(&self) -> Arc<Mutex<CalibrationPhase>> {
        self.phase.clone()
    }

    /// Run the protocol to completion.
    pub fn run(&mut self) -> Result<CalibrationReport, CalibrationError> {
        self.deadline = deadline_after(self.config.timeout());

        let result = self.run_protocol();
        match &result {
            Ok(report) => {
                self.set_phase(CalibrationPhase::Complete);
                self.ctx.prompter.prompt(&CalibrationPrompt::Finished {
                    calibrated: report.converged_count(),
                    failed: report.devices.len() - report.converged_count(),
                });
            }
            Err(e) => {
                tracing::warn!(user = self.user, "Calibration failed: {}", e);
                self.set_phase(CalibrationPhase::Failed(e.to_string()));
                self.ctx.prompter.prompt(&CalibrationPrompt::Aborted(e.to_string()));
            }
        }
        result
    }

    fn run_protocol(&mut self) -> Result<CalibrationReport, CalibrationError> {
        let devices = self.ctx.devices.devices()?;
        if devices.is_empty() {
            return Err(CalibrationError::NoDevices);
        }
        let budget = self.config.session_budget(devices.len());
        self.deadline = deadline_after(budget);
        tracing::info!(
            user = self.user,
            budget_ms = budget.as_millis() as u64,
            "Starting calibration of {} device(s)",
            devices.len()
        );

        let first = self.sample_station(Station::A, &devices)?;
        let second = self.sample_station(Station::B, &devices)?;

        self.set_phase(CalibrationPhase::Computing);
        let results = devices
            .iter()
            .zip(first)
            .zip(second)
            .map(|((&device, ray_a), ray_b)| self.triangulate(device, ray_a, ray_b))
            .collect();

        let mut report = CalibrationReport {
            devices: results,
            policy: self.config.on_divergence,
            persisted: false,
        };

        if let Some(store) = &self.store {
            match store.save(&report.records()) {
                Ok(()) => report.persisted = true,
                Err(e) => tracing::error!("Failed to save calibration: {}", e),
            }
        }

        Ok(report)
    }

    /// Sample every device from one station.
    fn sample_station(
        &self,
        station: Station,
        devices: &[DeviceId],
    ) -> Result<Vec<Ray3D>, CalibrationError> {
        self.set_phase(CalibrationPhase::Relocating(station));
        self.ctx.prompter.prompt(&CalibrationPrompt::MoveToStation(station));
        self.wait(self.config.relocation())?;

        devices
            .iter()
            .map(|&device| {
                self.wait(self.config.between_devices())?;
                self.sample_device(station, device)
            })
            .collect()
    }

    /// Light one device and average where the user points at it.
    fn sample_device(&self, station: Station, device: DeviceId) -> Result<Ray3D, CalibrationError> {
        self.set_phase(CalibrationPhase::Sampling { station, device });

        if let Err(e) = self.ctx.devices.turn_on(device) {
            tracing::warn!(device, "Failed to turn on device for calibration: {}", e);
        }
        self.ctx.prompter.prompt(&CalibrationPrompt::DeviceLit(device));

        let result = self.collect_ray(station, device);

        // Turn the device off even when sampling was aborted.
        if let Err(e) = self.ctx.devices.turn_off(device) {
            tracing::warn!(device, "Failed to turn off device after calibration: {}", e);
        }
        self.ctx.prompter.prompt(&CalibrationPrompt::DeviceReleased(device));

        result
    }

    fn collect_ray(&self, station: Station, device: DeviceId) -> Result<Ray3D, CalibrationError> {
        self.wait(self.config.settle())?;

        let count = self.config.sample_count();
        let interval = self.config.sample_interval();
        let mut heads = Vec::with_capacity(count);
        let mut hands = Vec::with_capacity(count);

        // One sample at the start of each interval, so the window is covered in full.
        for _ in 0..count {
            match self.read_pointing_arm() {
                Ok((head, hand)) => {
                    heads.push(head);
                    hands.push(hand);
                }
                Err(e) => tracing::debug!(device, "Skipping calibration sample: {}", e),
            }
            self.wait(interval)?;
        }

        self.wait(self.config.hold())?;

        match (average(&heads), average(&hands)) {
            (Some(head), Some(hand)) => {
                let ray = Ray3D::new(head, hand);
                tracing::debug!(
                    device,
                    station = %station,
                    samples = heads.len(),
                    "Calibration ray {}",
                    ray
                );
                Ok(ray)
            }
            _ => Err(CalibrationError::NoUsableSamples { device, station }),
        }
    }

    fn read_pointing_arm(&self) -> Result<(Vector3, Vector3), TrackerError> {
        let tracker = self.ctx.tracker.as_ref();
        let head = confident_joint(tracker, self.user, Joint::Head, self.min_confidence)?;
        let hand = confident_joint(tracker, self.user, Joint::RightHand, self.min_confidence)?;
        Ok((head, hand))
    }

    fn triangulate(&self, device: DeviceId, ray_a: Ray3D, ray_b: Ray3D) -> DeviceCalibration {
        let outcome = match ray_a.intersection_with(&ray_b, self.max_calibration_distance) {
            Some(position) => {
                tracing::info!(
                    device,
                    "Device located at ({:.0}, {:.0}, {:.0})",
                    position.x,
                    position.y,
                    position.z
                );
                DeviceOutcome::Converged { position }
            }
            None => {
                let gap = ray_a.closest_approach(&ray_b).map(|(a, b)| a.distance(b));
                tracing::warn!(device, gap = ?gap, "Calibration rays did not converge");
                DeviceOutcome::Diverged { gap }
            }
        };

        DeviceCalibration {
            device,
            ray_a,
            ray_b,
            outcome,
        }
    }

    /// Sleep for `duration`, aborting on cancellation or the session deadline.
    fn wait(&self, duration: Duration) -> Result<(), CalibrationError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CalibrationError::TimedOut);
        }

        match self.cancel.recv_timeout(duration.min(remaining)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Err(CalibrationError::Cancelled),
            Err(RecvTimeoutError::Timeout) if duration > remaining => {
                Err(CalibrationError::TimedOut)
            }
            Err(RecvTimeoutError::Timeout) => Ok(()),
        }
    }

    fn set_phase(&self, phase: CalibrationPhase) {
        tracing::debug!(user = self.user, "Calibration phase: {}", phase);
        *self.phase.lock() = phase;
    }
}

/// `now + budget`, capped at a year for budgets too large to represent.
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Prompter;
    use crate::sim::{DeviceCommand, SimulatedRoom};

    const USER: UserId = 1;

    fn room() -> Arc<SimulatedRoom> {
        let room = SimulatedRoom::new()
            .with_device(2, Vector3::new(1500.0, 800.0, 3500.0))
            .with_device(5, Vector3::new(1000.0, 0.0, 2000.0))
            .with_station(Station::A, Vector3::new(0.0, 0.0, 0.0))
            .with_station(Station::B, Vector3::new(2000.0, 0.0, 0.0));
        room.place_user(USER, Vector3::new(500.0, 0.0, 0.0));
        Arc::new(room)
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            calibration: CalibrationConfig::immediate(),
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_calibration_locates_devices() {
        let room = room();
        let mut session = CalibrationSession::new(room.context(), &config(), USER);
        let phase = session.phase_handle();

        let report = session.run().unwrap();
        assert_eq!(report.devices.len(), 2);
        assert_eq!(report.converged_count(), 2);
        assert!(!report.persisted);
        assert_eq!(*phase.lock(), CalibrationPhase::Complete);

        let records = report.records();
        assert_eq!(records[0].device, 2);
        assert!((records[0].position - Vector3::new(1500.0, 800.0, 3500.0)).length() < 1e-6);
        assert_eq!(records[1].device, 5);
        assert!((records[1].position - Vector3::new(1000.0, 0.0, 2000.0)).length() < 1e-6);

        // Every device was lit once per station and switched off again
        let commands = room.commands();
        assert_eq!(
            commands,
            vec![
                DeviceCommand::On(2),
                DeviceCommand::Off(2),
                DeviceCommand::On(5),
                DeviceCommand::Off(5),
                DeviceCommand::On(2),
                DeviceCommand::Off(2),
                DeviceCommand::On(5),
                DeviceCommand::Off(5),
            ]
        );
        assert!(room.prompts().contains(&CalibrationPrompt::Finished { calibrated: 2, failed: 0 }));
    }

    #[test]
    fn test_calibration_is_persisted() {
        let room = room();
        let path = std::env::temp_dir()
            .join(format!("spatial-controller-session-{}.txt", std::process::id()));
        let store = CalibrationStore::new(&path);

        let report = CalibrationSession::new(room.context(), &config(), USER)
            .with_store(store.clone())
            .run()
            .unwrap();
        assert!(report.persisted);

        let loaded = store.load_matching(&[2, 5]).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, report.records());
    }

    #[test]
    fn test_diverging_device_falls_back_to_origin() {
        let room = room();
        // From station B the user points well above device 5
        room.set_aim_error(5, Station::B, Vector3::new(0.0, 1000.0, 0.0));

        let report = CalibrationSession::new(room.context(), &config(), USER).run().unwrap();
        assert_eq!(report.converged_count(), 1);

        let diverged: Vec<_> = report.diverged().collect();
        assert_eq!(diverged.len(), 1);
        assert_eq!(diverged[0].device, 5);
        match diverged[0].outcome {
            DeviceOutcome::Diverged { gap: Some(gap) } => assert!(gap > 250.0),
            other => panic!("unexpected outcome {:?}", other),
        }

        let records = report.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], CalibrationRecord::new(5, Vector3::ZERO));
        assert!(room.prompts().contains(&CalibrationPrompt::Finished { calibrated: 1, failed: 1 }));
    }

    #[test]
    fn test_diverging_device_skipped() {
        let room = room();
        room.set_aim_error(5, Station::B, Vector3::new(0.0, 1000.0, 0.0));

        let mut config = config();
        config.calibration.on_divergence = DivergencePolicy::Skip;

        let report = CalibrationSession::new(room.context(), &config, USER).run().unwrap();
        let records = report.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device, 2);
    }

    #[test]
    fn test_no_devices() {
        let room = Arc::new(SimulatedRoom::new());
        room.place_user(USER, Vector3::ZERO);

        let result = CalibrationSession::new(room.context(), &config(), USER).run();
        assert!(matches!(result, Err(CalibrationError::NoDevices)));
    }

    #[test]
    fn test_low_confidence_user_yields_no_samples() {
        let room = room();
        room.set_confidence(USER, 0.1);

        let mut session = CalibrationSession::new(room.context(), &config(), USER);
        let result = session.run();
        assert!(matches!(
            result,
            Err(CalibrationError::NoUsableSamples { device: 2, station: Station::A })
        ));
        assert!(session.phase_handle().lock().is_finished());
        // The lit device was switched off again
        assert_eq!(room.commands(), vec![DeviceCommand::On(2), DeviceCommand::Off(2)]);
    }

    #[test]
    fn test_cancel_before_start() {
        let room = room();
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        cancel_tx.send(()).unwrap();

        let result = CalibrationSession::new(room.context(), &config(), USER)
            .with_cancel(cancel_rx)
            .run();
        assert!(matches!(result, Err(CalibrationError::Cancelled)));
        assert!(room.commands().is_empty());
        assert!(matches!(room.prompts().last(), Some(CalibrationPrompt::Aborted(_))));
    }

    /// Prompter that stalls before passing prompts on to the room.
    struct SlowPrompter {
        room: Arc<SimulatedRoom>,
        delay: Duration,
    }

    impl Prompter for SlowPrompter {
        fn prompt(&self, prompt: &CalibrationPrompt) {
            std::thread::sleep(self.delay);
            self.room.prompt(prompt);
        }
    }

    #[test]
    fn test_timeout() {
        let room = room();
        let prompter = Arc::new(SlowPrompter {
            room: room.clone(),
            delay: Duration::from_millis(50),
        });
        let ctx = room.context().with_prompter(prompter);
        let mut config = config();
        config.calibration.timeout_ms = 30;

        let started = Instant::now();
        let result = CalibrationSession::new(ctx, &config, USER).run();
        assert!(matches!(result, Err(CalibrationError::TimedOut)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(room.commands().is_empty());
        assert!(!room.is_on(2));
    }

    #[test]
    fn test_deadline_grows_with_device_count() {
        // Twenty devices take far longer than the slack alone allows
        let mut room = SimulatedRoom::new()
            .with_station(Station::A, Vector3::new(0.0, 0.0, 0.0))
            .with_station(Station::B, Vector3::new(2000.0, 0.0, 0.0));
        for device in 1..=20u8 {
            let x = -2000.0 + f64::from(device) * 200.0;
            room = room.with_device(device, Vector3::new(x, 500.0, 3000.0));
        }
        room.place_user(USER, Vector3::ZERO);
        let room = Arc::new(room);

        let mut config = config();
        config.calibration.between_devices_ms = 10;
        config.calibration.timeout_ms = 50;

        let report = CalibrationSession::new(room.context(), &config, USER).run().unwrap();
        assert_eq!(report.converged_count(), 20);
    }

    #[test]
    fn test_sampling_covers_whole_window() {
        let room = Arc::new(
            SimulatedRoom::new()
                .with_device(2, Vector3::new(1500.0, 800.0, 3500.0))
                .with_station(Station::A, Vector3::new(0.0, 0.0, 0.0))
                .with_station(Station::B, Vector3::new(2000.0, 0.0, 0.0)),
        );
        room.place_user(USER, Vector3::ZERO);

        let mut config = config();
        config.calibration.sampling_window_ms = 200;
        config.calibration.samples_per_second = 10;
        assert_eq!(config.calibration.sample_count(), 2);

        let started = Instant::now();
        let report = CalibrationSession::new(room.context(), &config, USER).run().unwrap();
        assert_eq!(report.converged_count(), 1);
        // One full window per station
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
