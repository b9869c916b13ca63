//! Simulated room for running without sensor or home-automation hardware.
//!
//! A [`SimulatedRoom`] is a skeleton tracker, a device sink and a calibration
//! prompter at once. Simulated users follow calibration prompts: they walk to
//! the prompted station and point their right hand at whichever device was
//! just lit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::calibration::{CalibrationPrompt, Prompter, Station};
use crate::context::ControllerContext;
use crate::device::{DeviceError, DeviceId, DeviceSink};
use crate::geometry::Vector3;
use crate::tracker::{Joint, JointPosition, SkeletonTracker, TrackerError, UserId};

/// Distance from head to a pointing hand.
const ARM_REACH: f64 = 600.0;
/// Shoulder offset from the head (half width, drop).
const SHOULDER_OFFSET: (f64, f64) = (200.0, 250.0);

/// A command received by the simulated sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    On(DeviceId),
    Off(DeviceId),
    Level(DeviceId, u8),
    AllOn,
    AllOff,
}

#[derive(Debug, Clone)]
struct SimDevice {
    position: Vector3,
    on: bool,
    level: u8,
}

#[derive(Debug, Clone)]
struct SimUser {
    tracking: bool,
    confidence: f32,
    /// Per-joint overrides of `confidence`.
    joint_confidence: HashMap<Joint, f32>,
    head: Vector3,
    left_hand: Vector3,
    right_hand: Vector3,
}

impl SimUser {
    fn standing_at(head: Vector3) -> Self {
        let mut user = Self {
            tracking: true,
            confidence: 1.0,
            joint_confidence: HashMap::new(),
            head,
            left_hand: head,
            right_hand: head,
        };
        user.move_to(head);
        user
    }

    /// Walk to `head` and lower both hands.
    fn move_to(&mut self, head: Vector3) {
        self.head = head;
        self.lower_hands();
    }

    fn left_shoulder(&self) -> Vector3 {
        self.head + Vector3::new(-SHOULDER_OFFSET.0, -SHOULDER_OFFSET.1, 0.0)
    }

    fn right_shoulder(&self) -> Vector3 {
        self.head + Vector3::new(SHOULDER_OFFSET.0, -SHOULDER_OFFSET.1, 0.0)
    }

    fn lower_hands(&mut self) {
        self.left_hand = self.left_shoulder() - Vector3::Y * ARM_REACH;
        self.right_hand = self.right_shoulder() - Vector3::Y * ARM_REACH;
    }

    fn reach_toward(&self, target: Vector3) -> Vector3 {
        self.head + (target - self.head).normalize_or_zero() * ARM_REACH
    }

    fn joint(&self, joint: Joint) -> Vector3 {
        match joint {
            Joint::Head => self.head,
            Joint::LeftHand => self.left_hand,
            Joint::RightHand => self.right_hand,
            Joint::LeftShoulder => self.left_shoulder(),
            Joint::RightShoulder => self.right_shoulder(),
        }
    }

    fn confidence(&self, joint: Joint) -> f32 {
        self.joint_confidence.get(&joint).copied().unwrap_or(self.confidence)
    }
}

#[derive(Debug, Default)]
struct RoomState {
    devices: BTreeMap<DeviceId, SimDevice>,
    stations: HashMap<Station, Vector3>,
    aim_errors: HashMap<(DeviceId, Station), Vector3>,
    station: Option<Station>,
    users: BTreeMap<UserId, SimUser>,
    commands: Vec<DeviceCommand>,
    prompts: Vec<CalibrationPrompt>,
    devices_failing: bool,
    frame_failures: u32,
    jitter: f64,
}

impl RoomState {
    fn device_mut(&mut self, device: DeviceId) -> Result<&mut SimDevice, DeviceError> {
        if self.devices_failing {
            return Err(DeviceError::Unavailable("simulated network failure".to_string()));
        }
        self.devices.get_mut(&device).ok_or(DeviceError::NotFound(device))
    }

    fn user_mut(&mut self, user: UserId) -> Option<&mut SimUser> {
        self.users.get_mut(&user)
    }
}

/// In-process stand-in for the tracker, the device network and the user.
#[derive(Default)]
pub struct SimulatedRoom {
    state: Mutex<RoomState>,
}

impl SimulatedRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device at its true position.
    pub fn with_device(self, device: DeviceId, position: Vector3) -> Self {
        self.state.lock().devices.insert(
            device,
            SimDevice {
                position,
                on: false,
                level: 0,
            },
        );
        self
    }

    /// Head position users take when sent to `station`.
    pub fn with_station(self, station: Station, head: Vector3) -> Self {
        self.state.lock().stations.insert(station, head);
        self
    }

    /// Bundle this room as every collaborator of a controller.
    pub fn context(self: &Arc<Self>) -> ControllerContext {
        ControllerContext::new(self.clone(), self.clone()).with_prompter(self.clone())
    }

    /// Uniform noise (± `amount`) added to every joint reading.
    pub fn set_jitter(&self, amount: f64) {
        self.state.lock().jitter = amount.max(0.0);
    }

    /// Make the next `frames` calls to `users()` fail.
    pub fn fail_tracker_frames(&self, frames: u32) {
        self.state.lock().frame_failures = frames;
    }

    /// Make every device command fail.
    pub fn set_devices_failing(&self, failing: bool) {
        self.state.lock().devices_failing = failing;
    }

    /// Offset the point users aim at when calibrating `device` from `station`.
    pub fn set_aim_error(&self, device: DeviceId, station: Station, offset: Vector3) {
        self.state.lock().aim_errors.insert((device, station), offset);
    }

    /// Add (or move) a tracked user standing with hands lowered.
    pub fn place_user(&self, user: UserId, head: Vector3) {
        self.state.lock().users.insert(user, SimUser::standing_at(head));
    }

    pub fn remove_user(&self, user: UserId) {
        self.state.lock().users.remove(&user);
    }

    pub fn set_tracking(&self, user: UserId, tracking: bool) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.tracking = tracking;
        }
    }

    pub fn set_confidence(&self, user: UserId, confidence: f32) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.confidence = confidence;
        }
    }

    /// Override the tracker confidence of a single joint.
    pub fn set_joint_confidence(&self, user: UserId, joint: Joint, confidence: f32) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.joint_confidence.insert(joint, confidence);
        }
    }

    pub fn point_left_at(&self, user: UserId, target: Vector3) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.left_hand = u.reach_toward(target);
        }
    }

    pub fn point_right_at(&self, user: UserId, target: Vector3) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.right_hand = u.reach_toward(target);
        }
    }

    /// Point the right hand at a device's true position.
    pub fn point_at_device(&self, user: UserId, device: DeviceId) {
        let position = self.state.lock().devices.get(&device).map(|d| d.position);
        if let Some(position) = position {
            self.point_right_at(user, position);
        }
    }

    pub fn lower_hands(&self, user: UserId) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.lower_hands();
        }
    }

    /// Hold both hands in front of the body at height `y`.
    pub fn hold_hands_at(&self, user: UserId, y: f64) {
        if let Some(u) = self.state.lock().user_mut(user) {
            u.left_hand = Vector3::new(u.head.x - 250.0, y, u.head.z + 400.0);
            u.right_hand = Vector3::new(u.head.x + 250.0, y, u.head.z + 400.0);
        }
    }

    /// Head height of a user.
    pub fn head_y(&self, user: UserId) -> Option<f64> {
        self.state.lock().users.get(&user).map(|u| u.head.y)
    }

    pub fn is_on(&self, device: DeviceId) -> bool {
        self.state.lock().devices.get(&device).map(|d| d.on).unwrap_or(false)
    }

    pub fn level(&self, device: DeviceId) -> Option<u8> {
        self.state.lock().devices.get(&device).map(|d| d.level)
    }

    pub fn device_position(&self, device: DeviceId) -> Option<Vector3> {
        self.state.lock().devices.get(&device).map(|d| d.position)
    }

    /// Commands accepted so far.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Prompts delivered so far.
    pub fn prompts(&self) -> Vec<CalibrationPrompt> {
        self.state.lock().prompts.clone()
    }
}

impl SkeletonTracker for SimulatedRoom {
    fn users(&self) -> Result<Vec<UserId>, TrackerError> {
        let mut state = self.state.lock();
        if state.frame_failures > 0 {
            state.frame_failures -= 1;
            return Err(TrackerError::Frame("simulated frame drop".to_string()));
        }
        Ok(state.users.keys().copied().collect())
    }

    fn is_tracking(&self, user: UserId) -> bool {
        self.state.lock().users.get(&user).map(|u| u.tracking).unwrap_or(false)
    }

    fn joint(&self, user: UserId, joint: Joint) -> Result<JointPosition, TrackerError> {
        let state = self.state.lock();
        let u = state.users.get(&user).ok_or(TrackerError::UnknownUser(user))?;
        if !u.tracking {
            return Err(TrackerError::NotTracking(user));
        }

        let mut position = u.joint(joint);
        if state.jitter > 0.0 {
            let mut rng = rand::rng();
            let j = state.jitter;
            position += Vector3::new(
                rng.random_range(-j..=j),
                rng.random_range(-j..=j),
                rng.random_range(-j..=j),
            );
        }
        Ok(JointPosition::new(position, u.confidence(joint)))
    }
}

impl DeviceSink for SimulatedRoom {
    fn devices(&self) -> Result<Vec<DeviceId>, DeviceError> {
        Ok(self.state.lock().devices.keys().copied().collect())
    }

    fn turn_on(&self, device: DeviceId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let d = state.device_mut(device)?;
        d.on = true;
        d.level = 100;
        state.commands.push(DeviceCommand::On(device));
        Ok(())
    }

    fn turn_off(&self, device: DeviceId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let d = state.device_mut(device)?;
        d.on = false;
        d.level = 0;
        state.commands.push(DeviceCommand::Off(device));
        Ok(())
    }

    fn set_level(&self, device: DeviceId, percent: u8) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let d = state.device_mut(device)?;
        d.level = percent.min(100);
        d.on = d.level > 0;
        state.commands.push(DeviceCommand::Level(device, percent));
        Ok(())
    }

    fn turn_on_all(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.devices_failing {
            return Err(DeviceError::Unavailable("simulated network failure".to_string()));
        }
        for d in state.devices.values_mut() {
            d.on = true;
            d.level = 100;
        }
        state.commands.push(DeviceCommand::AllOn);
        Ok(())
    }

    fn turn_off_all(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.devices_failing {
            return Err(DeviceError::Unavailable("simulated network failure".to_string()));
        }
        for d in state.devices.values_mut() {
            d.on = false;
            d.level = 0;
        }
        state.commands.push(DeviceCommand::AllOff);
        Ok(())
    }
}

impl Prompter for SimulatedRoom {
    fn prompt(&self, prompt: &CalibrationPrompt) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.prompts.push(prompt.clone());

        match *prompt {
            CalibrationPrompt::MoveToStation(station) => {
                state.station = Some(station);
                if let Some(head) = state.stations.get(&station).copied() {
                    for user in state.users.values_mut() {
                        user.move_to(head);
                    }
                }
            }
            CalibrationPrompt::DeviceLit(device) => {
                let Some(position) = state.devices.get(&device).map(|d| d.position) else {
                    return;
                };
                let error = state
                    .station
                    .and_then(|s| state.aim_errors.get(&(device, s)).copied())
                    .unwrap_or(Vector3::ZERO);
                for user in state.users.values_mut() {
                    user.right_hand = user.reach_toward(position + error);
                }
            }
            CalibrationPrompt::DeviceReleased(_) => {
                for user in state.users.values_mut() {
                    user.lower_hands();
                }
            }
            CalibrationPrompt::Finished { .. } | CalibrationPrompt::Aborted(_) => {}
        }
    }
}
