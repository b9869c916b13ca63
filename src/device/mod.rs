//! Controllable devices: the command sink interface and per-device focus state.

mod target;

pub use target::{DeviceTarget, FocusOutcome, FocusState};

/// Device identifier assigned by the home-automation network (a node id).
pub type DeviceId = u8;

/// Errors reported by the device sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("Device {0} not found")]
    NotFound(DeviceId),
    #[error("Device network unavailable: {0}")]
    Unavailable(String),
    #[error("Command rejected by device {device}: {reason}")]
    Rejected { device: DeviceId, reason: String },
}

/// Directory of controllable devices and the sink for their commands.
///
/// Commands are fire-and-forget toward the network. `Ok` means the command
/// was accepted for delivery.
pub trait DeviceSink: Send + Sync {
    /// Identifiers of all controllable devices.
    fn devices(&self) -> Result<Vec<DeviceId>, DeviceError>;

    fn turn_on(&self, device: DeviceId) -> Result<(), DeviceError>;

    fn turn_off(&self, device: DeviceId) -> Result<(), DeviceError>;

    /// Set a dimmable device's level (0-100).
    fn set_level(&self, device: DeviceId, percent: u8) -> Result<(), DeviceError>;

    fn turn_on_all(&self) -> Result<(), DeviceError>;

    fn turn_off_all(&self) -> Result<(), DeviceError>;

    /// Set every device to the same level.
    ///
    /// Stops at the first failing device.
    fn set_all_levels(&self, percent: u8) -> Result<(), DeviceError> {
        for device in self.devices()? {
            self.set_level(device, percent)?;
        }
        Ok(())
    }
}
