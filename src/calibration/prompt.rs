//! Instructions shown to the user while calibrating.

use crate::device::DeviceId;

/// One of the two places the user stands while calibrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Station {
    A,
    B,
}

impl std::fmt::Display for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Station::A => write!(f, "A"),
            Station::B => write!(f, "B"),
        }
    }
}

/// Something the user needs to be told during calibration.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationPrompt {
    MoveToStation(Station),
    DeviceLit(DeviceId),
    DeviceReleased(DeviceId),
    Finished { calibrated: usize, failed: usize },
    Aborted(String),
}

const STATION_A_TEXT: &str = "Please stand about 10 feet from the sensor on the right side \
    of the field of view, leaving room to point off to the right. When a light turns on, \
    point at it until it turns off.";

const STATION_B_TEXT: &str = "Please stand about 5 feet from the sensor on the left side \
    of the field of view, leaving room to point off to the left. Once again, point at each \
    light while it is on.";

impl std::fmt::Display for CalibrationPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationPrompt::MoveToStation(Station::A) => f.write_str(STATION_A_TEXT),
            CalibrationPrompt::MoveToStation(Station::B) => f.write_str(STATION_B_TEXT),
            CalibrationPrompt::DeviceLit(device) => write!(f, "Turning on device {}", device),
            CalibrationPrompt::DeviceReleased(device) => write!(f, "Turning off device {}", device),
            CalibrationPrompt::Finished { calibrated, failed: 0 } => write!(
                f,
                "Calibration complete for {} device(s). \
                 You can now point at lights to switch them.",
                calibrated
            ),
            CalibrationPrompt::Finished { calibrated, failed } => write!(
                f,
                "Calibration finished: {} device(s) located, {} could not be located.",
                calibrated, failed
            ),
            CalibrationPrompt::Aborted(reason) => write!(f, "Calibration stopped: {}", reason),
        }
    }
}

/// Delivers calibration prompts to the user.
pub trait Prompter: Send + Sync {
    fn prompt(&self, prompt: &CalibrationPrompt);
}

/// Prompter that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPrompter;

impl Prompter for LogPrompter {
    fn prompt(&self, prompt: &CalibrationPrompt) {
        tracing::info!(target: "spatial_controller::prompt", "{}", prompt);
    }
}
