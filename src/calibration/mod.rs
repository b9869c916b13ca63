//! Device position calibration: the sampling protocol, its background
//! worker, and the calibration file.

mod prompt;
mod session;
mod store;
mod worker;

pub use prompt::{CalibrationPrompt, LogPrompter, Prompter, Station};
pub use session::{
    CalibrationError, CalibrationPhase, CalibrationReport, CalibrationSession, DeviceCalibration,
    DeviceOutcome,
};
pub use store::{read_records, write_records, CalibrationRecord, CalibrationStore, StoreError};
pub use worker::CalibrationHandle;
