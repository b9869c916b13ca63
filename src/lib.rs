//! Spatial Controller
//!
//! Point-and-gesture control of room devices using depth-sensor skeleton
//! tracking:
//! - Device calibration by triangulating two pointing rays per device
//! - Per-device focus and debounce so a sustained point toggles a device once
//! - A two-handed gesture that dims every device

pub mod calibration;
pub mod config;
pub mod context;
pub mod device;
pub mod engine;
pub mod geometry;
pub mod sim;
pub mod telemetry;
pub mod tracker;

pub use config::ControllerConfig;
pub use context::ControllerContext;
pub use engine::{EngineState, GestureEngine, TickReport};
