//! Handles to the external collaborators.

use std::sync::Arc;

use crate::calibration::{LogPrompter, Prompter};
use crate::device::DeviceSink;
use crate::tracker::SkeletonTracker;

/// Everything outside the crate that the engine and calibration talk to.
#[derive(Clone)]
pub struct ControllerContext {
    pub tracker: Arc<dyn SkeletonTracker>,
    pub devices: Arc<dyn DeviceSink>,
    pub prompter: Arc<dyn Prompter>,
}

impl ControllerContext {
    /// Context whose calibration prompts only go to the log.
    pub fn new(tracker: Arc<dyn SkeletonTracker>, devices: Arc<dyn DeviceSink>) -> Self {
        Self {
            tracker,
            devices,
            prompter: Arc::new(LogPrompter),
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }
}
