//! Two-handed dimming gesture.
//!
//! Holding both hands level above the head and lowering them dims every
//! device down. Holding them level with the shoulders and raising them dims
//! up. The gesture lasts as long as the hands stay level with each other.

use crate::config::DimmingConfig;
use crate::geometry::EPSILON;
use crate::tracker::GestureSample;

/// Which way an active gesture dims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimDirection {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy)]
struct ActiveDim {
    direction: DimDirection,
    start_y: f64,
}

/// Recognizer for the dimming gesture of a single user.
#[derive(Debug, Clone)]
pub struct DimmingGesture {
    config: DimmingConfig,
    active: Option<ActiveDim>,
}

impl DimmingGesture {
    pub fn new(config: DimmingConfig) -> Self {
        Self { config, active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn direction(&self) -> Option<DimDirection> {
        self.active.map(|a| a.direction)
    }

    pub fn reset(&mut self) {
        if self.active.take().is_some() {
            tracing::debug!("Dimming gesture ended");
        }
    }

    /// Feed one sample. Returns the level to apply while the gesture is active.
    pub fn update(&mut self, sample: &GestureSample) -> Option<u8> {
        if !self.config.enabled {
            return None;
        }

        let tolerance = self.config.vertical_tolerance;
        let (Some(left_hand), Some(right_hand)) = (sample.left_hand, sample.right_hand) else {
            self.reset();
            return None;
        };
        let (left_y, right_y) = (left_hand.y, right_hand.y);
        if (left_y - right_y).abs() > tolerance {
            self.reset();
            return None;
        }
        let hands_y = (left_y + right_y) * 0.5;

        let active = match self.active {
            Some(active) => active,
            None => {
                let direction = if left_y > sample.head.y && right_y > sample.head.y {
                    DimDirection::Down
                } else if matches!(
                    (sample.left_shoulder, sample.right_shoulder),
                    (Some(left), Some(right))
                        if (left_y - left.y).abs() <= tolerance
                            && (right_y - right.y).abs() <= tolerance
                ) {
                    DimDirection::Up
                } else {
                    return None;
                };

                tracing::debug!(?direction, "Dimming gesture started");
                let active = ActiveDim {
                    direction,
                    start_y: hands_y,
                };
                self.active = Some(active);
                active
            }
        };

        let moved = match active.direction {
            DimDirection::Down => active.start_y - hands_y,
            DimDirection::Up => hands_y - active.start_y,
        };
        let fraction = (moved / self.config.total_dimming_distance.max(EPSILON)).clamp(0.0, 1.0);
        let percent = (fraction * 100.0).round() as u8;

        Some(match active.direction {
            DimDirection::Down => 100 - percent,
            DimDirection::Up => percent,
        })
    }
}
