//! Skeleton tracker interface.
//!
//! The depth-sensing SDK that detects users and tracks their joints lives
//! outside this crate. It is consumed through [`SkeletonTracker`].

use crate::geometry::{Ray3D, Vector3};

/// Tracker-assigned user identifier.
pub type UserId = u32;

/// Skeleton joints the controller reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Head,
    LeftHand,
    RightHand,
    LeftShoulder,
    RightShoulder,
}

impl std::fmt::Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Joint::Head => "head",
            Joint::LeftHand => "left hand",
            Joint::RightHand => "right hand",
            Joint::LeftShoulder => "left shoulder",
            Joint::RightShoulder => "right shoulder",
        };
        f.write_str(name)
    }
}

/// A joint position with the tracker's confidence in it (0.0 - 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPosition {
    pub position: Vector3,
    pub confidence: f32,
}

impl JointPosition {
    pub fn new(position: Vector3, confidence: f32) -> Self {
        Self { position, confidence }
    }
}

/// Errors reported by the tracker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    #[error("Tracker frame update failed: {0}")]
    Frame(String),
    #[error("Unknown user {0}")]
    UnknownUser(UserId),
    #[error("User {0} is not skeleton-tracked")]
    NotTracking(UserId),
    #[error("Low confidence for {joint} ({confidence:.2})")]
    LowConfidence { joint: Joint, confidence: f32 },
}

/// Source of tracked users and their joint positions.
pub trait SkeletonTracker: Send + Sync {
    /// Users currently known to the tracker (tracked or not).
    fn users(&self) -> Result<Vec<UserId>, TrackerError>;

    /// Whether the user's skeleton is actively tracked.
    fn is_tracking(&self, user: UserId) -> bool;

    /// Current position of a joint.
    fn joint(&self, user: UserId, joint: Joint) -> Result<JointPosition, TrackerError>;

    /// Users whose skeleton is actively tracked, in tracker order.
    fn tracked_users(&self) -> Result<Vec<UserId>, TrackerError> {
        Ok(self
            .users()?
            .into_iter()
            .filter(|&user| self.is_tracking(user))
            .collect())
    }
}

/// Read a joint, rejecting readings below `min_confidence`.
pub fn confident_joint(
    tracker: &dyn SkeletonTracker,
    user: UserId,
    joint: Joint,
    min_confidence: f32,
) -> Result<Vector3, TrackerError> {
    let reading = tracker.joint(user, joint)?;
    if reading.confidence < min_confidence {
        return Err(TrackerError::LowConfidence {
            joint,
            confidence: reading.confidence,
        });
    }
    Ok(reading.position)
}

/// One tick's worth of joint positions for a user.
///
/// Only the head is required. A joint below the confidence threshold is
/// `None`, so a user with one occluded hand can still point with the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureSample {
    pub head: Vector3,
    pub left_hand: Option<Vector3>,
    pub right_hand: Option<Vector3>,
    pub left_shoulder: Option<Vector3>,
    pub right_shoulder: Option<Vector3>,
}

impl GestureSample {
    /// Read the joints for `user`. Fails only when the head is unusable.
    pub fn capture(
        tracker: &dyn SkeletonTracker,
        user: UserId,
        min_confidence: f32,
    ) -> Result<Self, TrackerError> {
        let optional = |joint| match confident_joint(tracker, user, joint, min_confidence) {
            Ok(position) => Some(position),
            Err(e) => {
                tracing::trace!(user, "Ignoring joint: {}", e);
                None
            }
        };

        Ok(Self {
            head: confident_joint(tracker, user, Joint::Head, min_confidence)?,
            left_hand: optional(Joint::LeftHand),
            right_hand: optional(Joint::RightHand),
            left_shoulder: optional(Joint::LeftShoulder),
            right_shoulder: optional(Joint::RightShoulder),
        })
    }

    /// Ray from the head through the left hand.
    pub fn left_pointer(&self) -> Option<Ray3D> {
        self.left_hand.map(|hand| Ray3D::new(self.head, hand))
    }

    /// Ray from the head through the right hand.
    pub fn right_pointer(&self) -> Option<Ray3D> {
        self.right_hand.map(|hand| Ray3D::new(self.head, hand))
    }
}
