//! Latest pointer rays, shared with display code.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::geometry::Ray3D;
use crate::tracker::UserId;

/// A user's pointer rays from one tick. A ray is missing when its hand
/// was not tracked confidently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerRays {
    pub user: UserId,
    pub left: Option<Ray3D>,
    pub right: Option<Ray3D>,
}

/// Lock-guarded slot holding the most recent [`PointerRays`].
///
/// Clones share the same slot. Readers always get a copy.
#[derive(Debug, Clone, Default)]
pub struct RaySnapshot {
    inner: Arc<Mutex<Option<PointerRays>>>,
}

impl RaySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, rays: PointerRays) {
        *self.inner.lock() = Some(rays);
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    /// Copy of the current rays, if any user is tracked.
    pub fn get(&self) -> Option<PointerRays> {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vector3;

    #[test]
    fn test_clones_share_slot() {
        let snapshot = RaySnapshot::new();
        let reader = snapshot.clone();
        assert!(reader.get().is_none());

        let rays = PointerRays {
            user: 1,
            left: Some(Ray3D::new(Vector3::ZERO, Vector3::X)),
            right: None,
        };
        snapshot.publish(rays);
        assert_eq!(reader.get(), Some(rays));

        snapshot.clear();
        assert!(reader.get().is_none());
    }
}
