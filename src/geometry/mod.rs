//! 3D geometry for pointing and calibration.

mod ray;

pub use ray::Ray3D;

/// Double-precision point/vector in tracker space (millimetres, Y up).
pub type Vector3 = glam::DVec3;

/// Tolerance used for degeneracy checks.
pub const EPSILON: f64 = 1e-9;

/// Average a sequence of points.
///
/// Returns `None` for an empty sequence.
pub fn average(points: &[Vector3]) -> Option<Vector3> {
    if points.is_empty() {
        return None;
    }

    let sum: Vector3 = points.iter().copied().sum();
    Some(sum / points.len() as f64)
}

/// Point halfway between `a` and `b`.
pub fn midpoint(a: Vector3, b: Vector3) -> Vector3 {
    (a + b) * 0.5
}
