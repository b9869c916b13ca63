//! Directed rays and the two queries the controller needs from them.

use super::{midpoint, Vector3, EPSILON};

/// A directed ray from `origin` through `through`.
///
/// Pointer rays run from the head through a hand. For the "points toward"
/// test the ray is directed, for intersection only the supporting line
/// matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray3D {
    origin: Vector3,
    through: Vector3,
}

impl Ray3D {
    pub fn new(origin: Vector3, through: Vector3) -> Self {
        Self { origin, through }
    }

    pub fn origin(&self) -> Vector3 {
        self.origin
    }

    pub fn through(&self) -> Vector3 {
        self.through
    }

    /// Vector from origin to the through point.
    pub fn direction(&self) -> Vector3 {
        self.through - self.origin
    }

    /// Whether the two defining points coincide.
    pub fn is_degenerate(&self) -> bool {
        self.direction().length_squared() < EPSILON
    }

    /// Closest points between this ray's supporting line and `other`'s.
    ///
    /// Returns `(on_self, on_other)`, or `None` when either ray is degenerate
    /// or the lines are parallel.
    pub fn closest_approach(&self, other: &Ray3D) -> Option<(Vector3, Vector3)> {
        // Shortest segment between two lines (Bourke). p1-p2 is this ray,
        // p3-p4 the other one.
        let p1 = self.origin;
        let p3 = other.origin;

        let p43 = other.through - other.origin;
        if p43.length_squared() < EPSILON {
            return None;
        }
        let p21 = self.through - self.origin;
        if p21.length_squared() < EPSILON {
            return None;
        }
        let p13 = p1 - p3;

        let d1343 = p13.dot(p43);
        let d4321 = p43.dot(p21);
        let d1321 = p13.dot(p21);
        let d4343 = p43.dot(p43);
        let d2121 = p21.dot(p21);

        // Relative test: denom / (d2121 * d4343) is sin^2 of the angle between the lines.
        let denom = d2121 * d4343 - d4321 * d4321;
        if denom.abs() < EPSILON * d2121 * d4343 {
            return None;
        }

        let numer = d1343 * d4321 - d1321 * d4343;
        let mua = numer / denom;
        let mub = (d1343 + d4321 * mua) / d4343;

        Some((p1 + p21 * mua, p3 + p43 * mub))
    }

    /// Point halfway between the two lines at their closest approach.
    ///
    /// `None` if the rays are degenerate, parallel, or their closest points
    /// are more than `max_distance` apart.
    pub fn intersection_with(&self, other: &Ray3D, max_distance: f64) -> Option<Vector3> {
        let (a, b) = self.closest_approach(other)?;
        if a.distance(b) > max_distance {
            return None;
        }
        Some(midpoint(a, b))
    }

    /// Whether `point` lies within `max_distance` of the supporting line and
    /// in front of the ray.
    pub fn close_to(&self, point: Vector3, max_distance: f64) -> bool {
        let p21 = self.direction();
        let d2121 = p21.length_squared();
        if d2121 < EPSILON {
            return false;
        }

        let mu = (point - self.origin).dot(p21) / d2121;
        let projected = self.origin + p21 * mu;

        point.distance(projected) <= max_distance && self.points_toward(point)
    }

    /// Whether `point` is closer to the through point than to the origin.
    pub fn points_toward(&self, point: Vector3) -> bool {
        point.distance(self.through) < point.distance(self.origin)
    }
}

impl std::fmt::Display for Ray3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.1}, {:.1}, {:.1}) -> ({:.1}, {:.1}, {:.1})",
            self.origin.x,
            self.origin.y,
            self.origin.z,
            self.through.x,
            self.through.y,
            self.through.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z)
    }

    fn close(a: Vector3, b: Vector3) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn test_intersection_of_skew_rays_is_midpoint() {
        let a = Ray3D::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0));
        let b = Ray3D::new(v(5.0, -5.0, 1.0), v(5.0, 5.0, 1.0));

        let (pa, pb) = a.closest_approach(&b).unwrap();
        assert!(close(pa, v(5.0, 0.0, 0.0)));
        assert!(close(pb, v(5.0, 0.0, 1.0)));

        let hit = a.intersection_with(&b, 10.0).unwrap();
        assert!(close(hit, v(5.0, 0.0, 0.5)));
    }

    #[test]
    fn test_intersection_is_symmetric() {
        let a = Ray3D::new(v(-1200.0, 150.0, 2500.0), v(-900.0, 420.0, 2210.0));
        let b = Ray3D::new(v(800.0, 180.0, 1800.0), v(600.0, 430.0, 1650.0));

        let ab = a.closest_approach(&b).unwrap();
        let gap = ab.0.distance(ab.1);

        let forward = a.intersection_with(&b, gap + 1.0).unwrap();
        let backward = b.intersection_with(&a, gap + 1.0).unwrap();
        assert!((forward - backward).length() < 1e-6);
    }

    #[test]
    fn test_intersection_of_crossing_rays() {
        let target = v(300.0, 900.0, 3000.0);
        let a = Ray3D::new(v(-1000.0, 0.0, 0.0), v(-1000.0, 0.0, 0.0).lerp(target, 0.2));
        let b = Ray3D::new(v(1500.0, 100.0, 500.0), v(1500.0, 100.0, 500.0).lerp(target, 0.3));

        let hit = a.intersection_with(&b, 1.0).unwrap();
        assert!((hit - target).length() < 1e-6);
    }

    #[test]
    fn test_parallel_rays_have_no_intersection() {
        let a = Ray3D::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0));
        let b = Ray3D::new(v(0.0, 1.0, 0.0), v(2.0, 1.0, 0.0));
        assert!(a.closest_approach(&b).is_none());
        assert!(a.intersection_with(&b, 1000.0).is_none());

        // Collinear
        let c = Ray3D::new(v(3.0, 0.0, 0.0), v(7.0, 0.0, 0.0));
        assert!(a.intersection_with(&c, 1000.0).is_none());
    }

    #[test]
    fn test_degenerate_ray_has_no_intersection() {
        let point = Ray3D::new(v(1.0, 2.0, 3.0), v(1.0, 2.0, 3.0));
        let line = Ray3D::new(v(0.0, 0.0, 0.0), v(0.0, 5.0, 5.0));
        assert!(point.is_degenerate());
        assert!(point.intersection_with(&line, 1000.0).is_none());
        assert!(line.intersection_with(&point, 1000.0).is_none());
    }

    #[test]
    fn test_distant_rays_have_no_intersection() {
        let a = Ray3D::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0));
        let b = Ray3D::new(v(5.0, -5.0, 50.0), v(5.0, 5.0, 50.0));
        assert!(a.closest_approach(&b).is_some());
        assert!(a.intersection_with(&b, 10.0).is_none());
        assert!(a.intersection_with(&b, 50.0).is_some());
    }

    #[test]
    fn test_close_to_ahead_and_behind() {
        let ray = Ray3D::new(v(0.0, 0.0, 0.0), v(0.0, 0.0, 100.0));

        assert!(ray.close_to(v(5.0, 0.0, 2000.0), 10.0));
        // Same perpendicular distance, but behind the head
        assert!(!ray.close_to(v(5.0, 0.0, -2000.0), 10.0));
        // Ahead, but too far off the line
        assert!(!ray.close_to(v(50.0, 0.0, 2000.0), 10.0));
    }

    #[test]
    fn test_close_to_with_degenerate_ray() {
        let ray = Ray3D::new(v(1.0, 1.0, 1.0), v(1.0, 1.0, 1.0));
        assert!(!ray.close_to(v(1.0, 1.0, 1.0), 10.0));
    }

    #[test]
    fn test_left_and_right_pointers() {
        let head = v(0.0, 0.0, 0.0);
        let left = Ray3D::new(head, v(100.0, 0.0, 0.0));
        let right = Ray3D::new(head, v(-100.0, 0.0, 0.0));
        let device = v(100.0, 0.0, 50.0);

        // Perpendicular distance from the device to either pointer line is 50
        assert!(left.close_to(device, 60.0));
        assert!(!right.close_to(device, 60.0));
        assert!(!left.close_to(device, 30.0));
    }
}
