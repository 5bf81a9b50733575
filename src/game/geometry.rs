//! Oriented-bounding-box math: corner generation, axis projection and the
//! separating-axis intersection test. Pure functions, no game state.

/// A vector in 3-D space. Y is up.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Dot product with another vector.
    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
}

/// A box in world space: center position, half-extents along its local
/// axes, and a yaw rotation about the vertical axis in degrees.
#[derive(Debug, Clone, Copy)]
pub struct Obb {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub yaw_deg: f32,
}

impl Obb {
    pub fn new(center: Vec3, half_extents: Vec3, yaw_deg: f32) -> Self {
        Self {
            center,
            half_extents,
            yaw_deg,
        }
    }

    /// The box's local right/up/forward axes in world space.
    /// Yaw 0 faces +Z; right is +X.
    pub fn axes(&self) -> [Vec3; 3] {
        let rad = self.yaw_deg.to_radians();
        let (s, c) = rad.sin_cos();
        [
            Vec3::new(c, 0.0, -s), // right
            Vec3::new(0.0, 1.0, 0.0), // up
            Vec3::new(s, 0.0, c), // forward
        ]
    }

    /// The 8 world-space corners.
    pub fn corners(&self) -> [Vec3; 8] {
        let [right, up, forward] = self.axes();
        let he = self.half_extents;

        let mut out = [Vec3::default(); 8];
        let mut i = 0;
        for sx in [-1.0f32, 1.0] {
            for sy in [-1.0f32, 1.0] {
                for sz in [-1.0f32, 1.0] {
                    out[i] = Vec3::new(
                        self.center.x
                            + right.x * he.x * sx
                            + up.x * he.y * sy
                            + forward.x * he.z * sz,
                        self.center.y
                            + right.y * he.x * sx
                            + up.y * he.y * sy
                            + forward.y * he.z * sz,
                        self.center.z
                            + right.z * he.x * sx
                            + up.z * he.y * sy
                            + forward.z * he.z * sz,
                    );
                    i += 1;
                }
            }
        }
        out
    }

    /// Project the corners onto an axis, returning the covered interval.
    fn project(&self, axis: &Vec3) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for corner in self.corners() {
            let d = corner.dot(axis);
            min = min.min(d);
            max = max.max(d);
        }
        (min, max)
    }

    /// Separating-axis test restricted to each box's 3 local axes.
    /// Exact for yaw-rotated boxes; boundary contact counts as overlap.
    pub fn intersects(&self, other: &Obb) -> bool {
        let axes_a = self.axes();
        let axes_b = other.axes();

        for axis in axes_a.iter().chain(axes_b.iter()) {
            let (min_a, max_a) = self.project(axis);
            let (min_b, max_b) = other.project(axis);
            if !(max_a >= min_b && max_b >= min_a) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aabb(cx: f32, cy: f32, cz: f32, hx: f32, hy: f32, hz: f32) -> Obb {
        Obb::new(Vec3::new(cx, cy, cz), Vec3::new(hx, hy, hz), 0.0)
    }

    /// Naive axis-aligned overlap check for cross-validation at yaw 0.
    fn naive_aabb_overlap(a: &Obb, b: &Obb) -> bool {
        (a.center.x - b.center.x).abs() <= a.half_extents.x + b.half_extents.x
            && (a.center.y - b.center.y).abs() <= a.half_extents.y + b.half_extents.y
            && (a.center.z - b.center.z).abs() <= a.half_extents.z + b.half_extents.z
    }

    #[test]
    fn corners_wrap_at_full_turn() {
        let a = Obb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 1.0, 0.5), 37.0);
        let b = Obb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 1.0, 0.5), 37.0 + 360.0);

        for (ca, cb) in a.corners().iter().zip(b.corners().iter()) {
            assert!((ca.x - cb.x).abs() < 1e-4);
            assert!((ca.y - cb.y).abs() < 1e-4);
            assert!((ca.z - cb.z).abs() < 1e-4);
        }
    }

    #[test]
    fn yaw_zero_forward_is_positive_z() {
        let obb = Obb::new(Vec3::default(), Vec3::new(1.0, 1.0, 1.0), 0.0);
        let [right, up, forward] = obb.axes();
        assert!((right.x - 1.0).abs() < 1e-6);
        assert!((up.y - 1.0).abs() < 1e-6);
        assert!((forward.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sat_matches_naive_aabb_when_unrotated() {
        let cases = [
            (aabb(0.0, 0.0, 0.0, 1.0, 1.0, 1.0), aabb(1.5, 0.0, 0.0, 1.0, 1.0, 1.0)),
            (aabb(0.0, 0.0, 0.0, 1.0, 1.0, 1.0), aabb(3.0, 0.0, 0.0, 1.0, 1.0, 1.0)),
            (aabb(0.0, 0.0, 0.0, 1.0, 1.0, 1.0), aabb(0.0, 2.5, 0.0, 1.0, 1.0, 1.0)),
            (aabb(0.0, 0.0, 0.0, 1.0, 1.0, 1.0), aabb(1.9, 1.9, 1.9, 1.0, 1.0, 1.0)),
            (aabb(-2.0, 0.0, 4.0, 0.5, 1.0, 0.5), aabb(2.0, 0.0, 4.0, 0.5, 1.0, 0.5)),
        ];

        for (a, b) in cases {
            assert_eq!(a.intersects(&b), naive_aabb_overlap(&a, &b), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn boundary_contact_counts_as_overlap() {
        let a = aabb(0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = aabb(2.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        assert!(a.intersects(&b));
    }

    #[test]
    fn rotation_changes_the_outcome() {
        // A long thin box beside a unit cube: axis-aligned it misses,
        // rotated a quarter turn its long axis reaches the cube.
        let cube = aabb(0.0, 0.0, 0.0, 0.5, 0.5, 0.5);
        let slab_aligned = Obb::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.4, 0.5, 2.0), 0.0);
        let slab_rotated = Obb::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.4, 0.5, 2.0), 90.0);

        assert!(!cube.intersects(&slab_aligned));
        assert!(cube.intersects(&slab_rotated));
    }

    #[test]
    fn intersection_is_symmetric() {
        let a = Obb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 30.0);
        let b = Obb::new(Vec3::new(1.2, 0.0, 1.2), Vec3::new(1.0, 1.0, 1.0), 60.0);
        assert_eq!(a.intersects(&b), b.intersects(&a));
    }
}
