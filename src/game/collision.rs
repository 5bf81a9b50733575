//! Collision checks between candidate boxes and a room's obstacle sets.

use crate::game::geometry::Obb;
use crate::game::room::{MovingObstacle, Obstacle};

/// Collision queries used by the simulation loop
pub struct CollisionSystem;

impl CollisionSystem {
    /// Whether a candidate box overlaps any obstacle, static or moving.
    /// Short-circuits on the first hit. Used as the movement gate (the
    /// displacement is discarded wholesale, no sliding) and as the
    /// projectile-obstacle impact test.
    pub fn would_collide(
        candidate: &Obb,
        obstacles: &[Obstacle],
        moving: &[MovingObstacle],
    ) -> bool {
        for obs in obstacles {
            if candidate.intersects(&obs.obb()) {
                return true;
            }
        }
        for obs in moving {
            if candidate.intersects(&obs.obb()) {
                return true;
            }
        }
        false
    }
}
