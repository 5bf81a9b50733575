//! Room state and the entities it owns: players, projectiles, obstacles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use uuid::Uuid;

use crate::game::geometry::{Obb, Vec3};
use crate::util::time::tick_delta;
use crate::ws::protocol::MoveInput;

/// Players required before a room leaves `Waiting`.
pub const REQUIRED_PLAYERS: usize = 2;

pub const MAX_HEALTH: f32 = 100.0;

/// Player bounding box, full extents.
pub const PLAYER_SIZE: Vec3 = Vec3::new(0.9, 1.0, 0.9);

/// Bullet bounding box, full extents.
pub const BULLET_SIZE: Vec3 = Vec3::new(0.2, 0.2, 0.2);

/// Movement step per tick along each pressed axis. Opposing flags cancel;
/// simultaneous forward+strafe adds both components without normalization,
/// so diagonal movement is faster than axis-aligned movement. Gameplay
/// balance depends on this, keep it.
pub const MOVE_STEP: f32 = 0.05;

/// Bullet travel per tick.
pub const BULLET_STEP: f32 = 0.5;

pub const BULLET_LIFETIME_SECS: f32 = 2.0;
pub const BULLET_DAMAGE: f32 = 10.0;

/// Bullets spawn this far in front of the shooter.
pub const BULLET_SPAWN_OFFSET: f32 = 1.0;

pub const SHOOT_COOLDOWN_SECS: f32 = 0.5;

/// How long a disconnected player may reconnect before being dropped.
pub const DISCONNECT_GRACE_SECS: u64 = 10;

/// A provisioned room nobody ever joined is disposed after this long.
pub const ROOM_IDLE_TIMEOUT_SECS: u64 = 300;

/// Spawn position and yaw per roster slot.
pub const SPAWN_POINTS: [(Vec3, f32); 2] = [
    (Vec3::new(0.0, 0.0, -6.0), 0.0),
    (Vec3::new(0.0, 0.0, 6.0), 180.0),
];

/// Process-wide bullet id counter.
static NEXT_BULLET_ID: AtomicU64 = AtomicU64::new(1);

/// Room lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Waiting for the full roster to join
    Waiting,
    /// Match in progress
    Playing,
    /// Terminal; room is scheduled for removal
    Finished,
}

/// An identity allowed to join a room, with its display data.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub identity: Uuid,
    pub name: String,
    pub profile_image: Option<String>,
}

/// Authoritative player state
#[derive(Debug, Clone)]
pub struct Player {
    /// Stable external identity; survives reconnects.
    pub identity: Uuid,
    /// Transient connection id; replaced on reconnect.
    pub conn_id: Uuid,
    pub name: String,
    pub profile_image: Option<String>,

    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Yaw in degrees, normalized to [0, 360).
    pub rotation_y: f32,
    /// Movement-intent axes for remote animation, -1/0/1.
    pub forward: f32,
    pub right: f32,

    pub health: f32,
    /// Seconds until the next shot is allowed.
    pub shoot_cooldown: f32,

    /// Set while the player is in the disconnect grace window.
    pub grace_deadline: Option<Instant>,
}

impl Player {
    pub fn new(conn_id: Uuid, entry: &RosterEntry, spawn: (Vec3, f32)) -> Self {
        let (pos, yaw) = spawn;
        Self {
            identity: entry.identity,
            conn_id,
            name: entry.name.clone(),
            profile_image: entry.profile_image.clone(),
            x: pos.x,
            y: pos.y,
            z: pos.z,
            rotation_y: yaw,
            forward: 0.0,
            right: 0.0,
            health: MAX_HEALTH,
            shoot_cooldown: 0.0,
            grace_deadline: None,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.grace_deadline.is_some()
    }

    /// Bounding box at the player's current position.
    pub fn obb(&self) -> Obb {
        self.obb_at(self.x, self.z)
    }

    /// Bounding box at a candidate x/z with current height and yaw.
    pub fn obb_at(&self, x: f32, z: f32) -> Obb {
        Obb::new(
            Vec3::new(x, self.y, z),
            Vec3::new(PLAYER_SIZE.x / 2.0, PLAYER_SIZE.y / 2.0, PLAYER_SIZE.z / 2.0),
            self.rotation_y,
        )
    }

    /// Apply damage, clamping health at zero. Returns true on death.
    pub fn apply_damage(&mut self, damage: f32) -> bool {
        self.health = (self.health - damage).max(0.0);
        self.health <= 0.0
    }
}

/// Live projectile
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: u64,
    /// Owner identity (not connection id): exclusion from the owner's own
    /// shots must survive a mid-flight reconnect.
    pub owner: Uuid,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Direction of travel, degrees.
    pub rotation_y: f32,
    /// Remaining lifetime in seconds; strictly decreases per tick.
    pub ttl: f32,
}

impl Projectile {
    /// Spawn a bullet in front of the shooter at center height.
    pub fn fired_by(player: &Player) -> Self {
        let rad = player.rotation_y.to_radians();
        Self {
            id: NEXT_BULLET_ID.fetch_add(1, Ordering::Relaxed),
            owner: player.identity,
            x: player.x + rad.sin() * BULLET_SPAWN_OFFSET,
            y: player.y,
            z: player.z + rad.cos() * BULLET_SPAWN_OFFSET,
            rotation_y: player.rotation_y,
            ttl: BULLET_LIFETIME_SECS,
        }
    }

    /// Advance one tick. Returns false once the lifetime has run out.
    pub fn advance(&mut self) -> bool {
        let rad = self.rotation_y.to_radians();
        self.x += rad.sin() * BULLET_STEP;
        self.z += rad.cos() * BULLET_STEP;
        self.ttl -= tick_delta();
        self.ttl > 0.0
    }

    pub fn obb(&self) -> Obb {
        Obb::new(
            Vec3::new(self.x, self.y, self.z),
            Vec3::new(BULLET_SIZE.x / 2.0, BULLET_SIZE.y / 2.0, BULLET_SIZE.z / 2.0),
            self.rotation_y,
        )
    }
}

/// Static obstacle: a yaw-rotated box.
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub id: u32,
    pub position: Vec3,
    /// Full extents; halved for collision.
    pub size: Vec3,
    pub rotation_y: f32,
    /// Index into the client's prefab table.
    pub prefab_type: u8,
}

impl Obstacle {
    pub fn obb(&self) -> Obb {
        Obb::new(
            self.position,
            Vec3::new(self.size.x / 2.0, self.size.y / 2.0, self.size.z / 2.0),
            self.rotation_y,
        )
    }
}

/// Obstacle oscillating vertically between two heights.
#[derive(Debug, Clone)]
pub struct MovingObstacle {
    pub id: u32,
    pub position: Vec3,
    pub size: Vec3,
    pub rotation_y: f32,
    pub prefab_type: u8,

    pub min_y: f32,
    pub max_y: f32,
    /// Units per second along Y.
    pub speed: f32,
    /// +1.0 rising, -1.0 falling.
    pub dir: f32,
}

impl MovingObstacle {
    /// Advance one tick, ping-ponging between the height bounds.
    /// Overshoot is clamped back to the bound before reversing.
    pub fn advance(&mut self) {
        self.position.y += self.speed * self.dir * tick_delta();
        if self.position.y >= self.max_y {
            self.position.y = self.max_y;
            self.dir = -1.0;
        } else if self.position.y <= self.min_y {
            self.position.y = self.min_y;
            self.dir = 1.0;
        }
    }

    pub fn obb(&self) -> Obb {
        Obb::new(
            self.position,
            Vec3::new(self.size.x / 2.0, self.size.y / 2.0, self.size.z / 2.0),
            self.rotation_y,
        )
    }
}

/// Per-room mutable aggregate, owned exclusively by the room task.
pub struct RoomState {
    pub code: String,
    pub phase: RoomPhase,
    pub roster: Vec<RosterEntry>,
    /// Connection id -> player.
    pub players: HashMap<Uuid, Player>,
    /// Latest unconsumed input per connection; inserts overwrite.
    pub pending_inputs: HashMap<Uuid, MoveInput>,
    pub projectiles: Vec<Projectile>,
    pub obstacles: Vec<Obstacle>,
    pub moving_obstacles: Vec<MovingObstacle>,
    pub created_at: Instant,
}

impl RoomState {
    pub fn new(code: String, roster: Vec<RosterEntry>) -> Self {
        let (obstacles, moving_obstacles) = arena_layout();
        Self {
            code,
            phase: RoomPhase::Waiting,
            roster,
            players: HashMap::new(),
            pending_inputs: HashMap::new(),
            projectiles: Vec::new(),
            obstacles,
            moving_obstacles,
            created_at: Instant::now(),
        }
    }

    pub fn roster_entry(&self, identity: Uuid) -> Option<&RosterEntry> {
        self.roster.iter().find(|e| e.identity == identity)
    }

    /// Spawn slot for an identity, fixed by roster position.
    pub fn spawn_for(&self, identity: Uuid) -> (Vec3, f32) {
        let idx = self
            .roster
            .iter()
            .position(|e| e.identity == identity)
            .unwrap_or(0);
        SPAWN_POINTS[idx % SPAWN_POINTS.len()]
    }

    /// Connection id of the player holding an identity, if present.
    pub fn conn_for_identity(&self, identity: Uuid) -> Option<Uuid> {
        self.players
            .values()
            .find(|p| p.identity == identity)
            .map(|p| p.conn_id)
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| !p.is_disconnected()).count()
    }
}

/// The fixed arena: boundary walls, crates, and two rising platforms.
pub fn arena_layout() -> (Vec<Obstacle>, Vec<MovingObstacle>) {
    let wall = |id, x: f32, z: f32, sx: f32, sz: f32| Obstacle {
        id,
        position: Vec3::new(x, 0.0, z),
        size: Vec3::new(sx, 3.0, sz),
        rotation_y: 0.0,
        prefab_type: 0,
    };
    let crate_box = |id, x: f32, z: f32, yaw: f32| Obstacle {
        id,
        position: Vec3::new(x, 0.0, z),
        size: Vec3::new(2.0, 1.5, 2.0),
        rotation_y: yaw,
        prefab_type: 1,
    };

    let obstacles = vec![
        wall(0, 0.0, 10.5, 22.0, 1.0),
        wall(1, 0.0, -10.5, 22.0, 1.0),
        wall(2, 10.5, 0.0, 1.0, 22.0),
        wall(3, -10.5, 0.0, 1.0, 22.0),
        crate_box(4, 3.5, 2.0, 30.0),
        crate_box(5, -4.0, -3.0, 0.0),
        crate_box(6, 5.0, -5.0, 45.0),
        crate_box(7, -5.0, 4.5, 15.0),
    ];

    let moving_obstacles = vec![
        MovingObstacle {
            id: 0,
            position: Vec3::new(2.0, 0.0, -2.0),
            size: Vec3::new(1.5, 0.5, 1.5),
            rotation_y: 0.0,
            prefab_type: 2,
            min_y: 0.0,
            max_y: 2.5,
            speed: 1.0,
            dir: 1.0,
        },
        MovingObstacle {
            id: 1,
            position: Vec3::new(-2.5, 0.0, 3.0),
            size: Vec3::new(1.5, 0.5, 1.5),
            rotation_y: 0.0,
            prefab_type: 2,
            min_y: 0.0,
            max_y: 2.0,
            speed: 1.5,
            dir: 1.0,
        },
    ];

    (obstacles, moving_obstacles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> RosterEntry {
        RosterEntry {
            identity: Uuid::new_v4(),
            name: name.to_string(),
            profile_image: None,
        }
    }

    #[test]
    fn spawn_points_are_clear_of_the_layout() {
        let (obstacles, moving) = arena_layout();
        for (pos, yaw) in SPAWN_POINTS {
            let e = entry("probe");
            let mut p = Player::new(Uuid::new_v4(), &e, (pos, yaw));
            p.rotation_y = yaw;
            let body = p.obb();
            for obs in &obstacles {
                assert!(!body.intersects(&obs.obb()), "spawn {pos:?} inside obstacle {}", obs.id);
            }
            for obs in &moving {
                assert!(!body.intersects(&obs.obb()), "spawn {pos:?} inside mover {}", obs.id);
            }
        }
    }

    #[test]
    fn damage_clamps_at_zero() {
        let e = entry("a");
        let mut p = Player::new(Uuid::new_v4(), &e, SPAWN_POINTS[0]);
        assert!(!p.apply_damage(30.0));
        assert_eq!(p.health, 70.0);
        assert!(p.apply_damage(500.0));
        assert_eq!(p.health, 0.0);
        // Further damage stays clamped
        assert!(p.apply_damage(10.0));
        assert_eq!(p.health, 0.0);
    }

    #[test]
    fn bullet_ids_are_monotonic() {
        let e = entry("a");
        let p = Player::new(Uuid::new_v4(), &e, SPAWN_POINTS[0]);
        let a = Projectile::fired_by(&p);
        let b = Projectile::fired_by(&p);
        assert!(b.id > a.id);
    }

    #[test]
    fn bullet_lifetime_strictly_decreases() {
        let e = entry("a");
        let p = Player::new(Uuid::new_v4(), &e, SPAWN_POINTS[0]);
        let mut bullet = Projectile::fired_by(&p);
        let mut last = bullet.ttl;
        while bullet.advance() {
            assert!(bullet.ttl < last);
            last = bullet.ttl;
        }
        assert!(bullet.ttl <= 0.0);
    }

    #[test]
    fn moving_obstacle_ping_pongs_within_bounds() {
        let (_, mut moving) = arena_layout();
        let m = &mut moving[0];
        let mut seen_top = false;
        let mut seen_bottom = false;
        for _ in 0..2000 {
            m.advance();
            assert!(m.position.y >= m.min_y && m.position.y <= m.max_y);
            if m.position.y == m.max_y {
                seen_top = true;
            }
            if seen_top && m.position.y == m.min_y {
                seen_bottom = true;
            }
        }
        assert!(seen_top && seen_bottom, "oscillation never completed a cycle");
    }

    #[test]
    fn spawn_slots_follow_roster_order() {
        let first = entry("a");
        let second = entry("b");
        let state = RoomState::new("1234".into(), vec![first.clone(), second.clone()]);
        assert_eq!(state.spawn_for(first.identity).0.z, SPAWN_POINTS[0].0.z);
        assert_eq!(state.spawn_for(second.identity).0.z, SPAWN_POINTS[1].0.z);
    }
}
