//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Create a fresh room; the creator is allow-listed and joined
    CreateRoom { name: String },

    /// Join (or rejoin) a provisioned room
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: String, identity: Uuid },

    /// Movement intent for this tick; only the latest is kept
    Move { input: MoveInput },

    /// Fire a bullet, subject to the cooldown
    Shoot,
}

/// Movement flags plus the yaw delta accumulated since the last message
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveInput {
    #[serde(default)]
    pub forward: bool,
    #[serde(default)]
    pub backward: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub rotation_delta: f32,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Unicast: assigned player id and display data
    #[serde(rename_all = "camelCase")]
    YourId {
        id: Uuid,
        name: String,
        profile_image: Option<String>,
    },

    /// Unicast: confirmation with the room code
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_code: String },

    /// Unicast: join rejection reason
    ErrorRoom { msg: String },

    /// Full world state for a joining or newly playing participant
    #[serde(rename_all = "camelCase")]
    Init {
        players: HashMap<Uuid, PlayerData>,
        obstacles: Vec<ObstacleData>,
        moving_obstacles: Vec<ObstacleData>,
    },

    /// Roster refresh broadcast when someone joins or reconnects
    #[serde(rename_all = "camelCase")]
    NewPlayerConnected {
        players: HashMap<Uuid, PlayerData>,
        moving_obstacles: Vec<ObstacleData>,
    },

    /// Authoritative state, broadcast every tick while playing
    #[serde(rename_all = "camelCase")]
    StateUpdate {
        players: HashMap<Uuid, PlayerData>,
        bullets: Vec<BulletData>,
        moving_obstacles: Vec<ObstacleData>,
    },

    /// A bullet left the world (expiry or impact)
    #[serde(rename_all = "camelCase")]
    BulletRemove { bullet_id: u64 },

    /// A bullet struck an obstacle at this position
    #[serde(rename_all = "camelCase")]
    BulletHitObstacle { bullet_pos: Position },

    /// A player took damage
    #[serde(rename_all = "camelCase")]
    PlayerHit { target_id: Uuid, new_health: f32 },

    /// Match conclusion
    #[serde(rename_all = "camelCase")]
    PlayerWon {
        winner_id: Uuid,
        loser_id: Uuid,
        winner_name: String,
        loser_name: String,
    },

    /// A player lost connectivity (grace window running)
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected { player_id: Uuid },

    /// A player's grace window lapsed; they are gone for good
    #[serde(rename_all = "camelCase")]
    PlayerDropped { player_id: Uuid },
}

/// Player state on the wire, keyed by connection id in the containing map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation_y: f32,
    /// Movement-intent axes for animation, -1/0/1
    pub forward: f32,
    pub right: f32,
    /// Health (0-100)
    pub health: f32,
    /// Stable identity
    pub uuid: Uuid,
    pub name: String,
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletData {
    pub id: u64,
    /// Connection id of the owner, for shoot animation on remotes
    pub owner_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation_y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObstacleData {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation_y: f32,
    pub size: SizeData,
    pub prefab_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeData {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
