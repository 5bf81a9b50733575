//! Builds outbound wire payloads from room state.

use std::collections::HashMap;

use uuid::Uuid;

use crate::game::room::RoomState;
use crate::ws::protocol::{BulletData, ObstacleData, PlayerData, ServerMsg, SizeData};

/// Full world snapshot sent on join and on the start of play.
pub fn init_message(state: &RoomState) -> ServerMsg {
    ServerMsg::Init {
        players: player_map(state),
        obstacles: state.obstacles.iter().map(|o| ObstacleData {
            id: o.id,
            x: o.position.x,
            y: o.position.y,
            z: o.position.z,
            rotation_y: o.rotation_y,
            size: SizeData {
                x: o.size.x,
                y: o.size.y,
                z: o.size.z,
            },
            prefab_type: o.prefab_type,
        }).collect(),
        moving_obstacles: moving_list(state),
    }
}

/// Roster refresh broadcast to existing members when someone joins.
pub fn roster_message(state: &RoomState) -> ServerMsg {
    ServerMsg::NewPlayerConnected {
        players: player_map(state),
        moving_obstacles: moving_list(state),
    }
}

/// Per-tick authoritative state broadcast.
pub fn state_update(state: &RoomState) -> ServerMsg {
    ServerMsg::StateUpdate {
        players: player_map(state),
        bullets: state
            .projectiles
            .iter()
            .map(|b| BulletData {
                id: b.id,
                owner_id: state.conn_for_identity(b.owner).unwrap_or(b.owner),
                x: b.x,
                y: b.y,
                z: b.z,
                rotation_y: b.rotation_y,
            })
            .collect(),
        moving_obstacles: moving_list(state),
    }
}

fn player_map(state: &RoomState) -> HashMap<Uuid, PlayerData> {
    state
        .players
        .values()
        .map(|p| {
            (
                p.conn_id,
                PlayerData {
                    x: p.x,
                    y: p.y,
                    z: p.z,
                    rotation_y: p.rotation_y,
                    forward: p.forward,
                    right: p.right,
                    health: p.health,
                    uuid: p.identity,
                    name: p.name.clone(),
                    profile_image: p.profile_image.clone(),
                },
            )
        })
        .collect()
}

fn moving_list(state: &RoomState) -> Vec<ObstacleData> {
    state
        .moving_obstacles
        .iter()
        .map(|o| ObstacleData {
            id: o.id,
            x: o.position.x,
            y: o.position.y,
            z: o.position.z,
            rotation_y: o.rotation_y,
            size: SizeData {
                x: o.size.x,
                y: o.size.y,
                z: o.size.z,
            },
            prefab_type: o.prefab_type,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::{Player, Projectile, RosterEntry};

    fn roster() -> Vec<RosterEntry> {
        vec![
            RosterEntry {
                identity: Uuid::new_v4(),
                name: "ada".to_string(),
                profile_image: None,
            },
            RosterEntry {
                identity: Uuid::new_v4(),
                name: "grace".to_string(),
                profile_image: Some("https://cdn.example/grace.png".to_string()),
            },
        ]
    }

    #[test]
    fn state_update_carries_players_bullets_and_movers() {
        let roster = roster();
        let mut state = RoomState::new("7777".to_string(), roster.clone());
        let conn = Uuid::new_v4();
        let spawn = state.spawn_for(roster[0].identity);
        let player = Player::new(conn, &roster[0], spawn);
        state.projectiles.push(Projectile::fired_by(&player));
        state.players.insert(conn, player);

        match state_update(&state) {
            ServerMsg::StateUpdate {
                players,
                bullets,
                moving_obstacles,
            } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[&conn].name, "ada");
                assert_eq!(bullets.len(), 1);
                // Bullet owner resolves to the connection id, not the identity
                assert_eq!(bullets[0].owner_id, conn);
                assert_eq!(moving_obstacles.len(), state.moving_obstacles.len());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn init_includes_the_static_layout() {
        let state = RoomState::new("7777".to_string(), roster());
        match init_message(&state) {
            ServerMsg::Init { obstacles, .. } => {
                assert_eq!(obstacles.len(), state.obstacles.len());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
