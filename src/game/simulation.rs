//! Room command handling and the authoritative tick loop.
//!
//! Each room runs as its own task that owns the room state outright:
//! commands arrive over an mpsc channel, outbound events leave over a
//! broadcast channel, and the fixed-rate tick advances the simulation in
//! between. Nothing else ever touches the state, so command handling and
//! tick advancement are serialized by construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::collision::CollisionSystem;
use crate::game::room::{
    Player, Projectile, RoomPhase, RoomState, RosterEntry, BULLET_DAMAGE, DISCONNECT_GRACE_SECS,
    MOVE_STEP, REQUIRED_PLAYERS, ROOM_IDLE_TIMEOUT_SECS, SHOOT_COOLDOWN_SECS,
};
use crate::game::snapshot;
use crate::report::{MatchReport, Outcome, PlayerResult, ResultsReporter};
use crate::util::time::{tick_delta, TICK_DURATION_MICROS};
use crate::ws::protocol::{MoveInput, Position, ServerMsg};

/// Delivery scope for an outbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every connection in the room
    All,
    /// Exactly one connection
    Conn(Uuid),
    /// Everyone but one connection
    Except(Uuid),
}

/// An event leaving the room task
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub msg: ServerMsg,
}

impl Outbound {
    fn all(msg: ServerMsg) -> Self {
        Self {
            target: Target::All,
            msg,
        }
    }

    fn to(conn_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            target: Target::Conn(conn_id),
            msg,
        }
    }

    fn except(conn_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            target: Target::Except(conn_id),
            msg,
        }
    }
}

/// Join rejection reasons, surfaced to the requester only
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("You are not allowed to join this room")]
    NotAllowed,
    #[error("Room is full")]
    RoomFull,
    #[error("This player is already in the room")]
    AlreadyConnected,
    #[error("This match has already finished")]
    Finished,
}

/// Commands into the room task
#[derive(Debug)]
pub enum RoomCmd {
    Join {
        conn_id: Uuid,
        identity: Uuid,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    Input {
        conn_id: Uuid,
        input: MoveInput,
    },
    Shoot {
        conn_id: Uuid,
    },
    Disconnect {
        conn_id: Uuid,
    },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub code: String,
    pub cmd_tx: mpsc::Sender<RoomCmd>,
    pub events: broadcast::Sender<Outbound>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// The authoritative game room
pub struct GameRoom {
    state: RoomState,
    /// Open rooms grow their roster on join until capacity is reached.
    open: bool,
    /// Set once anyone has ever joined; distinguishes an abandoned room
    /// from one that was provisioned and never used.
    had_players: bool,
    cmd_rx: mpsc::Receiver<RoomCmd>,
    events: broadcast::Sender<Outbound>,
    player_count: Arc<AtomicUsize>,
    reporter: ResultsReporter,
}

impl GameRoom {
    pub fn new(
        code: String,
        roster: Vec<RosterEntry>,
        open: bool,
        reporter: ResultsReporter,
    ) -> (Self, RoomHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            code: code.clone(),
            cmd_tx,
            events: events.clone(),
            player_count: player_count.clone(),
        };

        let room = Self {
            state: RoomState::new(code, roster),
            open,
            had_players: false,
            cmd_rx,
            events,
            player_count,
            reporter,
        };

        (room, handle)
    }

    /// Run the room until the match finishes or everyone is gone.
    pub async fn run(mut self) {
        info!(room_code = %self.state.code, "Room started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            self.drain_commands();
            self.reap_lapsed_grace();
            self.run_tick();

            if self.state.phase == RoomPhase::Finished {
                info!(room_code = %self.state.code, "Match finished, closing room");
                break;
            }

            if self.state.players.is_empty() {
                if self.had_players {
                    info!(room_code = %self.state.code, "All players gone, closing room");
                    break;
                }
                if self.state.created_at.elapsed() >= Duration::from_secs(ROOM_IDLE_TIMEOUT_SECS) {
                    info!(room_code = %self.state.code, "Room never used, closing");
                    break;
                }
            }
        }
    }

    /// Apply all commands that arrived since the last tick.
    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                RoomCmd::Join {
                    conn_id,
                    identity,
                    reply,
                } => {
                    let result = self.handle_join(conn_id, identity);
                    let _ = reply.send(result);
                }
                RoomCmd::Input { conn_id, input } => self.handle_input(conn_id, input),
                RoomCmd::Shoot { conn_id } => self.handle_shoot(conn_id),
                RoomCmd::Disconnect { conn_id } => self.handle_disconnect(conn_id),
            }
        }
    }

    /// Admit a connection for an identity: fresh join, roster growth for
    /// open rooms, or reconnection-in-place during the grace window.
    pub fn handle_join(&mut self, conn_id: Uuid, identity: Uuid) -> Result<(), JoinError> {
        if self.state.phase == RoomPhase::Finished {
            return Err(JoinError::Finished);
        }

        // Reconnection: the identity already holds a player slot.
        if let Some(existing_conn) = self.state.conn_for_identity(identity) {
            if !self.state.players[&existing_conn].is_disconnected() {
                return Err(JoinError::AlreadyConnected);
            }

            let mut player = self
                .state
                .players
                .remove(&existing_conn)
                .ok_or(JoinError::NotAllowed)?;
            self.state.pending_inputs.remove(&existing_conn);
            player.conn_id = conn_id;
            player.grace_deadline = None;
            let name = player.name.clone();
            let profile_image = player.profile_image.clone();
            self.state.players.insert(conn_id, player);

            info!(
                room_code = %self.state.code,
                identity = %identity,
                conn_id = %conn_id,
                "Player reconnected within grace window"
            );

            self.send(Outbound::to(
                conn_id,
                ServerMsg::YourId {
                    id: conn_id,
                    name,
                    profile_image,
                },
            ));
            self.send(Outbound::to(
                conn_id,
                ServerMsg::RoomJoined {
                    room_code: self.state.code.clone(),
                },
            ));
            self.send(Outbound::to(conn_id, snapshot::init_message(&self.state)));
            self.send(Outbound::except(conn_id, snapshot::roster_message(&self.state)));
            self.maybe_start_match();
            return Ok(());
        }

        // Fresh join: the identity must be on the roster, or the room must
        // be open with a roster slot left.
        let entry = match self.state.roster_entry(identity) {
            Some(entry) => entry.clone(),
            None if self.open => {
                if self.state.roster.len() >= REQUIRED_PLAYERS {
                    return Err(JoinError::RoomFull);
                }
                let entry = RosterEntry {
                    identity,
                    name: format!("Player_{}", &identity.to_string()[..8]),
                    profile_image: None,
                };
                self.state.roster.push(entry.clone());
                entry
            }
            None => return Err(JoinError::NotAllowed),
        };

        let spawn = self.state.spawn_for(identity);
        let player = Player::new(conn_id, &entry, spawn);
        self.state.players.insert(conn_id, player);
        self.had_players = true;
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);

        info!(
            room_code = %self.state.code,
            identity = %identity,
            conn_id = %conn_id,
            player_count = self.state.players.len(),
            "Player joined room"
        );

        self.send(Outbound::to(
            conn_id,
            ServerMsg::YourId {
                id: conn_id,
                name: entry.name,
                profile_image: entry.profile_image,
            },
        ));
        self.send(Outbound::to(
            conn_id,
            ServerMsg::RoomJoined {
                room_code: self.state.code.clone(),
            },
        ));
        self.send(Outbound::to(conn_id, snapshot::init_message(&self.state)));
        self.send(Outbound::except(conn_id, snapshot::roster_message(&self.state)));

        self.maybe_start_match();

        Ok(())
    }

    /// Transition `Waiting -> Playing` once the required players are
    /// connected, announcing with a full snapshot to everyone.
    fn maybe_start_match(&mut self) {
        if self.state.phase == RoomPhase::Waiting
            && self.state.connected_count() >= REQUIRED_PLAYERS
        {
            self.state.phase = RoomPhase::Playing;
            info!(room_code = %self.state.code, "Required players present, match starting");
            self.send(Outbound::all(snapshot::init_message(&self.state)));
        }
    }

    /// Buffer the latest movement intent; intermediate commands between
    /// ticks are overwritten, never queued.
    pub fn handle_input(&mut self, conn_id: Uuid, input: MoveInput) {
        if self.state.players.contains_key(&conn_id) {
            self.state.pending_inputs.insert(conn_id, input);
        }
    }

    /// Fire a bullet, subject to the per-player cooldown.
    pub fn handle_shoot(&mut self, conn_id: Uuid) {
        if self.state.phase != RoomPhase::Playing {
            return;
        }
        let Some(player) = self.state.players.get_mut(&conn_id) else {
            return;
        };
        if player.is_disconnected() || player.shoot_cooldown > 0.0 {
            return;
        }

        player.shoot_cooldown = SHOOT_COOLDOWN_SECS;
        let bullet = Projectile::fired_by(player);
        debug!(
            room_code = %self.state.code,
            conn_id = %conn_id,
            bullet_id = bullet.id,
            "Bullet fired"
        );
        self.state.projectiles.push(bullet);
    }

    /// Mark a connection disconnected and start its grace window.
    pub fn handle_disconnect(&mut self, conn_id: Uuid) {
        // A disconnect racing the end of the match is a no-op.
        if self.state.phase == RoomPhase::Finished {
            return;
        }
        let Some(player) = self.state.players.get_mut(&conn_id) else {
            return;
        };
        if player.is_disconnected() {
            return;
        }

        player.grace_deadline =
            Some(Instant::now() + Duration::from_secs(DISCONNECT_GRACE_SECS));
        player.forward = 0.0;
        player.right = 0.0;
        self.state.pending_inputs.remove(&conn_id);

        info!(
            room_code = %self.state.code,
            identity = %player.identity,
            conn_id = %conn_id,
            "Player disconnected, grace window started"
        );

        self.send(Outbound::all(ServerMsg::PlayerDisconnected {
            player_id: conn_id,
        }));
    }

    /// Permanently remove players whose grace window has lapsed, concluding
    /// the match in favor of whoever remains.
    pub fn reap_lapsed_grace(&mut self) {
        let now = Instant::now();
        let lapsed: Vec<Uuid> = self
            .state
            .players
            .values()
            .filter(|p| p.grace_deadline.is_some_and(|d| d <= now))
            .map(|p| p.conn_id)
            .collect();

        for conn_id in lapsed {
            let Some(dropped) = self.state.players.remove(&conn_id) else {
                continue;
            };
            self.state.pending_inputs.remove(&conn_id);
            self.player_count
                .store(self.state.players.len(), Ordering::Relaxed);

            warn!(
                room_code = %self.state.code,
                identity = %dropped.identity,
                conn_id = %conn_id,
                "Grace window lapsed, player dropped"
            );

            self.send(Outbound::all(ServerMsg::PlayerDropped { player_id: conn_id }));

            if self.state.phase == RoomPhase::Playing {
                if let Some(survivor) = self.state.players.values().next().cloned() {
                    self.conclude(survivor, dropped, Outcome::Dropped);
                } else {
                    // Everyone dropped inside the same window; nothing to award.
                    self.state.phase = RoomPhase::Finished;
                }
            }
        }
    }

    /// Advance the simulation by one tick.
    pub fn run_tick(&mut self) {
        // Inputs are consumed exactly once, even outside of play.
        let inputs: HashMap<Uuid, MoveInput> = self.state.pending_inputs.drain().collect();

        if self.state.phase != RoomPhase::Playing {
            return;
        }

        for player in self.state.players.values_mut() {
            player.shoot_cooldown = (player.shoot_cooldown - tick_delta()).max(0.0);
        }

        self.apply_inputs(inputs);

        for obstacle in &mut self.state.moving_obstacles {
            obstacle.advance();
        }

        self.advance_projectiles();

        self.send(Outbound::all(snapshot::state_update(&self.state)));
    }

    /// Integrate buffered movement through the collision gate.
    fn apply_inputs(&mut self, inputs: HashMap<Uuid, MoveInput>) {
        let state = &mut self.state;
        for (conn_id, input) in inputs {
            let Some(player) = state.players.get_mut(&conn_id) else {
                continue;
            };
            if player.is_disconnected() {
                continue;
            }

            // Yaw and intent flags stick even when the move is rejected.
            player.rotation_y = (player.rotation_y + input.rotation_delta).rem_euclid(360.0);
            let forward = (input.forward as i8 - input.backward as i8) as f32;
            let right = (input.right as i8 - input.left as i8) as f32;
            player.forward = forward;
            player.right = right;

            if forward == 0.0 && right == 0.0 {
                continue;
            }

            // Independent axis addition; diagonals run faster on purpose.
            let rad = player.rotation_y.to_radians();
            let dx = (rad.sin() * forward + rad.cos() * right) * MOVE_STEP;
            let dz = (rad.cos() * forward - rad.sin() * right) * MOVE_STEP;

            let candidate = player.obb_at(player.x + dx, player.z + dz);
            if !CollisionSystem::would_collide(
                &candidate,
                &state.obstacles,
                &state.moving_obstacles,
            ) {
                player.x += dx;
                player.z += dz;
            }
        }
    }

    /// Move bullets, resolve impacts (obstacles occlude players, first hit
    /// consumes the bullet), and drop expired ones.
    fn advance_projectiles(&mut self) {
        // Candidate targets in ascending connection-id order: the
        // deterministic tie-break when several boxes overlap one bullet.
        let mut target_conns: Vec<Uuid> = self.state.players.keys().copied().collect();
        target_conns.sort();

        let mut out: Vec<Outbound> = Vec::new();
        let mut player_hits: Vec<(Uuid, Uuid)> = Vec::new();
        let mut keep: Vec<Projectile> = Vec::new();

        let projectiles = std::mem::take(&mut self.state.projectiles);
        for mut bullet in projectiles {
            let alive = bullet.advance();
            let bullet_box = bullet.obb();

            if CollisionSystem::would_collide(
                &bullet_box,
                &self.state.obstacles,
                &self.state.moving_obstacles,
            ) {
                out.push(Outbound::all(ServerMsg::BulletHitObstacle {
                    bullet_pos: Position {
                        x: bullet.x,
                        y: bullet.y,
                        z: bullet.z,
                    },
                }));
                out.push(Outbound::all(ServerMsg::BulletRemove {
                    bullet_id: bullet.id,
                }));
                continue;
            }

            let hit_conn = target_conns.iter().copied().find(|conn| {
                let target = &self.state.players[conn];
                target.identity != bullet.owner && bullet_box.intersects(&target.obb())
            });

            if let Some(conn) = hit_conn {
                player_hits.push((conn, bullet.owner));
                out.push(Outbound::all(ServerMsg::BulletRemove {
                    bullet_id: bullet.id,
                }));
                continue;
            }

            if alive {
                keep.push(bullet);
            } else {
                out.push(Outbound::all(ServerMsg::BulletRemove {
                    bullet_id: bullet.id,
                }));
            }
        }
        self.state.projectiles = keep;

        let mut kill: Option<(Player, Player)> = None;
        for (target_conn, owner_identity) in player_hits {
            let Some(target) = self.state.players.get_mut(&target_conn) else {
                continue;
            };
            let killed = target.apply_damage(BULLET_DAMAGE);
            out.push(Outbound::all(ServerMsg::PlayerHit {
                target_id: target_conn,
                new_health: target.health,
            }));
            debug!(
                room_code = %self.state.code,
                target = %target_conn,
                health = target.health,
                "Player hit"
            );

            if killed && kill.is_none() {
                let loser = target.clone();
                if let Some(winner) = self
                    .state
                    .players
                    .values()
                    .find(|p| p.identity == owner_identity)
                    .cloned()
                {
                    kill = Some((winner, loser));
                }
            }
        }

        for event in out {
            self.send(event);
        }

        if let Some((winner, loser)) = kill {
            if self.state.phase == RoomPhase::Playing {
                self.conclude(winner, loser, Outcome::Lost);
            }
        }
    }

    /// Terminal transition: announce the winner and report the result.
    /// Reporting is detached and best-effort; the room closes regardless.
    fn conclude(&mut self, winner: Player, loser: Player, loser_outcome: Outcome) {
        self.state.phase = RoomPhase::Finished;

        info!(
            room_code = %self.state.code,
            winner = %winner.identity,
            loser = %loser.identity,
            "Match concluded"
        );

        self.send(Outbound::all(ServerMsg::PlayerWon {
            winner_id: winner.conn_id,
            loser_id: loser.conn_id,
            winner_name: winner.name.clone(),
            loser_name: loser.name.clone(),
        }));

        self.reporter.dispatch(MatchReport {
            session_id: self.state.code.clone(),
            status: "finished",
            finished_at: Utc::now(),
            results: vec![
                PlayerResult {
                    uuid: winner.identity,
                    outcome: Outcome::Won,
                    score: winner.health,
                },
                PlayerResult {
                    uuid: loser.identity,
                    outcome: loser_outcome,
                    score: 0.0,
                },
            ],
        });
    }

    fn send(&self, event: Outbound) {
        // Nobody listening yet is fine; events are best-effort fan-out.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::geometry::Vec3;
    use crate::game::room::{Obstacle, MAX_HEALTH, SPAWN_POINTS};

    fn roster2() -> Vec<RosterEntry> {
        vec![
            RosterEntry {
                identity: Uuid::new_v4(),
                name: "ada".to_string(),
                profile_image: None,
            },
            RosterEntry {
                identity: Uuid::new_v4(),
                name: "grace".to_string(),
                profile_image: None,
            },
        ]
    }

    fn closed_room() -> (GameRoom, RoomHandle, Vec<RosterEntry>) {
        let roster = roster2();
        let (room, handle) =
            GameRoom::new("4242".to_string(), roster.clone(), false, ResultsReporter::disabled());
        (room, handle, roster)
    }

    fn drain(rx: &mut broadcast::Receiver<Outbound>) -> Vec<Outbound> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn msgs(events: &[Outbound]) -> Vec<&ServerMsg> {
        events.iter().map(|e| &e.msg).collect()
    }

    /// Join both roster identities; returns their connection ids.
    fn join_both(room: &mut GameRoom, roster: &[RosterEntry]) -> (Uuid, Uuid) {
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        room.handle_join(conn_a, roster[0].identity).unwrap();
        room.handle_join(conn_b, roster[1].identity).unwrap();
        (conn_a, conn_b)
    }

    #[test]
    fn two_joins_take_designated_spawns_and_start_play() {
        let (mut room, handle, roster) = closed_room();
        let mut rx = handle.events.subscribe();

        let conn_a = Uuid::new_v4();
        room.handle_join(conn_a, roster[0].identity).unwrap();
        assert_eq!(room.state.phase, RoomPhase::Waiting);
        assert_eq!(room.state.players[&conn_a].z, SPAWN_POINTS[0].0.z);

        let conn_b = Uuid::new_v4();
        room.handle_join(conn_b, roster[1].identity).unwrap();
        assert_eq!(room.state.phase, RoomPhase::Playing);
        assert_eq!(room.state.players[&conn_b].z, SPAWN_POINTS[1].0.z);

        let events = drain(&mut rx);
        assert!(msgs(&events)
            .iter()
            .any(|m| matches!(m, ServerMsg::RoomJoined { room_code } if room_code == "4242")));
        // The start-of-play snapshot goes to everyone
        assert!(events.iter().any(|e| {
            e.target == Target::All && matches!(e.msg, ServerMsg::Init { .. })
        }));
    }

    #[test]
    fn unknown_identity_is_rejected_without_state_change() {
        let (mut room, _handle, _roster) = closed_room();
        let result = room.handle_join(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(result, Err(JoinError::NotAllowed));
        assert!(room.state.players.is_empty());
    }

    #[test]
    fn duplicate_active_identity_is_rejected() {
        let (mut room, _handle, roster) = closed_room();
        room.handle_join(Uuid::new_v4(), roster[0].identity).unwrap();
        let result = room.handle_join(Uuid::new_v4(), roster[0].identity);
        assert_eq!(result, Err(JoinError::AlreadyConnected));
    }

    #[test]
    fn open_room_grows_roster_then_fills_up() {
        let creator = RosterEntry {
            identity: Uuid::new_v4(),
            name: "host".to_string(),
            profile_image: None,
        };
        let (mut room, _handle) = GameRoom::new(
            "9001".to_string(),
            vec![creator.clone()],
            true,
            ResultsReporter::disabled(),
        );

        room.handle_join(Uuid::new_v4(), creator.identity).unwrap();
        room.handle_join(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(room.state.roster.len(), 2);
        assert_eq!(room.state.phase, RoomPhase::Playing);

        let result = room.handle_join(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(result, Err(JoinError::RoomFull));
    }

    #[test]
    fn movement_applies_and_diagonal_is_faster() {
        let (mut room, _handle, roster) = closed_room();
        let (conn_a, _conn_b) = join_both(&mut room, &roster);

        // Straight ahead for one tick
        room.handle_input(
            conn_a,
            MoveInput {
                forward: true,
                ..MoveInput::default()
            },
        );
        let before = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        room.run_tick();
        let after = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        let straight = ((after.0 - before.0).powi(2) + (after.1 - before.1).powi(2)).sqrt();
        assert!((straight - MOVE_STEP).abs() < 1e-5);

        // Forward + strafe for one tick
        room.handle_input(
            conn_a,
            MoveInput {
                forward: true,
                right: true,
                ..MoveInput::default()
            },
        );
        let before = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        room.run_tick();
        let after = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        let diagonal = ((after.0 - before.0).powi(2) + (after.1 - before.1).powi(2)).sqrt();
        assert!(diagonal > straight * 1.3, "diagonal {diagonal} vs straight {straight}");
    }

    #[test]
    fn blocked_movement_keeps_position_but_applies_yaw() {
        let (mut room, _handle, roster) = closed_room();
        let (conn_a, _conn_b) = join_both(&mut room, &roster);

        // Wall directly in front of player A
        room.state.obstacles = vec![Obstacle {
            id: 99,
            position: Vec3::new(0.0, 0.0, -5.0),
            size: Vec3::new(4.0, 2.0, 1.0),
            rotation_y: 0.0,
            prefab_type: 0,
        }];
        room.state.moving_obstacles.clear();

        // Player A spawns at z = -6 facing +z, already touching-distance
        // from the wall face at z = -5.5; every forward component is
        // rejected while the yaw delta keeps landing.
        for _ in 0..100 {
            room.handle_input(
                conn_a,
                MoveInput {
                    forward: true,
                    rotation_delta: 1.0,
                    ..MoveInput::default()
                },
            );
            room.run_tick();
        }

        let p = &room.state.players[&conn_a];
        assert!(p.z + 0.45 <= -5.5 + 1e-4, "player inside wall: z = {}", p.z);
        // The yaw deltas kept applying every tick even while blocked
        assert!(p.rotation_y > 0.0);
        assert_eq!(p.forward, 1.0);
    }

    #[test]
    fn opposing_flags_cancel_out() {
        let (mut room, _handle, roster) = closed_room();
        let (conn_a, _conn_b) = join_both(&mut room, &roster);

        let before = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        room.handle_input(
            conn_a,
            MoveInput {
                forward: true,
                backward: true,
                left: true,
                right: true,
                ..MoveInput::default()
            },
        );
        room.run_tick();
        let after = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        assert_eq!(before, after);
    }

    #[test]
    fn only_latest_input_counts_per_tick() {
        let (mut room, _handle, roster) = closed_room();
        let (conn_a, _conn_b) = join_both(&mut room, &roster);

        room.handle_input(
            conn_a,
            MoveInput {
                forward: true,
                ..MoveInput::default()
            },
        );
        // Overwritten before the tick fires
        room.handle_input(conn_a, MoveInput::default());
        let before = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        room.run_tick();
        let after = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        assert_eq!(before, after);

        // And the stale command is not replayed on the next tick
        room.run_tick();
        let later = (room.state.players[&conn_a].x, room.state.players[&conn_a].z);
        assert_eq!(after, later);
    }

    #[tokio::test]
    async fn direct_hit_damages_and_kills() {
        let (mut room, handle, roster) = closed_room();
        let (conn_a, conn_b) = join_both(&mut room, &roster);
        room.state.obstacles.clear();
        room.state.moving_obstacles.clear();

        // A at origin facing +z, B straight ahead in range
        {
            let a = room.state.players.get_mut(&conn_a).unwrap();
            a.x = 0.0;
            a.z = 0.0;
            a.rotation_y = 0.0;
        }
        {
            let b = room.state.players.get_mut(&conn_b).unwrap();
            b.x = 0.0;
            b.z = 2.0;
        }

        let mut rx = handle.events.subscribe();
        room.handle_shoot(conn_a);
        room.run_tick();

        let events = drain(&mut rx);
        let hit = msgs(&events).iter().find_map(|m| match m {
            ServerMsg::PlayerHit {
                target_id,
                new_health,
            } => Some((*target_id, *new_health)),
            _ => None,
        });
        assert_eq!(hit, Some((conn_b, MAX_HEALTH - BULLET_DAMAGE)));
        assert!(room.state.projectiles.is_empty(), "bullet must be consumed");
        assert_eq!(room.state.phase, RoomPhase::Playing);

        // Wear B down to the final hit
        room.state.players.get_mut(&conn_b).unwrap().health = BULLET_DAMAGE;
        room.state.players.get_mut(&conn_a).unwrap().shoot_cooldown = 0.0;
        room.handle_shoot(conn_a);
        room.run_tick();

        let events = drain(&mut rx);
        let won = msgs(&events).iter().find_map(|m| match m {
            ServerMsg::PlayerWon {
                winner_id,
                loser_id,
                winner_name,
                ..
            } => Some((*winner_id, *loser_id, winner_name.clone())),
            _ => None,
        });
        assert_eq!(won, Some((conn_a, conn_b, "ada".to_string())));
        assert_eq!(room.state.phase, RoomPhase::Finished);
        assert_eq!(room.state.players[&conn_b].health, 0.0);
    }

    #[tokio::test]
    async fn obstacle_occludes_the_player_behind_it() {
        let (mut room, handle, roster) = closed_room();
        let (conn_a, conn_b) = join_both(&mut room, &roster);
        room.state.moving_obstacles.clear();
        room.state.obstacles = vec![Obstacle {
            id: 0,
            position: Vec3::new(0.0, 0.0, 1.5),
            size: Vec3::new(2.0, 2.0, 0.5),
            rotation_y: 0.0,
            prefab_type: 0,
        }];

        {
            let a = room.state.players.get_mut(&conn_a).unwrap();
            a.x = 0.0;
            a.z = 0.0;
            a.rotation_y = 0.0;
        }
        {
            let b = room.state.players.get_mut(&conn_b).unwrap();
            b.x = 0.0;
            b.z = 2.5;
        }

        let mut rx = handle.events.subscribe();
        room.handle_shoot(conn_a);
        room.run_tick();

        let events = drain(&mut rx);
        assert!(msgs(&events)
            .iter()
            .any(|m| matches!(m, ServerMsg::BulletHitObstacle { .. })));
        assert!(!msgs(&events)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerHit { .. })));
        assert_eq!(room.state.players[&conn_b].health, MAX_HEALTH);
    }

    #[test]
    fn shoot_cooldown_suppresses_rapid_fire() {
        let (mut room, _handle, roster) = closed_room();
        let (conn_a, _conn_b) = join_both(&mut room, &roster);

        room.handle_shoot(conn_a);
        room.handle_shoot(conn_a);
        assert_eq!(room.state.projectiles.len(), 1);
    }

    #[test]
    fn bullet_expires_exactly_once() {
        let (mut room, handle, roster) = closed_room();
        let (conn_a, _conn_b) = join_both(&mut room, &roster);
        room.state.obstacles.clear();
        room.state.moving_obstacles.clear();

        // Point into open space so nothing is hit before expiry
        {
            let a = room.state.players.get_mut(&conn_a).unwrap();
            a.x = 0.0;
            a.z = 0.0;
            a.rotation_y = 90.0;
        }

        let mut rx = handle.events.subscribe();
        room.handle_shoot(conn_a);

        let mut ticks = 0;
        while !room.state.projectiles.is_empty() {
            room.run_tick();
            ticks += 1;
            assert!(ticks < 1000, "bullet never expired");
        }

        let removals = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e.msg, ServerMsg::BulletRemove { .. }))
            .count();
        assert_eq!(removals, 1);
    }

    #[tokio::test]
    async fn grace_reconnect_preserves_identity_continuity() {
        let (mut room, handle, roster) = closed_room();
        let (conn_a, conn_b) = join_both(&mut room, &roster);

        // Put B somewhere recognizable with battle damage
        {
            let b = room.state.players.get_mut(&conn_b).unwrap();
            b.x = 3.0;
            b.z = -1.0;
            b.health = 40.0;
        }

        let mut rx = handle.events.subscribe();
        room.handle_disconnect(conn_b);
        assert!(room.state.players[&conn_b].is_disconnected());
        assert!(msgs(&drain(&mut rx))
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerDisconnected { player_id } if *player_id == conn_b)));

        // No conclusion while the grace window runs
        room.reap_lapsed_grace();
        room.run_tick();
        assert_eq!(room.state.phase, RoomPhase::Playing);

        // Reconnect under a fresh connection id
        let conn_b2 = Uuid::new_v4();
        room.handle_join(conn_b2, roster[1].identity).unwrap();

        assert!(!room.state.players.contains_key(&conn_b));
        let restored = &room.state.players[&conn_b2];
        assert_eq!(restored.x, 3.0);
        assert_eq!(restored.z, -1.0);
        assert_eq!(restored.health, 40.0);
        assert!(restored.grace_deadline.is_none());

        // The lapsed-grace reaper has nothing to do afterwards
        room.reap_lapsed_grace();
        assert_eq!(room.state.phase, RoomPhase::Playing);
        let _ = conn_a;
    }

    #[tokio::test]
    async fn lapsed_grace_concludes_for_the_survivor() {
        let (mut room, handle, roster) = closed_room();
        let (conn_a, conn_b) = join_both(&mut room, &roster);

        room.handle_disconnect(conn_b);
        // Force the deadline into the past
        room.state.players.get_mut(&conn_b).unwrap().grace_deadline = Some(
            Instant::now()
                .checked_sub(Duration::from_secs(1))
                .unwrap_or_else(Instant::now),
        );

        let mut rx = handle.events.subscribe();
        room.reap_lapsed_grace();

        let events = drain(&mut rx);
        assert!(msgs(&events)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerDropped { player_id } if *player_id == conn_b)));
        let won = msgs(&events).iter().find_map(|m| match m {
            ServerMsg::PlayerWon { winner_id, .. } => Some(*winner_id),
            _ => None,
        });
        assert_eq!(won, Some(conn_a));
        assert_eq!(room.state.phase, RoomPhase::Finished);
        assert!(!room.state.players.contains_key(&conn_b));

        // A second disconnect against the finished room is a no-op
        room.handle_disconnect(conn_a);
        assert!(!room.state.players[&conn_a].is_disconnected());
    }

    #[test]
    fn health_stays_within_bounds() {
        let (mut room, _handle, roster) = closed_room();
        let (_conn_a, conn_b) = join_both(&mut room, &roster);

        let b = room.state.players.get_mut(&conn_b).unwrap();
        assert!(b.health <= MAX_HEALTH);
        for _ in 0..50 {
            b.apply_damage(7.0);
            assert!((0.0..=MAX_HEALTH).contains(&b.health));
        }
        assert_eq!(b.health, 0.0);
    }

    #[test]
    fn state_update_broadcasts_every_playing_tick() {
        let (mut room, handle, roster) = closed_room();
        let (_conn_a, _conn_b) = join_both(&mut room, &roster);

        let mut rx = handle.events.subscribe();
        room.run_tick();
        room.run_tick();
        let updates = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e.msg, ServerMsg::StateUpdate { .. }))
            .count();
        assert_eq!(updates, 2);
    }

    #[test]
    fn waiting_rooms_do_not_broadcast_state() {
        let (mut room, handle, roster) = closed_room();
        let conn_a = Uuid::new_v4();
        room.handle_join(conn_a, roster[0].identity).unwrap();

        let mut rx = handle.events.subscribe();
        room.run_tick();
        assert!(drain(&mut rx).is_empty());
    }
}
