//! Room registry and provisioning.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::game::room::RosterEntry;
use crate::game::simulation::{GameRoom, RoomHandle};
use crate::report::ResultsReporter;
use crate::util::codes::random_room_code;

/// Owns the room-code registry and spawns room tasks.
pub struct SessionManager {
    rooms: Arc<DashMap<String, RoomHandle>>,
    reporter: ResultsReporter,
}

impl SessionManager {
    pub fn new(reporter: ResultsReporter) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            reporter,
        }
    }

    /// Provision a room for the given roster and start its task.
    /// Open rooms admit unlisted identities until capacity is reached;
    /// provisioned rooms admit only the allow-listed roster.
    pub fn create_room(&self, roster: Vec<RosterEntry>, open: bool) -> String {
        // Regenerate on collision with a live room; codes free up when
        // their room task exits.
        let code = loop {
            let candidate = random_room_code();
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let (room, handle) = GameRoom::new(code.clone(), roster, open, self.reporter.clone());
        self.rooms.insert(code.clone(), handle);

        info!(room_code = %code, open, "Room created");

        let rooms = Arc::clone(&self.rooms);
        let room_code = code.clone();
        tokio::spawn(async move {
            room.run().await;
            rooms.remove(&room_code);
            info!(room_code = %room_code, "Room removed from registry");
        });

        code
    }

    pub fn get(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|entry| entry.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|entry| entry.value().player_count()).sum()
    }
}
