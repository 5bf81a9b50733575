//! Room code generation

use rand::Rng;

/// Generate a random 4-digit room code (1000-9999).
/// Uniqueness against live rooms is the caller's concern.
pub fn random_room_code() -> String {
    rand::thread_rng().gen_range(1000..10000).to_string()
}
