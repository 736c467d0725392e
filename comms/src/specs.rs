use serde::{Deserialize, Serialize};

/// The identifier every client presents on each call.
pub type ClientId = u32;

/// What a client needs to know before starting a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub components_per_client: usize,
    pub current_round: usize,
}
