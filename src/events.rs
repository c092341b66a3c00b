//! Cross-server battle lifecycle events.
//!
//! Every instance publishes to and subscribes on one logical channel
//! (`arena:events`); peers keep their local queue views consistent from
//! these instead of ever reading another instance's battle state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EVENTS_CHANNEL: &str = "arena:events";

/// Channel a player's socket listens on, wherever it is connected.
pub fn player_channel(player_id: Uuid) -> String {
    format!("player:{player_id}:events")
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    BattleCreated {
        battle_id: Uuid,
        player1: Uuid,
        player2: Uuid,
        server_id: Uuid,
    },
    BattleEnded {
        battle_id: Uuid,
        server_id: Uuid,
    },
    PlayerDisconnected {
        player_id: Uuid,
        server_id: Uuid,
    },
}
