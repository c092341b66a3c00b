//! Wire-protocol shared by client, WS handler and battle sessions.

use crate::battle::types::{
    BattleSnapshot, CombatEvent, EndReason, GameMode, RewardGrant, Side, Strategy,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------- client → server ----------
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First frame on every socket; binds the session to a player id.
    Auth {
        token: String,
    },
    FindMatch {
        combatant_id: Uuid,
        mode: GameMode,
    },
    CancelMatch {
        mode: GameMode,
    },
    JoinBattle {
        battle_id: Uuid,
    },
    SelectStrategy {
        strategy: Strategy,
    },
    SendChat {
        message: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Found,
    Searching,
}

// ---------- server → client ----------
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    AuthOk {
        player_id: Uuid,
    },
    MatchResult {
        status: MatchStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        battle_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_position: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_wait_seconds: Option<u64>,
    },
    BattleState {
        snapshot: BattleSnapshot,
    },
    OpponentConnected,
    OpponentDisconnected,
    RoundStart {
        round: u32,
    },
    CombatEvent {
        event: CombatEvent,
    },
    StrategyPhaseStart {
        round: u32,
        seconds: u64,
    },
    ChatPhaseStart {
        seconds: u64,
    },
    ChatMessage {
        sender: Side,
        message: String,
        /// Generated color commentary riding along with the player line.
        #[serde(skip_serializing_if = "Option::is_none")]
        reply: Option<String>,
    },
    OpponentForfeited,
    BattleEnd {
        winner: Option<Side>,
        reason: EndReason,
        health_p1: u32,
        health_p2: u32,
        rewards_p1: RewardGrant,
        rewards_p2: RewardGrant,
    },
    Error {
        reason: String,
    },
}
