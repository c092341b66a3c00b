//! Interfaces to the external collaborators (data layer, quota service,
//! chat generation). The battle core only ever talks to these traits;
//! real implementations live in the CRUD/service layer outside this
//! crate. In-memory versions ship for tests and local runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::battle::types::{Combatant, CombatEvent, EndReason, GameMode, RewardGrant};

/// Final battle record handed to the persistence collaborator.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BattleResult {
    pub battle_id: Uuid,
    pub mode: GameMode,
    pub player1: Uuid,
    pub player2: Uuid,
    pub winner: Option<Uuid>,
    pub reason: EndReason,
    pub rounds: u32,
    pub health_p1: u32,
    pub health_p2: u32,
    pub rewards_p1: RewardGrant,
    pub rewards_p2: RewardGrant,
    pub rating_delta_p1: i32,
    pub rating_delta_p2: i32,
    /// Canonical history for analytics and client replay.
    pub log: Vec<CombatEvent>,
    pub ended_at: DateTime<Utc>,
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    /// Snapshot of a character as a battle combatant.
    async fn load_combatant(&self, combatant_id: Uuid) -> Result<Option<Combatant>>;
    /// Characters recovering from a prior defeat cannot fight.
    async fn is_recovering(&self, combatant_id: Uuid) -> Result<bool>;
    async fn player_rating(&self, player_id: Uuid) -> Result<i32>;
    /// Post-battle write-back (health, xp, rating delta).
    async fn apply_outcome(&self, player_id: Uuid, rating_delta: i32, grant: RewardGrant)
        -> Result<()>;
}

#[async_trait]
pub trait UsageGate: Send + Sync {
    /// Consume one battle from the player's daily quota.
    /// `false` means the limit is already spent; nothing is consumed.
    async fn try_consume(&self, player_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait BattleRepo: Send + Sync {
    async fn record_result(&self, result: &BattleResult) -> Result<()>;
}

#[async_trait]
pub trait ChatResponder: Send + Sync {
    /// Generated commentary for a player's chat line, if any.
    async fn reply(&self, battle_id: Uuid, message: &str) -> Result<Option<String>>;
}

/// Everything the orchestrator needs injected.
#[derive(Clone)]
pub struct Collaborators {
    pub characters: Arc<dyn CharacterStore>,
    pub usage: Arc<dyn UsageGate>,
    pub battles: Arc<dyn BattleRepo>,
    pub chat: Arc<dyn ChatResponder>,
}

// ---------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCharacterStore {
    combatants: DashMap<Uuid, Combatant>,
    recovering: DashSet<Uuid>,
    ratings: DashMap<Uuid, i32>,
}

impl MemoryCharacterStore {
    pub fn insert_combatant(&self, combatant: Combatant) {
        self.combatants.insert(combatant.id, combatant);
    }

    pub fn set_recovering(&self, combatant_id: Uuid, recovering: bool) {
        if recovering {
            self.recovering.insert(combatant_id);
        } else {
            self.recovering.remove(&combatant_id);
        }
    }

    pub fn set_rating(&self, player_id: Uuid, rating: i32) {
        self.ratings.insert(player_id, rating);
    }
}

#[async_trait]
impl CharacterStore for MemoryCharacterStore {
    async fn load_combatant(&self, combatant_id: Uuid) -> Result<Option<Combatant>> {
        Ok(self.combatants.get(&combatant_id).map(|c| c.clone()))
    }

    async fn is_recovering(&self, combatant_id: Uuid) -> Result<bool> {
        Ok(self.recovering.contains(&combatant_id))
    }

    async fn player_rating(&self, player_id: Uuid) -> Result<i32> {
        Ok(self.ratings.get(&player_id).map(|r| *r).unwrap_or(1000))
    }

    async fn apply_outcome(
        &self,
        player_id: Uuid,
        rating_delta: i32,
        _grant: RewardGrant,
    ) -> Result<()> {
        let mut rating = self.ratings.entry(player_id).or_insert(1000);
        *rating = (*rating + rating_delta).max(0);
        Ok(())
    }
}

pub struct MemoryUsageGate {
    pub daily_limit: u32,
    used: DashMap<Uuid, u32>,
}

impl MemoryUsageGate {
    pub fn new(daily_limit: u32) -> Self {
        MemoryUsageGate {
            daily_limit,
            used: DashMap::new(),
        }
    }
}

#[async_trait]
impl UsageGate for MemoryUsageGate {
    async fn try_consume(&self, player_id: Uuid) -> Result<bool> {
        let mut used = self.used.entry(player_id).or_insert(0);
        if *used >= self.daily_limit {
            return Ok(false);
        }
        *used += 1;
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryBattleRepo {
    pub records: Mutex<Vec<BattleResult>>,
    /// Number of upcoming writes to fail, for exercising the retry path.
    pub fail_next: AtomicU32,
}

#[async_trait]
impl BattleRepo for MemoryBattleRepo {
    async fn record_result(&self, result: &BattleResult) -> Result<()> {
        let remaining = self.fail_next.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::Relaxed);
            anyhow::bail!("injected persistence failure");
        }
        self.records.lock().await.push(result.clone());
        Ok(())
    }
}

/// Stand-in for the AI commentary service.
pub struct EchoChatResponder;

#[async_trait]
impl ChatResponder for EchoChatResponder {
    async fn reply(&self, _battle_id: Uuid, _message: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

impl Collaborators {
    /// Fully in-memory wiring for tests and local development.
    pub fn in_memory(daily_limit: u32) -> (Self, Arc<MemoryCharacterStore>, Arc<MemoryBattleRepo>) {
        let characters = Arc::new(MemoryCharacterStore::default());
        let battles = Arc::new(MemoryBattleRepo::default());
        let collab = Collaborators {
            characters: characters.clone(),
            usage: Arc::new(MemoryUsageGate::new(daily_limit)),
            battles: battles.clone(),
            chat: Arc::new(EchoChatResponder),
        };
        (collab, characters, battles)
    }
}
