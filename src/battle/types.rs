use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue / battle bucket a player asked for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Ranked,
    Casual,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Ranked => "ranked",
            GameMode::Casual => "casual",
        }
    }
}

/// Per-round tactical choice; scales the base stats for that round.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Aggressive,
    Defensive,
    Balanced,
}

/// (attack, defense, speed) multipliers.
#[derive(Debug, Clone, Copy)]
pub struct StratMods {
    pub attack: f64,
    pub defense: f64,
    pub speed: f64,
}

impl Strategy {
    pub fn mods(self) -> StratMods {
        match self {
            Strategy::Aggressive => StratMods {
                attack: 1.2,
                defense: 0.9,
                speed: 1.0,
            },
            Strategy::Defensive => StratMods {
                attack: 0.9,
                defense: 1.2,
                speed: 0.95,
            },
            Strategy::Balanced => StratMods {
                attack: 1.0,
                defense: 1.0,
                speed: 1.0,
            },
        }
    }
}

/// Base stat block copied in from the character store.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Stats {
    pub health: u32,
    pub attack: u32,
    pub defense: u32,
    pub speed: u32,
    pub special: u32,
}

/// What an ability does to its target besides direct damage.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Damage-per-turn on the defender.
    Poison,
    /// Attack multiplier on the attacker.
    AttackBuff,
}

/// Effect carried by an ability, applied on hit.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct EffectSpec {
    pub kind: EffectKind,
    /// Poison: damage per turn. AttackBuff: attack multiplier.
    pub magnitude: f64,
    /// Turns the effect persists.
    pub duration: u32,
}

/// Immutable ability descriptor from the character catalog.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ability {
    pub name: String,
    /// Damage multiplier applied to attack.
    pub power: f64,
    /// Turns before the ability can be used again.
    pub cooldown: u32,
    pub effect: Option<EffectSpec>,
}

impl Ability {
    /// Fallback when everything else is cooling down.
    pub fn basic_attack() -> Self {
        Ability {
            name: "Basic Attack".into(),
            power: 1.0,
            cooldown: 0,
            effect: None,
        }
    }
}

/// Active modifier on one combatant, decremented each turn.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct StatusEffect {
    pub kind: EffectKind,
    pub magnitude: f64,
    pub remaining: u32,
}

/// One side's fighter for the duration of a battle.
///
/// Initial values are copied from the character store at match time and
/// never written back except through the explicit post-battle update.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Combatant {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub level: u32,
    pub stats: Stats,
    pub abilities: Vec<Ability>,

    pub current_health: u32,
    pub effects: Vec<StatusEffect>,
    /// Remaining cooldown per ability, parallel to `abilities`.
    pub cooldowns: Vec<u32>,
}

impl Combatant {
    pub fn new(
        id: Uuid,
        owner_id: Uuid,
        name: String,
        level: u32,
        stats: Stats,
        abilities: Vec<Ability>,
    ) -> Self {
        let cooldowns = vec![0; abilities.len()];
        Combatant {
            id,
            owner_id,
            name,
            level,
            stats,
            abilities,
            current_health: stats.health,
            effects: Vec::new(),
            cooldowns,
        }
    }

    pub fn max_health(&self) -> u32 {
        self.stats.health
    }

    pub fn is_alive(&self) -> bool {
        self.current_health > 0
    }

    /// Subtract damage, clamped to `[0, max_health]`. Returns the health left.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        self.current_health = self.current_health.saturating_sub(amount);
        self.current_health
    }
}

/// Which seat in the battle an event or player refers to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    P1,
    P2,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::P1 => Side::P2,
            Side::P2 => Side::P1,
        }
    }
}

/// Battle life-cycle. `BattleEnd` is terminal.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StrategySelect,
    RoundCombat,
    ChatBreak,
    BattleEnd,
}

/// Why a battle reached `BattleEnd`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Knockout,
    MaxRounds,
    Forfeit,
    Error,
}

/// A waiting player in the matchmaking queue.
///
/// The combatant snapshot is denormalized in so the match path never has
/// to refetch under the pair lock.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueEntry {
    pub player_id: Uuid,
    pub combatant: Combatant,
    pub rating: i32,
    pub mode: GameMode,
    pub enqueued_at: DateTime<Utc>,
}

/// Append-only combat log record; never mutated once written.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CombatEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: CombatEventKind,
}

impl CombatEvent {
    pub fn now(kind: CombatEventKind) -> Self {
        CombatEvent {
            ts: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CombatEventKind {
    RoundStart {
        round: u32,
    },
    TurnOrder {
        first: Side,
    },
    Attack {
        attacker: Side,
        ability: String,
        damage: u32,
        critical: bool,
        health_p1: u32,
        health_p2: u32,
    },
    DamageOverTime {
        side: Side,
        effect: EffectKind,
        damage: u32,
        health_p1: u32,
        health_p2: u32,
    },
    EffectApplied {
        side: Side,
        effect: EffectKind,
    },
    EffectRemoved {
        side: Side,
        effect: EffectKind,
    },
}

/// Client-facing view of one side.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlayerView {
    pub player_id: Uuid,
    pub name: String,
    pub level: u32,
    pub health: u32,
    pub max_health: u32,
    pub connected: bool,
    pub effects: Vec<StatusEffect>,
}

/// Full state pushed on `join_battle` and on late reconnects.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BattleSnapshot {
    pub battle_id: Uuid,
    pub phase: Phase,
    pub round: u32,
    pub you: Side,
    pub players: [PlayerView; 2],
    pub chat_enabled: bool,
    /// Tail of the combat log, newest last.
    pub log: Vec<CombatEvent>,
    /// Set once the battle is over; late reconnects read these.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

/// Post-battle grant for one player.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardGrant {
    pub xp: u32,
    pub currency: u32,
    pub bond: u32,
}
