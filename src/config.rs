//! Runtime configuration for the arena server.

use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug)]
pub struct Settings {
    /// Rounds before a battle auto-finishes.
    pub max_rounds: u32,
    /// Attacks each side makes per round.
    pub turns_per_round: u32,
    /// Seconds players get to pick a strategy.
    pub strategy_secs: u64,
    /// Seconds of chat break between rounds.
    pub chat_secs: u64,
    /// Seconds a player may stay disconnected before forfeit.
    pub disconnect_grace: u64,
    /// Seconds a finished battle stays resident for late reconnects.
    pub end_retain_secs: u64,
    /// Delay between combat events pushed to clients (ms).
    pub event_pacing_ms: u64,

    /// Flat critical-hit chance per attack.
    pub crit_chance: f64,
    /// Damage multiplier on a critical hit.
    pub crit_multiplier: f64,

    /// Starting rating window for opponent search.
    pub window_base: u32,
    /// Window growth per 10 s of waiting.
    pub window_growth: u32,
    /// Window never expands past this.
    pub window_cap: u32,
    /// Pair-lock TTL (ms).
    pub lock_ttl_ms: u64,
    /// Queue entries older than this are evicted during scans.
    pub queue_stale_secs: i64,
    /// Seconds between background queue rescans.
    pub rescan_secs: u64,

    /// Chat messages needed for the engagement reward bonus.
    pub chat_bonus_threshold: u32,
    /// Battles a player may start per day.
    pub daily_battle_limit: u32,
    /// Redis presence-key TTL (seconds).
    pub presence_ttl: u64,
}

impl Settings {
    fn from_env() -> Self {
        Settings {
            max_rounds: env_or("MAX_ROUNDS", 5),
            turns_per_round: env_or("TURNS_PER_ROUND", 3),
            strategy_secs: env_or("STRATEGY_SECS", 15),
            chat_secs: env_or("CHAT_SECS", 45),
            disconnect_grace: env_or("DISCONNECT_GRACE", 30),
            end_retain_secs: env_or("END_RETAIN_SECS", 60),
            event_pacing_ms: env_or("EVENT_PACING_MS", 500),
            crit_chance: env_or("CRIT_CHANCE", 0.15),
            crit_multiplier: env_or("CRIT_MULTIPLIER", 2.0),
            window_base: env_or("WINDOW_BASE", 200),
            window_growth: env_or("WINDOW_GROWTH", 50),
            window_cap: env_or("WINDOW_CAP", 1000),
            lock_ttl_ms: env_or("LOCK_TTL_MS", 5000),
            queue_stale_secs: env_or("QUEUE_STALE_SECS", 300),
            rescan_secs: env_or("MM_RESCAN_SECS", 5),
            chat_bonus_threshold: env_or("CHAT_BONUS_THRESHOLD", 3),
            daily_battle_limit: env_or("DAILY_BATTLE_LIMIT", 10),
            presence_ttl: env_or("PRESENCE_TTL", 600),
        }
    }
}

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

pub fn settings() -> &'static Settings {
    &SETTINGS
}
