//! Post-battle reward calculation. Pure; persistence happens elsewhere.

use crate::battle::types::{RewardGrant, Side};

pub const BASE_XP: u32 = 100;
pub const BASE_CURRENCY: u32 = 50;
pub const BASE_BOND: u32 = 10;

/// Winner fought up a level gap.
const UNDERDOG_BONUS: f64 = 1.25;
/// Battle went the full distance.
const FULL_LENGTH_BONUS: f64 = 1.15;
/// Chat engagement above the configured threshold.
const CHAT_BONUS: f64 = 1.10;
/// Losers keep this share of the winner's grant.
const LOSER_FRACTION: f64 = 0.3;

/// Everything the formula reads from the finished battle.
#[derive(Debug, Clone, Copy)]
pub struct RewardContext {
    pub winner: Option<Side>,
    pub level_p1: u32,
    pub level_p2: u32,
    pub rounds_played: u32,
    pub max_rounds: u32,
    pub chat_messages: u32,
    pub chat_bonus_threshold: u32,
}

fn scale(grant: RewardGrant, factor: f64) -> RewardGrant {
    RewardGrant {
        xp: (grant.xp as f64 * factor).round() as u32,
        currency: (grant.currency as f64 * factor).round() as u32,
        bond: (grant.bond as f64 * factor).round() as u32,
    }
}

/// Grants for (p1, p2). On a draw both sides get the loser share.
pub fn compute(ctx: &RewardContext) -> (RewardGrant, RewardGrant) {
    let base = RewardGrant {
        xp: BASE_XP,
        currency: BASE_CURRENCY,
        bond: BASE_BOND,
    };

    let mut factor = 1.0;
    if let Some(winner) = ctx.winner {
        let (winner_level, loser_level) = match winner {
            Side::P1 => (ctx.level_p1, ctx.level_p2),
            Side::P2 => (ctx.level_p2, ctx.level_p1),
        };
        if winner_level < loser_level {
            factor *= UNDERDOG_BONUS;
        }
    }
    if ctx.rounds_played >= ctx.max_rounds {
        factor *= FULL_LENGTH_BONUS;
    }
    if ctx.chat_messages >= ctx.chat_bonus_threshold {
        factor *= CHAT_BONUS;
    }

    let winner_grant = scale(base, factor);
    let loser_grant = scale(winner_grant, LOSER_FRACTION);

    match ctx.winner {
        Some(Side::P1) => (winner_grant, loser_grant),
        Some(Side::P2) => (loser_grant, winner_grant),
        None => (loser_grant, loser_grant),
    }
}
