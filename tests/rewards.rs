//! Reward and rating-delta calculations.

use arena_server::battle::rewards::{compute, RewardContext, BASE_CURRENCY, BASE_XP};
use arena_server::battle::scoring::rating_delta;
use arena_server::battle::types::Side;

fn ctx(winner: Option<Side>) -> RewardContext {
    RewardContext {
        winner,
        level_p1: 5,
        level_p2: 5,
        rounds_played: 3,
        max_rounds: 5,
        chat_messages: 0,
        chat_bonus_threshold: 3,
    }
}

#[test]
fn winner_gets_base_loser_gets_fraction() {
    let (p1, p2) = compute(&ctx(Some(Side::P1)));
    assert_eq!(p1.xp, BASE_XP);
    assert_eq!(p1.currency, BASE_CURRENCY);
    assert_eq!(p2.xp, (BASE_XP as f64 * 0.3).round() as u32);
    assert!(p2.xp < p1.xp);
}

#[test]
fn underdog_win_pays_more() {
    let mut c = ctx(Some(Side::P1));
    c.level_p1 = 3; // beat someone two levels up
    let (underdog, _) = compute(&c);
    let (even, _) = compute(&ctx(Some(Side::P1)));
    assert!(underdog.xp > even.xp);
}

#[test]
fn full_length_battle_pays_more() {
    let mut c = ctx(Some(Side::P2));
    c.rounds_played = 5;
    let (_, full) = compute(&c);
    let (_, short) = compute(&ctx(Some(Side::P2)));
    assert!(full.xp > short.xp);
}

#[test]
fn chat_engagement_pays_more() {
    let mut c = ctx(Some(Side::P1));
    c.chat_messages = 4;
    let (chatty, _) = compute(&c);
    let (quiet, _) = compute(&ctx(Some(Side::P1)));
    assert!(chatty.xp > quiet.xp);
}

#[test]
fn draw_splits_the_loser_share() {
    let (p1, p2) = compute(&ctx(None));
    assert_eq!(p1, p2);
    assert!(p1.xp < BASE_XP);
}

#[test]
fn symmetric_delta_on_draw() {
    let (d1, d2) = rating_delta(1500, 1500, 0, 32.0);
    assert_eq!(d1, 0);
    assert_eq!(d2, 0);
}

#[test]
fn lower_rated_player_gains_more_on_upset() {
    // Player 1 (1400) beats Player 2 (1600)
    let (d1, d2) = rating_delta(1400, 1600, 1, 32.0);
    assert!(d1 > 0);
    assert!(d2 < 0);
    assert_eq!(d1, -d2); // conservation
}
