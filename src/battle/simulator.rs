//! Pure combat resolution for one round.
//!
//! No timers, no channels, no sleeping: callers own pacing and state.
//! All randomness comes through the injected `Rng` so tests can seed it.

use rand::Rng;

use crate::battle::types::{
    Ability, CombatEvent, CombatEventKind, Combatant, EffectKind, Side, StatusEffect, Strategy,
};
use crate::config::settings;

/// Tuning knobs, split out from global settings so tests can pin them.
#[derive(Debug, Clone, Copy)]
pub struct CombatConfig {
    pub turns_per_round: u32,
    pub crit_chance: f64,
    pub crit_multiplier: f64,
}

impl CombatConfig {
    pub fn from_settings() -> Self {
        let s = settings();
        CombatConfig {
            turns_per_round: s.turns_per_round,
            crit_chance: s.crit_chance,
            crit_multiplier: s.crit_multiplier,
        }
    }
}

/// Damage floor before crit, and the hard bound after it.
const DAMAGE_FLOOR: f64 = 5.0;
const DAMAGE_MIN: f64 = 1.0;
const DAMAGE_MAX: f64 = 9999.0;

fn sides<'a>(
    p1: &'a mut Combatant,
    p2: &'a mut Combatant,
    side: Side,
) -> (&'a mut Combatant, &'a mut Combatant) {
    match side {
        Side::P1 => (p1, p2),
        Side::P2 => (p2, p1),
    }
}

fn effective_attack(c: &Combatant, strategy: Strategy) -> f64 {
    let buff: f64 = c
        .effects
        .iter()
        .filter(|e| e.kind == EffectKind::AttackBuff)
        .map(|e| e.magnitude)
        .product();
    c.stats.attack as f64 * strategy.mods().attack * buff
}

fn effective_defense(c: &Combatant, strategy: Strategy) -> f64 {
    c.stats.defense as f64 * strategy.mods().defense
}

fn effective_speed(c: &Combatant, strategy: Strategy) -> f64 {
    c.stats.speed as f64 * strategy.mods().speed
}

/// Pick an off-cooldown ability uniformly; basic attack when everything
/// is cooling down. Returns the ability and the index to put on cooldown.
fn choose_ability(c: &Combatant, rng: &mut impl Rng) -> (Ability, Option<usize>) {
    let available: Vec<usize> = (0..c.abilities.len())
        .filter(|&i| c.cooldowns[i] == 0)
        .collect();
    if available.is_empty() {
        return (Ability::basic_attack(), None);
    }
    let idx = available[rng.random_range(0..available.len())];
    (c.abilities[idx].clone(), Some(idx))
}

/// Damage after strategy modifiers, variance, floor, crit and the final
/// clamp. Bounded output even on corrupted stats.
fn roll_damage(
    attack: f64,
    power: f64,
    defense: f64,
    cfg: &CombatConfig,
    rng: &mut impl Rng,
) -> (u32, bool) {
    let variance = rng.random_range(0.85..=1.15);
    let mut damage = ((attack * power - 0.5 * defense) * variance).max(DAMAGE_FLOOR);
    let critical = rng.random_bool(cfg.crit_chance.clamp(0.0, 1.0));
    if critical {
        damage *= cfg.crit_multiplier;
    }
    (damage.clamp(DAMAGE_MIN, DAMAGE_MAX) as u32, critical)
}

/// Start-of-round status ticks for one side: poison damage, then expiry.
fn tick_effects(
    p1: &mut Combatant,
    p2: &mut Combatant,
    side: Side,
    events: &mut Vec<CombatEvent>,
) {
    let poison: u32 = {
        let (me, _) = sides(p1, p2, side);
        me.effects
            .iter()
            .filter(|e| e.kind == EffectKind::Poison && e.remaining > 0)
            .map(|e| e.magnitude.max(0.0) as u32)
            .sum()
    };
    if poison > 0 {
        let (me, _) = sides(p1, p2, side);
        me.apply_damage(poison);
        events.push(CombatEvent::now(CombatEventKind::DamageOverTime {
            side,
            effect: EffectKind::Poison,
            damage: poison,
            health_p1: p1.current_health,
            health_p2: p2.current_health,
        }));
    }

    let (me, _) = sides(p1, p2, side);
    let mut expired = Vec::new();
    me.effects.retain(|e| {
        if e.remaining == 0 {
            expired.push(e.kind);
            false
        } else {
            true
        }
    });
    for kind in expired {
        events.push(CombatEvent::now(CombatEventKind::EffectRemoved {
            side,
            effect: kind,
        }));
    }
}

/// Resolve one full round, mutating both combatants in place.
///
/// Events come back in generation order; processing stops the moment a
/// side's health reaches zero.
pub fn simulate_round(
    round: u32,
    p1: &mut Combatant,
    p2: &mut Combatant,
    strat1: Strategy,
    strat2: Strategy,
    cfg: &CombatConfig,
    rng: &mut impl Rng,
) -> Vec<CombatEvent> {
    let mut events = Vec::new();
    events.push(CombatEvent::now(CombatEventKind::RoundStart { round }));

    // 1 · status effects tick before anyone swings
    for side in [Side::P1, Side::P2] {
        tick_effects(p1, p2, side, &mut events);
        if !p1.is_alive() || !p2.is_alive() {
            return events;
        }
    }

    // 2-3 · effective speed with ±10% jitter decides who swings first
    let speed1 = effective_speed(p1, strat1) * rng.random_range(0.9..=1.1);
    let speed2 = effective_speed(p2, strat2) * rng.random_range(0.9..=1.1);
    let first = if speed1 >= speed2 { Side::P1 } else { Side::P2 };
    events.push(CombatEvent::now(CombatEventKind::TurnOrder { first }));

    // 4 · fixed number of turns, both sides act in speed order
    for _turn in 0..cfg.turns_per_round {
        for side in [first, first.other()] {
            let strat = match side {
                Side::P1 => strat1,
                Side::P2 => strat2,
            };
            let defender_strat = match side {
                Side::P1 => strat2,
                Side::P2 => strat1,
            };

            let (ability, cd_idx) = {
                let (attacker, _) = sides(p1, p2, side);
                if !attacker.is_alive() {
                    continue;
                }
                choose_ability(attacker, rng)
            };

            let attack = {
                let (attacker, _) = sides(p1, p2, side);
                effective_attack(attacker, strat)
            };
            let defense = {
                let (_, defender) = sides(p1, p2, side);
                effective_defense(defender, defender_strat)
            };
            let (damage, critical) = roll_damage(attack, ability.power, defense, cfg, rng);

            {
                let (_, defender) = sides(p1, p2, side);
                defender.apply_damage(damage);
            }
            events.push(CombatEvent::now(CombatEventKind::Attack {
                attacker: side,
                ability: ability.name.clone(),
                damage,
                critical,
                health_p1: p1.current_health,
                health_p2: p2.current_health,
            }));

            if let Some(idx) = cd_idx {
                let (attacker, _) = sides(p1, p2, side);
                attacker.cooldowns[idx] = attacker.abilities[idx].cooldown;
            }

            if let Some(spec) = ability.effect {
                let target = match spec.kind {
                    EffectKind::Poison => side.other(),
                    EffectKind::AttackBuff => side,
                };
                let (me, other) = sides(p1, p2, side);
                let victim = if target == side { me } else { other };
                victim.effects.push(StatusEffect {
                    kind: spec.kind,
                    magnitude: spec.magnitude,
                    remaining: spec.duration,
                });
                events.push(CombatEvent::now(CombatEventKind::EffectApplied {
                    side: target,
                    effect: spec.kind,
                }));
            }

            // 6 · lethal hit ends the round immediately
            if !p1.is_alive() || !p2.is_alive() {
                return events;
            }
        }

        // 5 · end-of-turn bookkeeping
        for c in [&mut *p1, &mut *p2] {
            for cd in c.cooldowns.iter_mut() {
                *cd = cd.saturating_sub(1);
            }
            for e in c.effects.iter_mut() {
                e.remaining = e.remaining.saturating_sub(1);
            }
        }
    }

    events
}
