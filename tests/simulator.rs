//! Unit tests for the pure combat resolution.

use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use arena_server::battle::simulator::{simulate_round, CombatConfig};
use arena_server::battle::types::{
    Ability, CombatEventKind, Combatant, EffectKind, Side, Stats, StatusEffect, Strategy,
};

fn combatant(attack: u32, defense: u32, speed: u32, health: u32) -> Combatant {
    Combatant::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Fighter".into(),
        5,
        Stats {
            health,
            attack,
            defense,
            speed,
            special: 10,
        },
        vec![
            Ability {
                name: "Strike".into(),
                power: 1.0,
                cooldown: 0,
                effect: None,
            },
            Ability {
                name: "Heavy Blow".into(),
                power: 1.5,
                cooldown: 2,
                effect: None,
            },
        ],
    )
}

fn cfg() -> CombatConfig {
    CombatConfig {
        turns_per_round: 3,
        crit_chance: 0.15,
        crit_multiplier: 2.0,
    }
}

#[test]
fn damage_stays_within_bounds_for_wild_stats() {
    let mut rng = StdRng::seed_from_u64(7);

    // stat corruption must be clamped, never panic or overflow
    let extremes = [
        (0, 0, 1, 50),
        (1, 100_000, 1, 50),
        (1_000_000, 0, 1, 1_000_000),
        (50, 50, 50, 500),
    ];
    for (attack, defense, speed, health) in extremes {
        for round in 1..=20 {
            let mut p1 = combatant(attack, defense, speed, health);
            let mut p2 = combatant(defense, attack, speed, health);
            let events = simulate_round(
                round,
                &mut p1,
                &mut p2,
                Strategy::Aggressive,
                Strategy::Defensive,
                &cfg(),
                &mut rng,
            );
            for event in &events {
                if let CombatEventKind::Attack {
                    damage,
                    health_p1,
                    health_p2,
                    ..
                } = event.kind
                {
                    assert!((1..=9999).contains(&damage), "damage {damage} out of bounds");
                    assert!(health_p1 <= p1.max_health());
                    assert!(health_p2 <= p2.max_health());
                }
            }
        }
    }
}

#[test]
fn lethal_attack_stops_the_round() {
    let mut rng = StdRng::seed_from_u64(42);

    // overwhelming speed gap: jitter (±10%) cannot flip the turn order
    let mut p1 = combatant(10_000, 10, 1000, 500);
    let mut p2 = combatant(10, 10, 1, 30);

    let events = simulate_round(
        1,
        &mut p1,
        &mut p2,
        Strategy::Balanced,
        Strategy::Balanced,
        &cfg(),
        &mut rng,
    );

    assert_eq!(p2.current_health, 0, "health clamps to zero");
    assert!(p1.is_alive());

    let attacks: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, CombatEventKind::Attack { .. }))
        .collect();
    assert_eq!(attacks.len(), 1, "processing stops at the lethal hit");
    match &attacks[0].kind {
        CombatEventKind::Attack {
            attacker,
            health_p2,
            ..
        } => {
            assert_eq!(*attacker, Side::P1);
            assert_eq!(*health_p2, 0);
        }
        _ => unreachable!(),
    }
    assert!(
        matches!(events.last().unwrap().kind, CombatEventKind::Attack { .. }),
        "nothing is emitted after the lethal hit"
    );
}

#[test]
fn faster_side_swings_first() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut p1 = combatant(10, 10, 1000, 200);
    let mut p2 = combatant(10, 10, 1, 200);

    let events = simulate_round(
        1,
        &mut p1,
        &mut p2,
        Strategy::Balanced,
        Strategy::Balanced,
        &cfg(),
        &mut rng,
    );
    let first = events.iter().find_map(|e| match e.kind {
        CombatEventKind::TurnOrder { first } => Some(first),
        _ => None,
    });
    assert_eq!(first, Some(Side::P1));
}

#[test]
fn poison_ticks_at_round_start_and_expires() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut p1 = combatant(10, 10, 50, 200);
    let mut p2 = combatant(10, 10, 49, 200);
    p2.effects.push(StatusEffect {
        kind: EffectKind::Poison,
        magnitude: 12.0,
        remaining: 1,
    });

    let events = simulate_round(
        1,
        &mut p1,
        &mut p2,
        Strategy::Balanced,
        Strategy::Balanced,
        &cfg(),
        &mut rng,
    );

    let tick = events.iter().find_map(|e| match e.kind {
        CombatEventKind::DamageOverTime {
            side,
            effect,
            damage,
            ..
        } => Some((side, effect, damage)),
        _ => None,
    });
    assert_eq!(tick, Some((Side::P2, EffectKind::Poison, 12)));

    // duration hits zero during this round; next round removes it
    let events = simulate_round(
        2,
        &mut p1,
        &mut p2,
        Strategy::Balanced,
        Strategy::Balanced,
        &cfg(),
        &mut rng,
    );
    assert!(events.iter().any(|e| matches!(
        e.kind,
        CombatEventKind::EffectRemoved {
            side: Side::P2,
            effect: EffectKind::Poison,
        }
    )));
    assert!(p2.effects.is_empty());
}

#[test]
fn falls_back_to_basic_attack_when_everything_cools_down() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut p1 = combatant(50, 10, 100, 500);
    let mut p2 = combatant(50, 10, 1, 500);
    // park every ability on a long cooldown
    for cd in p1.cooldowns.iter_mut() {
        *cd = 10;
    }

    let events = simulate_round(
        1,
        &mut p1,
        &mut p2,
        Strategy::Balanced,
        Strategy::Balanced,
        &cfg(),
        &mut rng,
    );
    let p1_abilities: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            CombatEventKind::Attack {
                attacker: Side::P1,
                ability,
                ..
            } => Some(ability.clone()),
            _ => None,
        })
        .collect();
    assert!(!p1_abilities.is_empty());
    assert!(p1_abilities.iter().all(|a| a == "Basic Attack"));
}

#[test]
fn used_ability_goes_on_cooldown() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut p1 = combatant(50, 10, 100, 2000);
    let mut p2 = combatant(10, 10, 1, 2000);
    // only the cooldown ability is available
    p1.abilities.remove(0);
    p1.cooldowns = vec![0];

    simulate_round(
        1,
        &mut p1,
        &mut p2,
        Strategy::Balanced,
        Strategy::Balanced,
        &cfg(),
        &mut rng,
    );
    // set to 2 on use, decremented at each turn end; never negative
    assert!(p1.cooldowns[0] <= 2);
}

#[test]
fn strategy_modifier_table() {
    let aggressive = Strategy::Aggressive.mods();
    assert_eq!(aggressive.attack, 1.2);
    assert_eq!(aggressive.defense, 0.9);
    assert_eq!(aggressive.speed, 1.0);

    let defensive = Strategy::Defensive.mods();
    assert_eq!(defensive.attack, 0.9);
    assert_eq!(defensive.defense, 1.2);
    assert_eq!(defensive.speed, 0.95);

    let balanced = Strategy::Balanced.mods();
    assert_eq!(balanced.attack, 1.0);
    assert_eq!(balanced.defense, 1.0);
    assert_eq!(balanced.speed, 1.0);
}
