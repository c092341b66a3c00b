//! End-to-end battle scenarios against in-memory collaborators.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

use arena_server::battle::manager::{BattleManager, MatchOutcome};
use arena_server::battle::types::{
    Ability, Combatant, EndReason, GameMode, Phase, Side, Stats, Strategy,
};
use arena_server::coord::Coordination;
use arena_server::events::{LifecycleEvent, EVENTS_CHANNEL};
use arena_server::protocol::{MatchStatus, ServerMsg};
use arena_server::storage::{Collaborators, MemoryBattleRepo, MemoryCharacterStore};

struct Harness {
    coord: Arc<Coordination>,
    manager: BattleManager,
    characters: Arc<MemoryCharacterStore>,
    battles: Arc<MemoryBattleRepo>,
}

fn harness() -> Harness {
    let coord = Arc::new(Coordination::local_only());
    let (collab, characters, battles) = Collaborators::in_memory(10);
    let manager = BattleManager::new(coord.clone(), collab);
    Harness {
        coord,
        manager,
        characters,
        battles,
    }
}

fn seed_player(characters: &MemoryCharacterStore, rating: i32, attack: u32) -> (Uuid, Uuid) {
    let player_id = Uuid::new_v4();
    let combatant_id = Uuid::new_v4();
    characters.insert_combatant(Combatant::new(
        combatant_id,
        player_id,
        "Fighter".into(),
        5,
        Stats {
            health: 100,
            attack,
            defense: 10,
            speed: 15,
            special: 10,
        },
        vec![Ability {
            name: "Strike".into(),
            power: 1.0,
            cooldown: 0,
            effect: None,
        }],
    ));
    characters.set_rating(player_id, rating);
    (player_id, combatant_id)
}

struct Matched {
    p1: Uuid,
    p2: Uuid,
    battle_id: Uuid,
    tx1: mpsc::UnboundedSender<ServerMsg>,
    rx1: mpsc::UnboundedReceiver<ServerMsg>,
    tx2: mpsc::UnboundedSender<ServerMsg>,
    rx2: mpsc::UnboundedReceiver<ServerMsg>,
}

/// Seed two players, register their sockets and match them.
async fn matched_pair(h: &Harness, attack: (u32, u32)) -> Matched {
    let (p1, c1) = seed_player(&h.characters, 1000, attack.0);
    let (p2, c2) = seed_player(&h.characters, 1050, attack.1);

    let (tx1, rx1) = mpsc::unbounded_channel();
    let (tx2, rx2) = mpsc::unbounded_channel();
    h.manager.register_socket(p1, tx1.clone());
    h.manager.register_socket(p2, tx2.clone());

    let first = h.manager.find_match(p1, c1, GameMode::Ranked).await.unwrap();
    assert!(matches!(first, MatchOutcome::Searching { .. }));

    let second = h.manager.find_match(p2, c2, GameMode::Ranked).await.unwrap();
    let MatchOutcome::Found { battle_id } = second else {
        panic!("second player should match immediately");
    };
    Matched {
        p1,
        p2,
        battle_id,
        tx1,
        rx1,
        tx2,
        rx2,
    }
}

async fn recv_until<F>(rx: &mut mpsc::UnboundedReceiver<ServerMsg>, mut pred: F) -> ServerMsg
where
    F: FnMut(&ServerMsg) -> bool,
{
    timeout(Duration::from_secs(600), async {
        loop {
            let msg = rx.recv().await.expect("socket channel closed");
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("expected message never arrived")
}

#[tokio::test]
async fn both_players_are_told_about_the_same_battle() {
    let h = harness();
    let mut m = matched_pair(&h, (20, 20)).await;

    for rx in [&mut m.rx1, &mut m.rx2] {
        let msg = recv_until(rx, |msg| matches!(msg, ServerMsg::MatchResult { .. })).await;
        let ServerMsg::MatchResult {
            status,
            battle_id: id,
            ..
        } = msg
        else {
            unreachable!()
        };
        assert_eq!(status, MatchStatus::Found);
        assert_eq!(id, Some(m.battle_id));
    }
}

#[tokio::test]
async fn rejects_a_foreign_combatant() {
    let h = harness();
    let (_p1, c1) = seed_player(&h.characters, 1000, 20);
    let (p2, _c2) = seed_player(&h.characters, 1000, 20);

    let err = h.manager.find_match(p2, c1, GameMode::Ranked).await;
    assert_eq!(
        err.unwrap_err().to_string(),
        "combatant does not belong to you"
    );
    assert_eq!(h.manager.queue().size(GameMode::Ranked).await.unwrap(), 0);
}

#[tokio::test]
async fn rejects_a_recovering_character() {
    let h = harness();
    let (p1, c1) = seed_player(&h.characters, 1000, 20);
    h.characters.set_recovering(c1, true);

    let err = h.manager.find_match(p1, c1, GameMode::Ranked).await;
    assert_eq!(err.unwrap_err().to_string(), "character recovering");
}

#[tokio::test]
async fn enforces_the_daily_quota() {
    let coord = Arc::new(Coordination::local_only());
    let (collab, characters, _battles) = Collaborators::in_memory(1);
    let manager = BattleManager::new(coord, collab);
    let (p1, c1) = seed_player(&characters, 1000, 20);

    assert!(manager.find_match(p1, c1, GameMode::Ranked).await.is_ok());
    let _ = manager.cancel_match(p1, GameMode::Ranked).await;

    let err = manager.find_match(p1, c1, GameMode::Ranked).await;
    assert_eq!(err.unwrap_err().to_string(), "daily limit reached");
}

#[tokio::test(start_paused = true)]
async fn battle_runs_phases_in_order_to_the_end() {
    let h = harness();
    let mut m = matched_pair(&h, (25, 25)).await;

    h.manager
        .join_battle(m.p1, m.battle_id, m.tx1.clone())
        .await;
    let msg = recv_until(&mut m.rx1, |msg| {
        matches!(msg, ServerMsg::BattleState { .. })
    })
    .await;
    let ServerMsg::BattleState { snapshot } = msg else {
        unreachable!()
    };
    assert_eq!(snapshot.phase, Phase::StrategySelect);
    assert_eq!(snapshot.you, Side::P1);

    // drive every strategy phase until the battle ends, recording the
    // phase-marker messages as they arrive
    let mut phases = vec!["strategy"];
    h.manager.select_strategy(m.p1, Strategy::Aggressive).await;
    h.manager.select_strategy(m.p2, Strategy::Aggressive).await;

    let (winner, reason) = loop {
        let msg = recv_until(&mut m.rx1, |msg| {
            matches!(
                msg,
                ServerMsg::StrategyPhaseStart { .. }
                    | ServerMsg::RoundStart { .. }
                    | ServerMsg::ChatPhaseStart { .. }
                    | ServerMsg::BattleEnd { .. }
            )
        })
        .await;
        match msg {
            ServerMsg::StrategyPhaseStart { .. } => {
                phases.push("strategy");
                h.manager.select_strategy(m.p1, Strategy::Balanced).await;
                h.manager.select_strategy(m.p2, Strategy::Defensive).await;
            }
            ServerMsg::RoundStart { .. } => phases.push("combat"),
            ServerMsg::ChatPhaseStart { .. } => phases.push("chat"),
            ServerMsg::BattleEnd { winner, reason, .. } => {
                phases.push("end");
                break (winner, reason);
            }
            _ => unreachable!(),
        }
    };

    // observed sequence must stay inside the machine's transitions
    assert_eq!(phases[0], "strategy");
    assert_eq!(*phases.last().unwrap(), "end");
    for window in phases.windows(2) {
        match (window[0], window[1]) {
            ("strategy", "combat")
            | ("combat", "chat")
            | ("combat", "end")
            | ("chat", "strategy")
            | ("chat", "end") => {}
            (a, b) => panic!("illegal phase transition {a} → {b}"),
        }
    }
    assert!(matches!(reason, EndReason::Knockout | EndReason::MaxRounds));
    if reason == EndReason::Knockout {
        assert!(winner.is_some());
    }

    // exactly one persisted result
    sleep(Duration::from_secs(5)).await;
    let records = h.battles.records.lock().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].battle_id, m.battle_id);
}

#[tokio::test(start_paused = true)]
async fn strategy_timeout_defaults_the_missing_pick() {
    let h = harness();
    let mut m = matched_pair(&h, (20, 20)).await;

    h.manager
        .join_battle(m.p1, m.battle_id, m.tx1.clone())
        .await;

    // only player1 picks; player2 sits out the 15 s timer
    h.manager.select_strategy(m.p1, Strategy::Aggressive).await;

    let msg = recv_until(&mut m.rx1, |msg| {
        matches!(msg, ServerMsg::RoundStart { .. })
    })
    .await;
    assert!(matches!(msg, ServerMsg::RoundStart { round: 1 }));
}

#[tokio::test(start_paused = true)]
async fn lethal_round_ends_the_battle_with_a_knockout() {
    let h = harness();
    // player1 hits for far more than player2's health pool
    let mut m = matched_pair(&h, (100_000, 1)).await;

    h.manager
        .join_battle(m.p1, m.battle_id, m.tx1.clone())
        .await;
    h.manager.select_strategy(m.p1, Strategy::Aggressive).await;
    // player2 never picks; the timer defaults them

    let msg = recv_until(&mut m.rx1, |msg| matches!(msg, ServerMsg::BattleEnd { .. })).await;
    let ServerMsg::BattleEnd {
        winner,
        reason,
        health_p1,
        health_p2,
        ..
    } = msg
    else {
        unreachable!()
    };
    assert_eq!(reason, EndReason::Knockout);
    assert_eq!(winner, Some(Side::P1));
    assert_eq!(health_p2, 0, "health clamps at zero");
    assert!(health_p1 > 0);
}

#[tokio::test(start_paused = true)]
async fn forfeit_after_grace_is_idempotent_and_published() {
    let h = harness();
    let mut lifecycle = h.coord.subscribe(EVENTS_CHANNEL).await.unwrap();
    // low attack keeps the opening round non-lethal, whatever the rolls
    let mut m = matched_pair(&h, (10, 10)).await;

    h.manager
        .join_battle(m.p1, m.battle_id, m.tx1.clone())
        .await;
    h.manager
        .join_battle(m.p2, m.battle_id, m.tx2.clone())
        .await;

    // opponent drops mid-battle and never comes back
    h.manager.handle_disconnect(m.p2).await;
    recv_until(&mut m.rx1, |msg| {
        matches!(msg, ServerMsg::OpponentDisconnected)
    })
    .await;
    // a duplicate close notice must not double anything
    h.manager.handle_disconnect(m.p2).await;

    recv_until(&mut m.rx1, |msg| {
        matches!(msg, ServerMsg::OpponentForfeited)
    })
    .await;
    let msg = recv_until(&mut m.rx1, |msg| matches!(msg, ServerMsg::BattleEnd { .. })).await;
    let ServerMsg::BattleEnd { winner, reason, .. } = msg else {
        unreachable!()
    };
    assert_eq!(winner, Some(Side::P1));
    assert_eq!(reason, EndReason::Forfeit);

    // battle_ended goes out on the lifecycle channel
    let event = timeout(Duration::from_secs(60), async {
        loop {
            let json = lifecycle.recv().await.expect("lifecycle channel closed");
            let event = serde_json::from_str::<LifecycleEvent>(&json).unwrap();
            if matches!(event, LifecycleEvent::BattleEnded { .. }) {
                return event;
            }
        }
    })
    .await
    .expect("battle_ended never published");
    let LifecycleEvent::BattleEnded { battle_id: id, .. } = event else {
        unreachable!()
    };
    assert_eq!(id, m.battle_id);

    // exactly one result, and no second battle_end on the socket
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.battles.records.lock().await.len(), 1);
    let mut extra_ends = 0;
    while let Ok(msg) = m.rx1.try_recv() {
        if matches!(msg, ServerMsg::BattleEnd { .. }) {
            extra_ends += 1;
        }
    }
    assert_eq!(extra_ends, 0, "forfeit must fire exactly once");
}

#[tokio::test(start_paused = true)]
async fn persistence_failures_are_retried() {
    let h = harness();
    h.battles
        .fail_next
        .store(2, std::sync::atomic::Ordering::Relaxed);

    let mut m = matched_pair(&h, (100_000, 1)).await;
    h.manager
        .join_battle(m.p1, m.battle_id, m.tx1.clone())
        .await;
    h.manager.select_strategy(m.p1, Strategy::Aggressive).await;

    recv_until(&mut m.rx1, |msg| matches!(msg, ServerMsg::BattleEnd { .. })).await;
    sleep(Duration::from_secs(10)).await;
    let records = h.battles.records.lock().await;
    assert_eq!(records.len(), 1, "retries land the result eventually");
}
