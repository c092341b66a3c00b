//! One async task per live battle.
//!
//! The task owns every mutable piece of battle state; all mutation goes
//! through the mailbox, so phase changes and health updates are
//! serialized per battle with no shared locks. A single armed deadline
//! drives phase timers; arming a new one replaces (cancels) the last.

use std::future::pending;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use uuid::Uuid;

use crate::battle::rewards::{self, RewardContext};
use crate::battle::scoring;
use crate::battle::simulator::{simulate_round, CombatConfig};
use crate::battle::types::{
    BattleSnapshot, CombatEvent, Combatant, EndReason, GameMode, Phase, PlayerView, QueueEntry,
    RewardGrant, Side, Strategy,
};
use crate::config::settings;
use crate::coord::Coordination;
use crate::events::{LifecycleEvent, EVENTS_CHANNEL};
use crate::protocol::ServerMsg;
use crate::storage::{BattleResult, Collaborators};

/// Connection handle the WS layer binds into a battle.
pub type Conn = mpsc::UnboundedSender<ServerMsg>;

/// Everything a battle session can be told.
#[derive(Debug)]
pub enum BattleCmd {
    Join { player_id: Uuid, conn: Conn },
    SelectStrategy { player_id: Uuid, strategy: Strategy },
    Chat { player_id: Uuid, message: String },
    Disconnected { player_id: Uuid },
    /// Pacing task finished pushing the round's events.
    RoundDelivered,
}

/// Seed data for a freshly matched battle.
pub struct BattleSeed {
    pub battle_id: Uuid,
    pub mode: GameMode,
    pub p1: QueueEntry,
    pub p2: QueueEntry,
}

/// Called by the session on its way out so the orchestrator can drop
/// its registry entries.
pub trait Evict: Send + Sync + 'static {
    fn evict(&self, battle_id: Uuid, players: [Uuid; 2]);
    fn battle_done(&self, battle_id: Uuid, players: [Uuid; 2]);
}

struct PlayerSlot {
    player_id: Uuid,
    rating: i32,
    combatant: Combatant,
    strategy: Option<Strategy>,
    connected: bool,
    conn: Option<Conn>,
    dc_deadline: Option<Instant>,
}

impl PlayerSlot {
    fn from_entry(entry: QueueEntry) -> Self {
        PlayerSlot {
            player_id: entry.player_id,
            rating: entry.rating,
            combatant: entry.combatant,
            strategy: None,
            connected: false,
            conn: None,
            dc_deadline: None,
        }
    }

    fn view(&self) -> PlayerView {
        PlayerView {
            player_id: self.player_id,
            name: self.combatant.name.clone(),
            level: self.combatant.level,
            health: self.combatant.current_health,
            max_health: self.combatant.max_health(),
            connected: self.connected,
            effects: self.combatant.effects.clone(),
        }
    }
}

struct BattleSession {
    battle_id: Uuid,
    mode: GameMode,
    phase: Phase,
    round: u32,
    slots: [PlayerSlot; 2],
    log: Vec<CombatEvent>,
    chat_enabled: bool,
    chat_messages: u32,
    end: Option<(Option<Side>, EndReason)>,

    /// The one phase timer. Writing a new value cancels the old one.
    phase_deadline: Option<Instant>,

    tx: mpsc::Sender<BattleCmd>,
    coord: Arc<Coordination>,
    collab: Collaborators,
    evict: Arc<dyn Evict>,
    server_id: Uuid,
    done: bool,
}

/// Spawn the battle task. The returned sender is the battle's mailbox.
pub fn spawn(
    seed: BattleSeed,
    coord: Arc<Coordination>,
    collab: Collaborators,
    evict: Arc<dyn Evict>,
    server_id: Uuid,
) -> mpsc::Sender<BattleCmd> {
    let (tx, mut rx) = mpsc::channel::<BattleCmd>(64);

    let mut session = BattleSession {
        battle_id: seed.battle_id,
        mode: seed.mode,
        phase: Phase::StrategySelect,
        round: 1,
        slots: [
            PlayerSlot::from_entry(seed.p1),
            PlayerSlot::from_entry(seed.p2),
        ],
        log: Vec::new(),
        chat_enabled: true,
        chat_messages: 0,
        end: None,
        phase_deadline: None,
        tx: tx.clone(),
        coord,
        collab,
        evict,
        server_id,
        done: false,
    };

    tokio::spawn(async move {
        crate::metrics::ACTIVE_BATTLES.inc();
        session.enter_strategy_select();

        while !session.done {
            let deadline = session.next_deadline();
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(cmd) => session.handle(cmd).await,
                    None => break,
                },
                _ = async move {
                    match deadline {
                        Some(d) => sleep_until(d).await,
                        None => pending::<()>().await,
                    }
                } => session.fire_deadlines().await,
            }
        }

        crate::metrics::ACTIVE_BATTLES.dec();
        let players = [session.slots[0].player_id, session.slots[1].player_id];
        session.evict.evict(session.battle_id, players);
        log::info!("battle {} evicted", session.battle_id);
    });

    tx
}

impl BattleSession {
    fn side_of(&self, player_id: Uuid) -> Option<Side> {
        if self.slots[0].player_id == player_id {
            Some(Side::P1)
        } else if self.slots[1].player_id == player_id {
            Some(Side::P2)
        } else {
            None
        }
    }

    fn slot(&mut self, side: Side) -> &mut PlayerSlot {
        match side {
            Side::P1 => &mut self.slots[0],
            Side::P2 => &mut self.slots[1],
        }
    }

    fn send_to(&self, side: Side, msg: ServerMsg) {
        let slot = match side {
            Side::P1 => &self.slots[0],
            Side::P2 => &self.slots[1],
        };
        if let Some(conn) = &slot.conn {
            let _ = conn.send(msg);
        }
    }

    fn broadcast(&self, msg: ServerMsg) {
        self.send_to(Side::P1, msg.clone());
        self.send_to(Side::P2, msg);
    }

    fn snapshot_for(&self, you: Side) -> BattleSnapshot {
        const LOG_TAIL: usize = 20;
        let tail = self.log.len().saturating_sub(LOG_TAIL);
        BattleSnapshot {
            battle_id: self.battle_id,
            phase: self.phase,
            round: self.round,
            you,
            players: [self.slots[0].view(), self.slots[1].view()],
            chat_enabled: self.chat_enabled,
            log: self.log[tail..].to_vec(),
            winner: self.end.and_then(|(winner, _)| winner),
            end_reason: self.end.map(|(_, reason)| reason),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.phase_deadline,
            self.slots[0].dc_deadline,
            self.slots[1].dc_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ------- command handling ------------------------------------------

    async fn handle(&mut self, cmd: BattleCmd) {
        match cmd {
            BattleCmd::Join { player_id, conn } => self.on_join(player_id, conn),
            BattleCmd::SelectStrategy {
                player_id,
                strategy,
            } => self.on_select_strategy(player_id, strategy).await,
            BattleCmd::Chat { player_id, message } => self.on_chat(player_id, message),
            BattleCmd::Disconnected { player_id } => self.on_disconnect(player_id),
            BattleCmd::RoundDelivered => self.after_round().await,
        }
    }

    fn on_join(&mut self, player_id: Uuid, conn: Conn) {
        let Some(side) = self.side_of(player_id) else {
            let _ = conn.send(ServerMsg::Error {
                reason: "not a participant of this battle".into(),
            });
            return;
        };

        let snapshot = self.snapshot_for(side);
        let _ = conn.send(ServerMsg::BattleState { snapshot });

        let slot = self.slot(side);
        slot.conn = Some(conn);
        slot.connected = true;
        slot.dc_deadline = None;

        if self.phase != Phase::BattleEnd {
            self.send_to(side.other(), ServerMsg::OpponentConnected);
        }
    }

    async fn on_select_strategy(&mut self, player_id: Uuid, strategy: Strategy) {
        // silently ignored outside the pick window or on a double pick
        if self.phase != Phase::StrategySelect {
            return;
        }
        let Some(side) = self.side_of(player_id) else {
            return;
        };
        let slot = self.slot(side);
        if slot.strategy.is_some() {
            return;
        }
        slot.strategy = Some(strategy);

        if self.slots.iter().all(|s| s.strategy.is_some()) {
            self.start_combat();
        }
    }

    fn on_chat(&mut self, player_id: Uuid, message: String) {
        if self.phase != Phase::ChatBreak || !self.chat_enabled {
            return;
        }
        let Some(side) = self.side_of(player_id) else {
            return;
        };
        self.chat_messages += 1;

        let conns = [self.slots[0].conn.clone(), self.slots[1].conn.clone()];
        let responder = self.collab.chat.clone();
        let battle_id = self.battle_id;
        tokio::spawn(async move {
            let reply = responder
                .reply(battle_id, &message)
                .await
                .unwrap_or_else(|e| {
                    log::warn!("chat responder failed for {battle_id}: {e:?}");
                    None
                });
            let msg = ServerMsg::ChatMessage {
                sender: side,
                message,
                reply,
            };
            for conn in conns.into_iter().flatten() {
                let _ = conn.send(msg.clone());
            }
        });
    }

    fn on_disconnect(&mut self, player_id: Uuid) {
        let Some(side) = self.side_of(player_id) else {
            return;
        };
        let slot = self.slot(side);
        if !slot.connected && slot.conn.is_none() {
            return; // duplicate close notice
        }
        slot.connected = false;
        slot.conn = None;

        if self.phase == Phase::BattleEnd {
            return; // nothing to forfeit, battle is already over
        }

        self.slot(side).dc_deadline =
            Some(Instant::now() + Duration::from_secs(settings().disconnect_grace));
        self.send_to(side.other(), ServerMsg::OpponentDisconnected);
        log::info!(
            "battle {}: {player_id} disconnected, grace timer armed",
            self.battle_id
        );
    }

    // ------- timers ----------------------------------------------------

    async fn fire_deadlines(&mut self) {
        let now = Instant::now();

        for side in [Side::P1, Side::P2] {
            let grace_expired = {
                let slot = self.slot(side);
                if slot.dc_deadline.is_some_and(|d| d <= now) {
                    slot.dc_deadline = None;
                    !slot.connected
                } else {
                    false
                }
            };
            if grace_expired && self.phase != Phase::BattleEnd {
                log::info!(
                    "battle {}: grace expired, {:?} forfeits",
                    self.battle_id,
                    side
                );
                self.send_to(side.other(), ServerMsg::OpponentForfeited);
                self.finish(Some(side.other()), EndReason::Forfeit).await;
                return;
            }
        }

        if self.phase_deadline.is_some_and(|d| d <= now) {
            self.phase_deadline = None;
            match self.phase {
                Phase::StrategySelect => {
                    // late pickers fight with the neutral default
                    for slot in self.slots.iter_mut() {
                        slot.strategy.get_or_insert(Strategy::Balanced);
                    }
                    self.start_combat();
                }
                Phase::ChatBreak => self.advance_round().await,
                Phase::BattleEnd => self.done = true,
                Phase::RoundCombat => {} // combat is driven by RoundDelivered
            }
        }
    }

    // ------- phase transitions -----------------------------------------

    fn enter_strategy_select(&mut self) {
        self.phase = Phase::StrategySelect;
        for slot in self.slots.iter_mut() {
            slot.strategy = None;
        }
        let secs = settings().strategy_secs;
        self.phase_deadline = Some(Instant::now() + Duration::from_secs(secs));
        self.broadcast(ServerMsg::StrategyPhaseStart {
            round: self.round,
            seconds: secs,
        });
    }

    fn start_combat(&mut self) {
        self.phase = Phase::RoundCombat;
        self.phase_deadline = None;

        let strat1 = self.slots[0].strategy.unwrap_or(Strategy::Balanced);
        let strat2 = self.slots[1].strategy.unwrap_or(Strategy::Balanced);

        let (p1, p2) = self.slots.split_at_mut(1);
        let events = simulate_round(
            self.round,
            &mut p1[0].combatant,
            &mut p2[0].combatant,
            strat1,
            strat2,
            &CombatConfig::from_settings(),
            &mut rand::rng(),
        );
        self.log.extend(events.iter().cloned());

        self.broadcast(ServerMsg::RoundStart { round: self.round });

        // Pacing is a transport concern: push events on a side task so the
        // mailbox stays responsive, then report back for the phase change.
        let conns = [self.slots[0].conn.clone(), self.slots[1].conn.clone()];
        let pace = Duration::from_millis(settings().event_pacing_ms);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            for event in events {
                let msg = ServerMsg::CombatEvent { event };
                for conn in conns.iter().flatten() {
                    let _ = conn.send(msg.clone());
                }
                sleep(pace).await;
            }
            let _ = tx.send(BattleCmd::RoundDelivered).await;
        });
    }

    async fn after_round(&mut self) {
        if self.phase != Phase::RoundCombat {
            return;
        }
        let alive1 = self.slots[0].combatant.is_alive();
        let alive2 = self.slots[1].combatant.is_alive();
        match (alive1, alive2) {
            (true, false) => self.finish(Some(Side::P1), EndReason::Knockout).await,
            (false, true) => self.finish(Some(Side::P2), EndReason::Knockout).await,
            (false, false) => self.finish(None, EndReason::Knockout).await,
            (true, true) => self.enter_chat_break(),
        }
    }

    fn enter_chat_break(&mut self) {
        self.phase = Phase::ChatBreak;
        let secs = settings().chat_secs;
        self.phase_deadline = Some(Instant::now() + Duration::from_secs(secs));
        self.broadcast(ServerMsg::ChatPhaseStart { seconds: secs });
    }

    async fn advance_round(&mut self) {
        self.round += 1;
        if self.round > settings().max_rounds {
            // full-length battle: winner by remaining health share
            let share = |slot: &PlayerSlot| {
                slot.combatant.current_health as f64 / slot.combatant.max_health().max(1) as f64
            };
            let (s1, s2) = (share(&self.slots[0]), share(&self.slots[1]));
            let winner = if s1 > s2 {
                Some(Side::P1)
            } else if s2 > s1 {
                Some(Side::P2)
            } else {
                None
            };
            self.finish(winner, EndReason::MaxRounds).await;
        } else {
            self.enter_strategy_select();
        }
    }

    // ------- battle end ------------------------------------------------

    async fn finish(&mut self, winner: Option<Side>, reason: EndReason) {
        if self.phase == Phase::BattleEnd {
            return; // terminal phase is absorbing
        }
        self.phase = Phase::BattleEnd;
        self.end = Some((winner, reason));

        let rounds_played = self.round.min(settings().max_rounds);
        let (rewards_p1, rewards_p2) = rewards::compute(&RewardContext {
            winner,
            level_p1: self.slots[0].combatant.level,
            level_p2: self.slots[1].combatant.level,
            rounds_played,
            max_rounds: settings().max_rounds,
            chat_messages: self.chat_messages,
            chat_bonus_threshold: settings().chat_bonus_threshold,
        });

        let winner_flag = match winner {
            Some(Side::P1) => 1,
            Some(Side::P2) => 2,
            None => 0,
        };
        let (delta_p1, delta_p2) = scoring::rating_delta(
            self.slots[0].rating,
            self.slots[1].rating,
            winner_flag,
            32.0,
        );

        self.broadcast(ServerMsg::BattleEnd {
            winner,
            reason,
            health_p1: self.slots[0].combatant.current_health,
            health_p2: self.slots[1].combatant.current_health,
            rewards_p1,
            rewards_p2,
        });

        let result = BattleResult {
            battle_id: self.battle_id,
            mode: self.mode,
            player1: self.slots[0].player_id,
            player2: self.slots[1].player_id,
            winner: winner.map(|w| match w {
                Side::P1 => self.slots[0].player_id,
                Side::P2 => self.slots[1].player_id,
            }),
            reason,
            rounds: rounds_played,
            health_p1: self.slots[0].combatant.current_health,
            health_p2: self.slots[1].combatant.current_health,
            rewards_p1,
            rewards_p2,
            rating_delta_p1: delta_p1,
            rating_delta_p2: delta_p2,
            log: self.log.clone(),
            ended_at: Utc::now(),
        };
        persist_result(
            self.collab.clone(),
            self.coord.clone(),
            result,
            [rewards_p1, rewards_p2],
            [delta_p1, delta_p2],
        );

        // peers drop their references off this event
        let ended = LifecycleEvent::BattleEnded {
            battle_id: self.battle_id,
            server_id: self.server_id,
        };
        let coord = self.coord.clone();
        tokio::spawn(async move {
            if let Ok(json) = serde_json::to_string(&ended) {
                let _ = coord.publish(EVENTS_CHANNEL, &json).await;
            }
        });

        self.evict.battle_done(
            self.battle_id,
            [self.slots[0].player_id, self.slots[1].player_id],
        );

        // keep final state readable for late reconnects, then evict
        for slot in self.slots.iter_mut() {
            slot.dc_deadline = None;
        }
        self.phase_deadline =
            Some(Instant::now() + Duration::from_secs(settings().end_retain_secs));
    }
}

/// Persist the final record off the battle task. Failures never stall the
/// terminal transition; after the retries run out the result is parked
/// under an `unpersisted:` key for reconciliation.
fn persist_result(
    collab: Collaborators,
    coord: Arc<Coordination>,
    result: BattleResult,
    grants: [RewardGrant; 2],
    deltas: [i32; 2],
) {
    tokio::spawn(async move {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let backoff = ExponentialBackoff::from_millis(100).map(jitter).take(4);
        let attempt = Retry::spawn(backoff, || collab.battles.record_result(&result)).await;
        if let Err(e) = attempt {
            log::error!(
                "battle {} result not persisted, parking for reconciliation: {e:?}",
                result.battle_id
            );
            if let Ok(json) = serde_json::to_string(&result) {
                let key = format!("unpersisted:battle:{}", result.battle_id);
                let _ = coord.set_ex(&key, &json, 86_400).await;
            }
            return;
        }

        for (player_id, (grant, delta)) in [result.player1, result.player2]
            .into_iter()
            .zip(grants.into_iter().zip(deltas))
        {
            if let Err(e) = collab.characters.apply_outcome(player_id, delta, grant).await {
                log::warn!("post-battle update failed for {player_id}: {e:?}");
            }
        }
    });
}
