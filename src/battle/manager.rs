//! Orchestrator: matchmaking → battle creation → session binding →
//! lifecycle events → cleanup.
//!
//! All instance-local state lives in concurrent maps here; nothing in
//! them is shared across servers. Peers only ever learn about battles
//! through the lifecycle channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::battle::session::{self, BattleCmd, BattleSeed, Conn, Evict};
use crate::battle::types::{GameMode, QueueEntry, Strategy};
use crate::config::settings;
use crate::coord::Coordination;
use crate::events::{player_channel, LifecycleEvent, EVENTS_CHANNEL};
use crate::matchmaking::MatchQueue;
use crate::protocol::{MatchStatus, ServerMsg};
use crate::storage::Collaborators;

const ALL_MODES: [GameMode; 2] = [GameMode::Ranked, GameMode::Casual];

/// Synchronous rejection of a `find_match` request. Nothing is mutated
/// when one of these comes back.
#[derive(Debug)]
pub enum FindMatchError {
    UnknownCombatant,
    NotYourCombatant,
    CharacterRecovering,
    DailyLimitReached,
    AlreadyInBattle,
    Internal(anyhow::Error),
}

impl fmt::Display for FindMatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindMatchError::UnknownCombatant => write!(f, "unknown combatant"),
            FindMatchError::NotYourCombatant => write!(f, "combatant does not belong to you"),
            FindMatchError::CharacterRecovering => write!(f, "character recovering"),
            FindMatchError::DailyLimitReached => write!(f, "daily limit reached"),
            FindMatchError::AlreadyInBattle => write!(f, "already in an active battle"),
            FindMatchError::Internal(_) => write!(f, "matchmaking unavailable"),
        }
    }
}

impl From<anyhow::Error> for FindMatchError {
    fn from(e: anyhow::Error) -> Self {
        FindMatchError::Internal(e)
    }
}

#[derive(Debug)]
pub enum MatchOutcome {
    Found {
        battle_id: Uuid,
    },
    Searching {
        queue_position: usize,
        estimated_wait_seconds: u64,
    },
}

/// Read-only operational snapshot.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub active_battles: usize,
    pub degraded: bool,
    pub queues: HashMap<String, usize>,
}

/// Instance-local concurrent maps. Battle mailboxes are the only way to
/// touch battle state; sessions clean their entries out through [`Evict`].
#[derive(Default)]
struct Registry {
    battles: DashMap<Uuid, mpsc::Sender<BattleCmd>>,
    player_battle: DashMap<Uuid, Uuid>,
    sockets: DashMap<Uuid, Conn>,
}

impl Evict for Registry {
    fn battle_done(&self, battle_id: Uuid, players: [Uuid; 2]) {
        for p in players {
            self.player_battle.remove_if(&p, |_, b| *b == battle_id);
        }
    }

    fn evict(&self, battle_id: Uuid, players: [Uuid; 2]) {
        self.battles.remove(&battle_id);
        for p in players {
            self.player_battle.remove_if(&p, |_, b| *b == battle_id);
        }
    }
}

/// Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct BattleManager {
    server_id: Uuid,
    coord: Arc<Coordination>,
    queue: MatchQueue,
    collab: Collaborators,
    reg: Arc<Registry>,
}

impl BattleManager {
    pub fn new(coord: Arc<Coordination>, collab: Collaborators) -> Self {
        BattleManager {
            server_id: Uuid::new_v4(),
            queue: MatchQueue::new(coord.clone()),
            coord,
            collab,
            reg: Arc::new(Registry::default()),
        }
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    // ------- socket bookkeeping ----------------------------------------

    pub fn register_socket(&self, player_id: Uuid, conn: Conn) {
        self.reg.sockets.insert(player_id, conn);
    }

    pub fn unregister_socket(&self, player_id: Uuid) {
        self.reg.sockets.remove(&player_id);
    }

    /// Push to the local socket when we have one, otherwise publish on
    /// the player's channel so whichever instance holds the socket can
    /// deliver it.
    pub fn notify_player(&self, player_id: Uuid, msg: ServerMsg) {
        let msg = match self.reg.sockets.get(&player_id) {
            Some(conn) => match conn.send(msg) {
                Ok(()) => return,
                Err(unsent) => unsent.0,
            },
            None => msg,
        };
        let coord = self.coord.clone();
        tokio::spawn(async move {
            if let Ok(json) = serde_json::to_string(&msg) {
                let _ = coord.publish(&player_channel(player_id), &json).await;
            }
        });
    }

    // ------- matchmaking -----------------------------------------------

    pub async fn find_match(
        &self,
        player_id: Uuid,
        combatant_id: Uuid,
        mode: GameMode,
    ) -> Result<MatchOutcome, FindMatchError> {
        if self.reg.player_battle.contains_key(&player_id) {
            return Err(FindMatchError::AlreadyInBattle);
        }

        let combatant = self
            .collab
            .characters
            .load_combatant(combatant_id)
            .await?
            .ok_or(FindMatchError::UnknownCombatant)?;
        if combatant.owner_id != player_id {
            return Err(FindMatchError::NotYourCombatant);
        }
        if self.collab.characters.is_recovering(combatant_id).await? {
            return Err(FindMatchError::CharacterRecovering);
        }
        if !self.collab.usage.try_consume(player_id).await? {
            return Err(FindMatchError::DailyLimitReached);
        }

        let rating = self.collab.characters.player_rating(player_id).await?;
        let entry = QueueEntry {
            player_id,
            combatant,
            rating,
            mode,
            enqueued_at: Utc::now(),
        };

        // one queue entry per player, ever
        for other in ALL_MODES.into_iter().filter(|m| *m != mode) {
            let _ = self.queue.dequeue(player_id, other).await;
        }
        self.queue.enqueue(&entry).await?;

        match self.queue.find_and_reserve(&entry).await? {
            Some(opponent) => {
                let battle_id = self.create_battle(entry, opponent, mode).await?;
                Ok(MatchOutcome::Found { battle_id })
            }
            None => {
                let (queue_position, estimated_wait_seconds) =
                    self.queue.estimate_wait(&entry).await?;
                Ok(MatchOutcome::Searching {
                    queue_position,
                    estimated_wait_seconds,
                })
            }
        }
    }

    pub async fn cancel_match(&self, player_id: Uuid, mode: GameMode) -> Result<bool> {
        self.queue.dequeue(player_id, mode).await
    }

    async fn create_battle(
        &self,
        p1: QueueEntry,
        p2: QueueEntry,
        mode: GameMode,
    ) -> Result<Uuid> {
        let battle_id = Uuid::new_v4();
        let players = [p1.player_id, p2.player_id];

        let seed = BattleSeed {
            battle_id,
            mode,
            p1,
            p2,
        };
        let mailbox = session::spawn(
            seed,
            self.coord.clone(),
            self.collab.clone(),
            self.reg.clone() as Arc<dyn Evict>,
            self.server_id,
        );
        self.reg.battles.insert(battle_id, mailbox);
        for p in players {
            self.reg.player_battle.insert(p, battle_id);
        }
        crate::metrics::MATCHES_CREATED.inc();
        log::info!(
            "battle {battle_id} created: {} vs {} ({mode:?})",
            players[0],
            players[1]
        );

        // stop peers from matching these two again
        let created = LifecycleEvent::BattleCreated {
            battle_id,
            player1: players[0],
            player2: players[1],
            server_id: self.server_id,
        };
        if let Ok(json) = serde_json::to_string(&created) {
            let _ = self.coord.publish(EVENTS_CHANNEL, &json).await;
        }
        // best-effort marker for cross-instance recovery tooling
        let marker = serde_json::json!({
            "battle_id": battle_id,
            "player1": players[0],
            "player2": players[1],
            "server_id": self.server_id,
        });
        let _ = self
            .coord
            .set_ex(&format!("battle:{battle_id}"), &marker.to_string(), 3600)
            .await;

        for p in players {
            self.notify_player(
                p,
                ServerMsg::MatchResult {
                    status: MatchStatus::Found,
                    battle_id: Some(battle_id),
                    queue_position: None,
                    estimated_wait_seconds: None,
                },
            );
        }
        Ok(battle_id)
    }

    // ------- battle routing --------------------------------------------

    pub async fn join_battle(&self, player_id: Uuid, battle_id: Uuid, conn: Conn) {
        match self.reg.battles.get(&battle_id).map(|tx| tx.value().clone()) {
            Some(tx) => {
                let _ = tx.send(BattleCmd::Join { player_id, conn }).await;
            }
            None => {
                let _ = conn.send(ServerMsg::Error {
                    reason: "battle not found on this server".into(),
                });
            }
        }
    }

    pub async fn select_strategy(&self, player_id: Uuid, strategy: Strategy) {
        self.send_to_battle(
            player_id,
            BattleCmd::SelectStrategy {
                player_id,
                strategy,
            },
        )
        .await;
    }

    pub async fn send_chat(&self, player_id: Uuid, message: String) {
        self.send_to_battle(player_id, BattleCmd::Chat { player_id, message })
            .await;
    }

    async fn send_to_battle(&self, player_id: Uuid, cmd: BattleCmd) {
        let Some(battle_id) = self.reg.player_battle.get(&player_id).map(|b| *b) else {
            return;
        };
        if let Some(tx) = self.reg.battles.get(&battle_id).map(|tx| tx.value().clone()) {
            let _ = tx.send(cmd).await;
        }
    }

    /// WS layer calls this when a socket closes.
    pub async fn handle_disconnect(&self, player_id: Uuid) {
        self.unregister_socket(player_id);

        for mode in ALL_MODES {
            let _ = self.queue.dequeue(player_id, mode).await;
        }

        let event = LifecycleEvent::PlayerDisconnected {
            player_id,
            server_id: self.server_id,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = self.coord.publish(EVENTS_CHANNEL, &json).await;
        }

        self.send_to_battle(player_id, BattleCmd::Disconnected { player_id })
            .await;
    }

    // ------- status ----------------------------------------------------

    pub async fn status(&self) -> StatusReport {
        let mut queues = HashMap::new();
        for mode in ALL_MODES {
            let size = self.queue.size(mode).await.unwrap_or(0);
            queues.insert(mode.as_str().to_string(), size);
        }
        StatusReport {
            active_battles: self.reg.battles.len(),
            degraded: self.coord.is_degraded(),
            queues,
        }
    }

    // ------- background loops ------------------------------------------

    /// React to lifecycle events published by other instances.
    pub fn spawn_event_listener(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut rx = match manager.coord.subscribe(EVENTS_CHANNEL).await {
                Ok(rx) => rx,
                Err(e) => {
                    log::error!("lifecycle subscription failed: {e:?}");
                    return;
                }
            };
            while let Some(json) = rx.recv().await {
                let Ok(event) = serde_json::from_str::<LifecycleEvent>(&json) else {
                    log::warn!("unparsable lifecycle event: {json}");
                    continue;
                };
                manager.on_lifecycle_event(event).await;
            }
        });
    }

    async fn on_lifecycle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::BattleCreated {
                player1,
                player2,
                server_id,
                ..
            } => {
                if server_id == self.server_id {
                    return;
                }
                // those two are taken; drop them from our queue view
                for p in [player1, player2] {
                    for mode in ALL_MODES {
                        let _ = self.queue.dequeue(p, mode).await;
                    }
                }
            }
            LifecycleEvent::BattleEnded {
                battle_id,
                server_id,
            } => {
                if server_id == self.server_id {
                    return;
                }
                self.reg.battles.remove(&battle_id);
                self.reg.player_battle.retain(|_, b| *b != battle_id);
            }
            LifecycleEvent::PlayerDisconnected {
                player_id,
                server_id,
            } => {
                if server_id == self.server_id {
                    return;
                }
                for mode in ALL_MODES {
                    let _ = self.queue.dequeue(player_id, mode).await;
                }
            }
        }
    }

    /// Periodically retry matching for everyone still queued, longest
    /// waiters first (their windows have grown the most).
    pub fn spawn_rescan(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(settings().rescan_secs)).await;
                for mode in ALL_MODES {
                    if let Err(e) = manager.rescan(mode).await {
                        log::error!("queue rescan failed for {mode:?}: {e:?}");
                    }
                }
            }
        });
    }

    async fn rescan(&self, mode: GameMode) -> Result<()> {
        let mut entries = self.queue.list(mode).await?;
        entries.sort_by_key(|e| e.enqueued_at);

        for entry in entries {
            if self.reg.player_battle.contains_key(&entry.player_id) {
                continue;
            }
            // find_and_reserve re-verifies under the pair lock, so a
            // stale listing here is harmless
            if let Some(opponent) = self.queue.find_and_reserve(&entry).await? {
                self.create_battle(entry, opponent, mode).await?;
            }
        }
        Ok(())
    }
}
