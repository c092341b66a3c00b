//! Distributed matchmaking queue.
//
//  Coordination keys / channels
//  ----------------------------
//  matchmaking:<mode>          – hash  field = <player_id>, value = entry JSON
//  matchmaking:<mode>:players  – set   member = <player_id>
//  match_lock:<a>:<b>          – pair lock (sorted ids), short TTL

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::battle::types::{GameMode, QueueEntry};
use crate::config::settings;
use crate::coord::Coordination;

fn queue_key(mode: GameMode) -> String {
    format!("matchmaking:{}", mode.as_str())
}

fn players_key(mode: GameMode) -> String {
    format!("matchmaking:{}:players", mode.as_str())
}

/// Lock key for a player pair, invariant under argument order.
pub fn pair_lock_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    format!("match_lock:{lo}:{hi}")
}

/// Acceptable rating distance after `waited_secs` in the queue.
///
/// Single definition used by every search path; only the candidate
/// listing differs between backends.
pub fn rating_window(waited_secs: i64) -> i64 {
    let s = settings();
    let grown = s.window_base as i64 + s.window_growth as i64 * (waited_secs.max(0) / 10);
    grown.min(s.window_cap as i64)
}

#[derive(Clone)]
pub struct MatchQueue {
    coord: Arc<Coordination>,
}

impl MatchQueue {
    pub fn new(coord: Arc<Coordination>) -> Self {
        MatchQueue { coord }
    }

    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let pid = entry.player_id.to_string();
        self.coord
            .hash_set(&queue_key(entry.mode), &pid, &json)
            .await?;
        self.coord.set_add(&players_key(entry.mode), &pid).await?;
        Ok(())
    }

    /// Remove a player from the queue. Returns whether they were present.
    pub async fn dequeue(&self, player_id: Uuid, mode: GameMode) -> Result<bool> {
        let pid = player_id.to_string();
        let present = self.coord.hash_del(&queue_key(mode), &pid).await?;
        self.coord.set_del(&players_key(mode), &pid).await?;
        Ok(present)
    }

    pub async fn list(&self, mode: GameMode) -> Result<Vec<QueueEntry>> {
        let raw = self.coord.hash_get_all(&queue_key(mode)).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (pid, json) in raw {
            match serde_json::from_str::<QueueEntry>(&json) {
                Ok(e) => entries.push(e),
                Err(e) => log::warn!("dropping unparsable queue entry for {pid}: {e}"),
            }
        }
        Ok(entries)
    }

    pub async fn size(&self, mode: GameMode) -> Result<usize> {
        self.coord.set_size(&players_key(mode)).await
    }

    /// Find an opponent inside the requester's current rating window and
    /// atomically claim the pair.
    ///
    /// For each candidate: take the pair lock, re-check both players are
    /// still queued (another instance may have been faster), then remove
    /// both entries. Any failure releases the lock and moves on to the
    /// next candidate.
    pub async fn find_and_reserve(&self, entry: &QueueEntry) -> Result<Option<QueueEntry>> {
        let now = Utc::now();
        let waited = (now - entry.enqueued_at).num_seconds();
        let window = rating_window(waited);

        let mut candidates = Vec::new();
        for cand in self.list(entry.mode).await? {
            if cand.player_id == entry.player_id {
                continue;
            }
            if (now - cand.enqueued_at).num_seconds() > settings().queue_stale_secs {
                log::info!("evicting stale queue entry for {}", cand.player_id);
                let _ = self.dequeue(cand.player_id, entry.mode).await;
                continue;
            }
            if (cand.rating - entry.rating).abs() as i64 <= window {
                candidates.push(cand);
            }
        }
        // closest rating first
        candidates.sort_by_key(|c| (c.rating - entry.rating).abs());

        for cand in candidates {
            let lock_key = pair_lock_key(entry.player_id, cand.player_id);
            let token = Uuid::new_v4().to_string();
            if !self
                .coord
                .try_lock(&lock_key, &token, settings().lock_ttl_ms)
                .await?
            {
                continue;
            }

            match self.claim_pair(entry, &cand).await {
                Ok(Some(opponent)) => {
                    self.coord.unlock(&lock_key, &token).await?;
                    return Ok(Some(opponent));
                }
                Ok(None) => {
                    // one of the two was already matched elsewhere
                    self.coord.unlock(&lock_key, &token).await?;
                }
                Err(e) => {
                    self.coord.unlock(&lock_key, &token).await?;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Under the pair lock: verify both players are still queued, then
    /// remove both entries. Returns the opponent entry as re-read under
    /// the lock.
    async fn claim_pair(
        &self,
        entry: &QueueEntry,
        cand: &QueueEntry,
    ) -> Result<Option<QueueEntry>> {
        let listed = self.coord.hash_get_all(&queue_key(entry.mode)).await?;
        let me = entry.player_id.to_string();
        let them = cand.player_id.to_string();

        let mut opponent = None;
        let mut requester_present = false;
        for (pid, json) in listed {
            if pid == me {
                requester_present = true;
            } else if pid == them {
                opponent = serde_json::from_str::<QueueEntry>(&json).ok();
            }
        }
        let Some(opponent) = opponent else {
            return Ok(None);
        };
        if !requester_present {
            return Ok(None);
        }

        // Removal is the commit point: hash deletion is atomic per field,
        // so even a racing claim through a different pair lock can take
        // each player at most once.
        if !self.dequeue(entry.player_id, entry.mode).await? {
            return Ok(None); // someone matched us first
        }
        if !self.dequeue(opponent.player_id, entry.mode).await? {
            // opponent was claimed in the meantime; restore ourselves
            self.enqueue(entry).await?;
            return Ok(None);
        }
        Ok(Some(opponent))
    }

    /// Queue position and a rough wait estimate for an unmatched player,
    /// derived from queue size and how the window will grow toward the
    /// nearest queued rating.
    pub async fn estimate_wait(&self, entry: &QueueEntry) -> Result<(usize, u64)> {
        let others = self.list(entry.mode).await?;
        let position = others.len();

        let nearest_gap = others
            .iter()
            .filter(|c| c.player_id != entry.player_id)
            .map(|c| (c.rating - entry.rating).abs() as i64)
            .min();

        let s = settings();
        let est = match nearest_gap {
            // someone compatible exists: next rescan should pair us
            Some(gap) if gap <= rating_window(0) => 5,
            // wait until the window expands out to the nearest rating
            Some(gap) => {
                let needed = (gap - s.window_base as i64).max(0) as u64;
                let growth = s.window_growth.max(1) as u64;
                (needed * 10).div_ceil(growth).clamp(5, 300)
            }
            None => 30,
        };
        Ok((position, est))
    }
}
