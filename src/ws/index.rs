//! WebSocket endpoint: the realtime transport adapter.
//!
//! One task per socket. The first frame must be `auth`; after that the
//! pump multiplexes the client stream against a single outbound channel
//! fed by the orchestrator, the battle session and (via a forwarder)
//! the player's cross-instance event channel.

use std::sync::Arc;

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::{handle, Message};
use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth;
use crate::battle::manager::{BattleManager, FindMatchError, MatchOutcome};
use crate::config::settings;
use crate::coord::Coordination;
use crate::events::player_channel;
use crate::protocol::{ClientMsg, MatchStatus, ServerMsg};

pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    manager: web::Data<BattleManager>,
    coord: web::Data<Coordination>,
) -> Result<HttpResponse, Error> {
    let (response, mut session, mut ws_stream) = handle(&req, body)?;
    let manager = manager.get_ref().clone();
    let coord: Arc<Coordination> = coord.into_inner();

    actix::spawn(async move {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMsg>();
        let mut player: Option<Uuid> = None;

        loop {
            tokio::select! {
                // client → server
                frame = ws_stream.next() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        Ok(Message::Text(text)) => {
                            let Ok(msg) = serde_json::from_str::<ClientMsg>(&text) else {
                                let _ = tx.send(ServerMsg::Error {
                                    reason: "malformed message".into(),
                                });
                                continue;
                            };
                            handle_client_msg(msg, &manager, &coord, &tx, &mut player).await;
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                // everything headed to the client
                maybe = rx.recv() => {
                    let Some(msg) = maybe else { break };
                    let Ok(json) = serde_json::to_string(&msg) else { continue };
                    if session.text(json).await.is_err() {
                        break;
                    }
                }
            }
        }

        // On disconnect: drop presence, purge queue, arm the grace timer
        if let Some(pid) = player {
            let _ = coord.del(&format!("session:{pid}")).await;
            manager.handle_disconnect(pid).await;
            log::info!("WS closed for player {pid}");
        }
    });

    Ok(response)
}

async fn handle_client_msg(
    msg: ClientMsg,
    manager: &BattleManager,
    coord: &Arc<Coordination>,
    tx: &mpsc::UnboundedSender<ServerMsg>,
    player: &mut Option<Uuid>,
) {
    if let ClientMsg::Auth { token } = &msg {
        match auth::verify(token) {
            Ok(pid) => {
                *player = Some(pid);
                manager.register_socket(pid, tx.clone());
                let _ = coord
                    .set_ex(&format!("session:{pid}"), "1", settings().presence_ttl)
                    .await;
                spawn_event_forwarder(coord.clone(), pid, tx.clone()).await;
                let _ = tx.send(ServerMsg::AuthOk { player_id: pid });
            }
            Err(e) => {
                log::warn!("auth rejected: {e:?}");
                let _ = tx.send(ServerMsg::Error {
                    reason: "authentication failed".into(),
                });
            }
        }
        return;
    }

    let Some(pid) = *player else {
        let _ = tx.send(ServerMsg::Error {
            reason: "not authenticated".into(),
        });
        return;
    };

    match msg {
        ClientMsg::Auth { .. } => unreachable!("handled above"),
        ClientMsg::FindMatch { combatant_id, mode } => {
            match manager.find_match(pid, combatant_id, mode).await {
                Ok(MatchOutcome::Found { .. }) => {
                    // MatchResult is pushed by the orchestrator to both
                    // players, us included
                }
                Ok(MatchOutcome::Searching {
                    queue_position,
                    estimated_wait_seconds,
                }) => {
                    let _ = tx.send(ServerMsg::MatchResult {
                        status: MatchStatus::Searching,
                        battle_id: None,
                        queue_position: Some(queue_position),
                        estimated_wait_seconds: Some(estimated_wait_seconds),
                    });
                }
                Err(e) => {
                    if let FindMatchError::Internal(ref inner) = e {
                        log::error!("find_match failed for {pid}: {inner:?}");
                    }
                    let _ = tx.send(ServerMsg::Error {
                        reason: e.to_string(),
                    });
                }
            }
        }
        ClientMsg::CancelMatch { mode } => {
            if let Err(e) = manager.cancel_match(pid, mode).await {
                log::warn!("cancel_match failed for {pid}: {e:?}");
            }
        }
        ClientMsg::JoinBattle { battle_id } => {
            manager.join_battle(pid, battle_id, tx.clone()).await;
        }
        ClientMsg::SelectStrategy { strategy } => {
            manager.select_strategy(pid, strategy).await;
        }
        ClientMsg::SendChat { message } => {
            manager.send_chat(pid, message).await;
        }
    }
}

/// Forward pushes published for this player by other instances into the
/// socket's outbound channel. Ends on its own once the socket closes.
async fn spawn_event_forwarder(
    coord: Arc<Coordination>,
    player_id: Uuid,
    tx: mpsc::UnboundedSender<ServerMsg>,
) {
    let mut events = match coord.subscribe(&player_channel(player_id)).await {
        Ok(rx) => rx,
        Err(e) => {
            log::warn!("player channel subscribe failed for {player_id}: {e:?}");
            return;
        }
    };
    tokio::spawn(async move {
        while let Some(json) = events.recv().await {
            let Ok(msg) = serde_json::from_str::<ServerMsg>(&json) else {
                continue;
            };
            if tx.send(msg).is_err() {
                break;
            }
        }
    });
}
