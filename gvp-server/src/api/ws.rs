use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;
use gvp_sdk::objects::{BroadcastEvent, ClientMessage, ServerMessage, WsCloseCode};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::state::AppState;

/// `GET /ws` — live donation event stream.
///
/// Upgrades the HTTP connection to a WebSocket. The client manages its
/// own channel subscriptions with `subscribe`/`unsubscribe` control
/// frames; every relayed [`BroadcastEvent`] whose channels intersect the
/// connection's set is pushed as a JSON frame. A connection that stops
/// answering pings is closed with [`WsCloseCode::PING_TIMEOUT`].
pub async fn viewer_ws(state: State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let app_state = state.0.clone();
    ws.on_upgrade(move |socket| handle_viewer_ws(socket, app_state))
}

/// Whether an event should be delivered to a connection with this
/// subscription set.
fn matches(subscribed: &HashSet<String>, event: &BroadcastEvent) -> bool {
    event
        .channels()
        .iter()
        .any(|channel| subscribed.contains(channel))
}

/// Background task that drives a single viewer connection.
async fn handle_viewer_ws(mut socket: WebSocket, state: AppState) {
    let connections = state.hub.connection_opened();
    tracing::debug!(connections, "Viewer connected");

    // Subscribe to the relay *before* serving so no event published while
    // the handshake completes is missed.
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    let mut subscribed: HashSet<String> = HashSet::new();
    let mut ping = tokio::time::interval(state.ws.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) if matches(&subscribed, &event) => {
                        if send_json(&mut socket, &ServerMessage::from(event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // At-least-once, never blocking: a slow viewer
                        // loses events rather than stalling the hub.
                        tracing::warn!(skipped, "Viewer lagged behind broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: WsCloseCode::NORMAL,
                                reason: "server shutting down".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if last_activity.elapsed() > state.ws.pong_timeout {
                    tracing::debug!("Viewer ping timeout, closing");
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: WsCloseCode::PING_TIMEOUT,
                            reason: "ping timeout".into(),
                        })))
                        .await;
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let reply = handle_control_frame(&mut subscribed, text.as_str());
                        if send_json(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let connections = state.hub.connection_closed();
    tracing::debug!(connections, "Viewer disconnected");
}

/// Apply one control frame to the subscription set; the reply always
/// carries the full resulting set so the client can resync.
fn handle_control_frame(subscribed: &mut HashSet<String>, text: &str) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::Error {
                code: 1007,
                reason: format!("malformed control frame: {e}"),
            };
        }
    };

    match message {
        ClientMessage::Subscribe { channels } => {
            subscribed.extend(channels);
            ServerMessage::Subscribed {
                channels: sorted(subscribed),
            }
        }
        ClientMessage::Unsubscribe { channels } => {
            for channel in &channels {
                subscribed.remove(channel);
            }
            ServerMessage::Unsubscribed {
                channels: sorted(subscribed),
            }
        }
    }
}

fn sorted(subscribed: &HashSet<String>) -> Vec<String> {
    let mut channels: Vec<String> = subscribed.iter().cloned().collect();
    channels.sort();
    channels
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
