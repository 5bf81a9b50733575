//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::RosterEntry;
use crate::game::simulation::{Outbound, RoomCmd, RoomHandle, Target};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// A connection's attachment to its room
struct RoomBinding {
    cmd_tx: mpsc::Sender<RoomCmd>,
    forwarder: JoinHandle<()>,
}

/// Drive one client connection: parse inbound commands once at this
/// boundary, route them to the room task, and pump room events back out.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();

    // Everything outbound funnels through one channel so direct unicasts
    // and forwarded room events interleave on a single writer.
    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(256);
    let writer = tokio::spawn(write_loop(ws_sink, out_rx, conn_id));

    let rate_limiter = ConnectionRateLimiter::new();
    let mut binding: Option<RoomBinding> = None;

    read_loop(
        &mut ws_stream,
        &state,
        conn_id,
        &rate_limiter,
        &out_tx,
        &mut binding,
    )
    .await;

    // Signal the room; the grace window takes it from here.
    if let Some(binding) = binding {
        let _ = binding.cmd_tx.send(RoomCmd::Disconnect { conn_id }).await;
        binding.forwarder.abort();
    }
    writer.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

async fn read_loop(
    ws_stream: &mut SplitStream<WebSocket>,
    state: &AppState,
    conn_id: Uuid,
    rate_limiter: &ConnectionRateLimiter,
    out_tx: &mpsc::Sender<ServerMsg>,
    binding: &mut Option<RoomBinding>,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn_id = %conn_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        handle_client_msg(msg, state, conn_id, out_tx, binding).await;
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

async fn handle_client_msg(
    msg: ClientMsg,
    state: &AppState,
    conn_id: Uuid,
    out_tx: &mpsc::Sender<ServerMsg>,
    binding: &mut Option<RoomBinding>,
) {
    match msg {
        ClientMsg::CreateRoom { name } => {
            if binding.is_some() {
                send_error(out_tx, "Already in a room").await;
                return;
            }

            // The creator gets a server-issued identity and the room stays
            // open for one more unlisted player.
            let identity = Uuid::new_v4();
            let roster = vec![RosterEntry {
                identity,
                name,
                profile_image: None,
            }];
            let code = state.sessions.create_room(roster, true);

            let Some(handle) = state.sessions.get(&code) else {
                send_error(out_tx, "Room not found").await;
                return;
            };
            match attach_to_room(&handle, conn_id, identity, out_tx).await {
                Ok(attached) => *binding = Some(attached),
                Err(msg) => send_error(out_tx, &msg).await,
            }
        }

        ClientMsg::JoinRoom {
            room_code,
            identity,
        } => {
            if binding.is_some() {
                send_error(out_tx, "Already in a room").await;
                return;
            }

            let Some(handle) = state.sessions.get(&room_code) else {
                debug!(conn_id = %conn_id, room_code = %room_code, "Join for unknown room");
                send_error(out_tx, "Room not found").await;
                return;
            };
            match attach_to_room(&handle, conn_id, identity, out_tx).await {
                Ok(attached) => *binding = Some(attached),
                Err(msg) => send_error(out_tx, &msg).await,
            }
        }

        ClientMsg::Move { input } => {
            if let Some(binding) = binding {
                let _ = binding.cmd_tx.send(RoomCmd::Input { conn_id, input }).await;
            }
        }

        ClientMsg::Shoot => {
            if let Some(binding) = binding {
                let _ = binding.cmd_tx.send(RoomCmd::Shoot { conn_id }).await;
            }
        }
    }
}

/// Subscribe to a room's events, then ask it to admit this connection.
/// The subscription exists before the join command so the join replies
/// (`yourId`, `init`, ...) cannot be missed.
async fn attach_to_room(
    handle: &RoomHandle,
    conn_id: Uuid,
    identity: Uuid,
    out_tx: &mpsc::Sender<ServerMsg>,
) -> Result<RoomBinding, String> {
    let events_rx = handle.events.subscribe();
    let forwarder = tokio::spawn(forward_room_events(events_rx, out_tx.clone(), conn_id));

    let (reply_tx, reply_rx) = oneshot::channel();
    let join = RoomCmd::Join {
        conn_id,
        identity,
        reply: reply_tx,
    };
    if handle.cmd_tx.send(join).await.is_err() {
        forwarder.abort();
        return Err("Room not found".to_string());
    }

    match reply_rx.await {
        Ok(Ok(())) => Ok(RoomBinding {
            cmd_tx: handle.cmd_tx.clone(),
            forwarder,
        }),
        Ok(Err(rejection)) => {
            forwarder.abort();
            Err(rejection.to_string())
        }
        Err(_) => {
            forwarder.abort();
            Err("Room not found".to_string())
        }
    }
}

/// Pump room events to this connection, honoring the delivery target.
async fn forward_room_events(
    mut events_rx: broadcast::Receiver<Outbound>,
    out_tx: mpsc::Sender<ServerMsg>,
    conn_id: Uuid,
) {
    loop {
        match events_rx.recv().await {
            Ok(event) => {
                let mine = match event.target {
                    Target::All => true,
                    Target::Conn(id) => id == conn_id,
                    Target::Except(id) => id != conn_id,
                };
                if mine && out_tx.send(event.msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(conn_id = %conn_id, lagged = n, "Event receiver lagged, skipping {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Serialize outbound messages onto the socket.
async fn write_loop(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
    conn_id: Uuid,
) {
    while let Some(msg) = out_rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if ws_sink.send(Message::Text(json)).await.is_err() {
                    debug!(conn_id = %conn_id, "WebSocket send failed");
                    break;
                }
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "Failed to serialize server message");
            }
        }
    }
}

async fn send_error(out_tx: &mpsc::Sender<ServerMsg>, msg: &str) {
    let _ = out_tx
        .send(ServerMsg::ErrorRoom {
            msg: msg.to_string(),
        })
        .await;
}
