use std::net::SocketAddr;

use dominet_protocol::{Action, CreateRoomRequest, Message, PlayTileRequest, Tile};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::Outbound;
use crate::AppState;

/// One worker per client connection: a writer task drains the outbound
/// channel, the reader loop below decodes newline-delimited JSON frames and
/// dispatches them. The loop also watches the shutdown signal.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "failed to encode outbound frame");
                    continue;
                }
            };
            text.push('\n');
            if writer.write_all(text.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let conn_id = state.sessions.register(tx.clone());
    debug!(%peer, %conn_id, "client connected");

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(%peer, "closing connection on shutdown");
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Message>(line) {
                        Ok(msg) => handle_message(&state, conn_id, &tx, msg),
                        // malformed frame: drop it, keep the connection
                        Err(error) => warn!(%peer, %error, "dropping malformed frame"),
                    }
                }
                Ok(None) => break, // EOF
                Err(error) => {
                    debug!(%peer, %error, "read failed");
                    break;
                }
            }
        }
    }

    teardown(&state, conn_id);
    debug!(%peer, %conn_id, "client disconnected");
}

/// Full disconnect path: free the identity and cascade the room departure.
/// Mid-game departures are announced by the registry's PlayerLeftRoom event,
/// so no direct orchestrator call here.
fn teardown(state: &AppState, conn_id: Uuid) {
    if let Some(username) = state.sessions.unregister(conn_id) {
        let _ = state.rooms.leave(&username);
        info!(%username, "player disconnected");
    }
}

fn handle_message(state: &AppState, conn_id: Uuid, tx: &Outbound, msg: Message) {
    match msg.action {
        Action::Login => {
            let reply = match state.sessions.login(conn_id, &msg.username) {
                Ok(()) => {
                    // let the newcomer see the lobby right away; list
                    // broadcasts only fire on changes
                    send_room_list(state, tx);
                    Message::ok(Action::Login)
                }
                Err(error) => Message::err(Action::Login, error),
            };
            let _ = tx.send(reply);
        }
        Action::Logout => {
            if let Some(username) = state.sessions.logout(conn_id) {
                let _ = state.rooms.leave(&username);
            }
            let _ = tx.send(Message::ok(Action::Logout));
        }
        Action::CreateRoom => with_login(state, conn_id, tx, msg.action, |username| {
            let request: CreateRoomRequest = match msg.payload() {
                Ok(request) => request,
                Err(error) => return Message::err(Action::CreateRoom, error),
            };
            match state.rooms.create(
                &request.room_name,
                username,
                request.max_players,
                request.winning_score,
            ) {
                Ok(summary) => Message::ok(Action::CreateRoom).in_room(&summary.name),
                Err(error) => Message::err(Action::CreateRoom, error),
            }
        }),
        Action::JoinRoom => with_login(state, conn_id, tx, msg.action, |username| {
            let Some(room_name) = msg.room_name.as_deref() else {
                return Message::err(Action::JoinRoom, "room name not specified");
            };
            match state.rooms.join(room_name, username) {
                Ok(summary) => Message::ok(Action::JoinRoom).in_room(&summary.name),
                Err(error) => Message::err(Action::JoinRoom, error),
            }
        }),
        Action::WatchRoom => with_login(state, conn_id, tx, msg.action, |username| {
            let Some(room_name) = msg.room_name.as_deref() else {
                return Message::err(Action::WatchRoom, "room name not specified");
            };
            match state.rooms.watch(room_name, username) {
                Ok(summary) => {
                    // bring the watcher up to date with the running game
                    if let Some(snapshot) = state.games.snapshot_for(&summary.name, None) {
                        if let Ok(push) = Message::ok(Action::GameState)
                            .in_room(&summary.name)
                            .with_payload(&snapshot)
                        {
                            let _ = tx.send(push);
                        }
                    }
                    Message::ok(Action::WatchRoom).in_room(&summary.name)
                }
                Err(error) => Message::err(Action::WatchRoom, error),
            }
        }),
        Action::LeaveRoom => with_login(state, conn_id, tx, msg.action, |username| {
            // idempotent: leaving while in no room is still a success
            let _ = state.rooms.leave(username);
            Message::ok(Action::LeaveRoom)
        }),
        Action::StartGame => with_login(state, conn_id, tx, msg.action, |username| {
            let room_name = msg
                .room_name
                .clone()
                .or_else(|| state.rooms.room_of(username));
            let Some(room_name) = room_name else {
                return Message::err(Action::StartGame, "you are not in a room");
            };
            match state.games.start_requested(&room_name, username) {
                Ok(()) => Message::ok(Action::StartGame).in_room(&room_name),
                Err(error) => Message::err(Action::StartGame, error),
            }
        }),
        Action::PlayCard => with_login(state, conn_id, tx, msg.action, |username| {
            let request: PlayTileRequest = match msg.payload() {
                Ok(request) => request,
                Err(error) => return Message::err(Action::PlayCard, error),
            };
            let room_name = msg
                .room_name
                .clone()
                .or_else(|| state.rooms.room_of(username));
            let Some(room_name) = room_name else {
                return Message::err(Action::PlayCard, "you are not in a room");
            };
            match state.games.play(username, &room_name, Tile::from(request)) {
                Ok(()) => Message::ok(Action::PlayCard).in_room(&room_name),
                Err(error) => Message::err(Action::PlayCard, error),
            }
        }),
        Action::Pass => with_login(state, conn_id, tx, msg.action, |username| {
            let room_name = msg
                .room_name
                .clone()
                .or_else(|| state.rooms.room_of(username));
            let Some(room_name) = room_name else {
                return Message::err(Action::Pass, "you are not in a room");
            };
            match state.games.pass(username, &room_name) {
                Ok(()) => Message::ok(Action::Pass).in_room(&room_name),
                Err(error) => Message::err(Action::Pass, error),
            }
        }),
        // server-push actions have no meaning as requests
        Action::PlayerList
        | Action::RoomList
        | Action::GameState
        | Action::GameStarted
        | Action::GameEnded => {
            warn!(action = %msg.action, "dropping server-push action sent by client");
        }
    }
}

/// Run a handler that needs a bound identity; reply with an error otherwise.
fn with_login<F>(state: &AppState, conn_id: Uuid, tx: &Outbound, action: Action, f: F)
where
    F: FnOnce(&str) -> Message,
{
    let reply = match state.sessions.username_of(conn_id) {
        Some(username) => {
            let mut reply = f(&username);
            reply.username = username;
            reply
        }
        None => Message::err(action, "you must log in first"),
    };
    let _ = tx.send(reply);
}

fn send_room_list(state: &AppState, tx: &Outbound) {
    if let Ok(msg) = Message::ok(Action::RoomList).with_payload(&state.rooms.summaries()) {
        let _ = tx.send(msg);
    }
}
