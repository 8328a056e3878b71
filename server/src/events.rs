use std::sync::Arc;

use dominet_protocol::{Action, GameEndedNotice, Message, RoomStatus};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broadcast::BroadcastDispatcher;
use crate::game::GameOrchestrator;
use crate::rooms::RoomRegistry;
use crate::session::SessionRegistry;

/// Typed events the registries emit instead of calling each other back
/// directly. Game-state snapshots do NOT travel through here: those are
/// broadcast synchronously with the mutation to keep per-room ordering.
#[derive(Debug)]
pub enum ServerEvent {
    PlayerListChanged,
    RoomListChanged,
    PlayerJoinedRoom {
        room: String,
        username: String,
    },
    PlayerLeftRoom {
        room: String,
        username: String,
        mid_game: bool,
    },
    GameEnded {
        room: String,
        notice: GameEndedNotice,
    },
}

/// Single consumer of the registry event channel: refreshes the global
/// player/room lists, auto-starts full rooms, and announces finished games.
pub async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    games: Arc<GameOrchestrator>,
) {
    let dispatcher = BroadcastDispatcher::new(sessions.clone());
    while let Some(event) = rx.recv().await {
        match event {
            ServerEvent::PlayerListChanged => {
                sessions.broadcast_all(&sessions.player_list_message());
            }
            ServerEvent::RoomListChanged => {
                match Message::ok(Action::RoomList).with_payload(&rooms.summaries()) {
                    Ok(msg) => sessions.broadcast_all(&msg),
                    Err(error) => warn!(%error, "failed to encode room list"),
                }
            }
            ServerEvent::PlayerJoinedRoom { room, username } => {
                debug!(room = %room, %username, "player joined room");
                let Some(r) = rooms.get(&room) else { continue };
                if r.status == RoomStatus::Waiting && r.players.len() >= r.max_players {
                    if let Err(error) = games.start_game(&room) {
                        warn!(room = %room, %error, "auto-start failed");
                    }
                }
            }
            ServerEvent::PlayerLeftRoom {
                room,
                username,
                mid_game,
            } => {
                if mid_game {
                    games.note_departure(&room, &username);
                }
            }
            ServerEvent::GameEnded { room, notice } => {
                let Some(r) = rooms.get(&room) else { continue };
                match Message::ok(Action::GameEnded)
                    .in_room(&r.name)
                    .with_payload(&notice)
                {
                    Ok(msg) => dispatcher.push_to_room(&r, msg),
                    Err(error) => warn!(room = %room, %error, "failed to encode game end"),
                }
            }
        }
    }
}
