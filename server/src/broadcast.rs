use std::sync::Arc;

use dominet_protocol::{Action, Message};
use tracing::warn;

use crate::game::GameSession;
use crate::rooms::Room;
use crate::session::SessionRegistry;

/// Fans state out to a room's participants. Snapshot construction happens
/// while the caller still holds the game lock; delivery happens after it is
/// released, so a slow socket never stalls the next mutation.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    sessions: Arc<SessionRegistry>,
}

impl BroadcastDispatcher {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        BroadcastDispatcher { sessions }
    }

    /// Build one GAME_STATE frame per participant: players see their own
    /// hand, watchers see no hand at all.
    pub fn snapshot_views(&self, room: &Room, session: &GameSession) -> Vec<(String, Message)> {
        let mut views = Vec::with_capacity(room.players.len() + room.watchers.len());
        for player in &room.players {
            let snapshot = session.snapshot_for(Some(player));
            match Message::ok(Action::GameState)
                .in_room(&room.name)
                .with_payload(&snapshot)
            {
                Ok(msg) => views.push((player.clone(), msg)),
                Err(error) => warn!(room = %room.name, %error, "failed to encode snapshot"),
            }
        }
        for watcher in &room.watchers {
            let snapshot = session.snapshot_for(None);
            match Message::ok(Action::GameState)
                .in_room(&room.name)
                .with_payload(&snapshot)
            {
                Ok(msg) => views.push((watcher.clone(), msg)),
                Err(error) => warn!(room = %room.name, %error, "failed to encode snapshot"),
            }
        }
        views
    }

    /// Best-effort delivery; a dead connection is skipped and cleaned up by
    /// its own teardown path.
    pub fn deliver(&self, views: Vec<(String, Message)>) {
        for (viewer, msg) in views {
            self.sessions.send_to(&viewer, msg);
        }
    }

    /// Push one identical frame to every participant of a room.
    pub fn push_to_room(&self, room: &Room, msg: Message) {
        for member in room.players.iter().chain(room.watchers.iter()) {
            self.sessions.send_to(member, msg.clone());
        }
    }
}
