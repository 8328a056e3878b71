use std::collections::HashMap;

use dominet_protocol::{Action, Message};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::ServerEvent;

/// Outbound channel feeding one connection's writer task.
pub type Outbound = mpsc::UnboundedSender<Message>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("username is already taken")]
    DuplicateName,
    #[error("this connection is already logged in")]
    AlreadyLoggedIn,
    #[error("username cannot be empty")]
    EmptyName,
    #[error("unknown session")]
    UnknownSession,
}

struct Session {
    username: Option<String>,
    tx: Outbound,
}

#[derive(Default)]
struct SessionMap {
    sessions: HashMap<Uuid, Session>,
    // lowercase username -> session id; enforces case-insensitive uniqueness
    by_name: HashMap<String, Uuid>,
}

/// Registry of live connections and the identities bound to them. A username
/// is bound 1:1 to exactly one connection for the lifetime of a session.
pub struct SessionRegistry {
    inner: Mutex<SessionMap>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionRegistry {
    pub fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        SessionRegistry {
            inner: Mutex::new(SessionMap::default()),
            events,
        }
    }

    /// Track a freshly accepted connection. Login happens separately.
    pub fn register(&self, tx: Outbound) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().sessions.insert(
            id,
            Session {
                username: None,
                tx,
            },
        );
        id
    }

    /// Bind a username to the session. Uniqueness is case-insensitive among
    /// currently connected sessions.
    pub fn login(&self, id: Uuid, username: &str) -> Result<(), LoginError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(LoginError::EmptyName);
        }
        let key = username.to_lowercase();
        {
            let mut map = self.inner.lock();
            if map.by_name.contains_key(&key) {
                return Err(LoginError::DuplicateName);
            }
            let session = map
                .sessions
                .get_mut(&id)
                .ok_or(LoginError::UnknownSession)?;
            if session.username.is_some() {
                return Err(LoginError::AlreadyLoggedIn);
            }
            session.username = Some(username.to_string());
            map.by_name.insert(key, id);
        }
        info!(%username, "player logged in");
        let _ = self.events.send(ServerEvent::PlayerListChanged);
        Ok(())
    }

    /// Explicit logout: the connection stays open but the identity is freed.
    /// Returns the username that was bound, for room-leave cascading.
    pub fn logout(&self, id: Uuid) -> Option<String> {
        let username = {
            let mut map = self.inner.lock();
            let username = map.sessions.get_mut(&id)?.username.take()?;
            map.by_name.remove(&username.to_lowercase());
            username
        };
        info!(username = %username, "player logged out");
        let _ = self.events.send(ServerEvent::PlayerListChanged);
        Some(username)
    }

    /// Drop the session entirely (socket gone). Returns the bound username,
    /// if any, for room-leave cascading.
    pub fn unregister(&self, id: Uuid) -> Option<String> {
        let username = {
            let mut map = self.inner.lock();
            let session = map.sessions.remove(&id)?;
            if let Some(ref name) = session.username {
                map.by_name.remove(&name.to_lowercase());
            }
            session.username
        };
        if username.is_some() {
            let _ = self.events.send(ServerEvent::PlayerListChanged);
        }
        username
    }

    pub fn username_of(&self, id: Uuid) -> Option<String> {
        self.inner.lock().sessions.get(&id)?.username.clone()
    }

    /// Currently logged-in usernames, sorted for stable broadcasts.
    pub fn player_list(&self) -> Vec<String> {
        let map = self.inner.lock();
        let mut names: Vec<String> = map
            .sessions
            .values()
            .filter_map(|s| s.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Best-effort send to one logged-in player.
    pub fn send_to(&self, username: &str, msg: Message) {
        let tx = {
            let map = self.inner.lock();
            map.by_name
                .get(&username.to_lowercase())
                .and_then(|id| map.sessions.get(id))
                .map(|s| s.tx.clone())
        };
        if let Some(tx) = tx {
            if tx.send(msg).is_err() {
                debug!(%username, "send failed, connection is going down");
            }
        }
    }

    /// Best-effort fan-out of a finished frame to every connection,
    /// logged in or not.
    pub fn broadcast_all(&self, msg: &Message) {
        let txs: Vec<Outbound> = {
            let map = self.inner.lock();
            map.sessions.values().map(|s| s.tx.clone()).collect()
        };
        for tx in txs {
            let _ = tx.send(msg.clone());
        }
    }

    /// Snapshot the PLAYER_LIST push for the current roster.
    pub fn player_list_message(&self) -> Message {
        let names = self.player_list();
        Message::ok(Action::PlayerList)
            .with_payload(&names)
            .unwrap_or_else(|_| Message::ok(Action::PlayerList))
    }
}
