use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dominet_protocol::{RoomStatus, RoomSummary};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::events::ServerEvent;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room '{0}' already exists")]
    AlreadyExists(String),
    #[error("'{0}' is already in a room")]
    AlreadyInRoom(String),
    #[error("room '{0}' not found")]
    NotFound(String),
    #[error("room '{0}' is full")]
    RoomFull(String),
    #[error("game already in progress in room '{0}'")]
    GameInProgress(String),
    #[error("room '{0}' is not currently playing")]
    NotPlaying(String),
    #[error("invalid room configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    pub owner: String,
    pub max_players: usize,
    pub winning_score: u32,
    pub status: RoomStatus,
    pub players: Vec<String>,
    pub watchers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    fn can_join(&self) -> bool {
        self.status == RoomStatus::Waiting && self.players.len() < self.max_players
    }

    fn can_watch(&self) -> bool {
        self.status == RoomStatus::Playing
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            name: self.name.clone(),
            owner: self.owner.clone(),
            max_players: self.max_players,
            winning_score: self.winning_score,
            status: self.status,
            players: self.players.clone(),
            watchers: self.watchers.clone(),
        }
    }
}

/// What a `leave` call actually did, for caller-side logging.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room: String,
    pub was_player: bool,
    pub mid_game: bool,
    pub room_deleted: bool,
}

#[derive(Default)]
struct RoomMap {
    // lowercase room name -> room; names are unique case-insensitively
    rooms: HashMap<String, Room>,
    // lowercase username -> lowercase room name; a user occupies at most one room
    occupant: HashMap<String, String>,
}

/// Owns every Room. Membership changes emit registry events so the whole
/// server sees a fresh ROOM_LIST and the orchestrator can react to joins.
pub struct RoomRegistry {
    inner: Mutex<RoomMap>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl RoomRegistry {
    pub fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        RoomRegistry {
            inner: Mutex::new(RoomMap::default()),
            events,
        }
    }

    pub fn create(
        &self,
        name: &str,
        owner: &str,
        max_players: usize,
        winning_score: u32,
    ) -> Result<RoomSummary, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::InvalidConfig("room name cannot be empty".into()));
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&max_players) {
            return Err(RoomError::InvalidConfig(format!(
                "max players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
            )));
        }
        if winning_score == 0 {
            return Err(RoomError::InvalidConfig(
                "winning score must be greater than 0".into(),
            ));
        }

        let key = name.to_lowercase();
        let user_key = owner.to_lowercase();
        let summary = {
            let mut map = self.inner.lock();
            if map.rooms.contains_key(&key) {
                return Err(RoomError::AlreadyExists(name.to_string()));
            }
            if map.occupant.contains_key(&user_key) {
                return Err(RoomError::AlreadyInRoom(owner.to_string()));
            }
            let room = Room {
                name: name.to_string(),
                owner: owner.to_string(),
                max_players,
                winning_score,
                status: RoomStatus::Waiting,
                players: vec![owner.to_string()],
                watchers: Vec::new(),
                created_at: Utc::now(),
            };
            let summary = room.summary();
            map.rooms.insert(key.clone(), room);
            map.occupant.insert(user_key, key);
            summary
        };
        info!(room = %name, %owner, max_players, winning_score, "room created");
        let _ = self.events.send(ServerEvent::RoomListChanged);
        Ok(summary)
    }

    pub fn join(&self, room_name: &str, username: &str) -> Result<RoomSummary, RoomError> {
        let key = room_name.trim().to_lowercase();
        let user_key = username.to_lowercase();
        let (summary, canonical) = {
            let mut map = self.inner.lock();
            if map.occupant.contains_key(&user_key) {
                return Err(RoomError::AlreadyInRoom(username.to_string()));
            }
            let room = map
                .rooms
                .get_mut(&key)
                .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
            if room.status != RoomStatus::Waiting {
                return Err(RoomError::GameInProgress(room.name.clone()));
            }
            if room.players.len() >= room.max_players {
                return Err(RoomError::RoomFull(room.name.clone()));
            }
            room.players.push(username.to_string());
            let canonical = room.name.clone();
            let summary = room.summary();
            map.occupant.insert(user_key, key);
            (summary, canonical)
        };
        info!(room = %canonical, %username, "player joined room");
        let _ = self.events.send(ServerEvent::RoomListChanged);
        let _ = self.events.send(ServerEvent::PlayerJoinedRoom {
            room: canonical,
            username: username.to_string(),
        });
        Ok(summary)
    }

    pub fn watch(&self, room_name: &str, username: &str) -> Result<RoomSummary, RoomError> {
        let key = room_name.trim().to_lowercase();
        let user_key = username.to_lowercase();
        let (summary, canonical) = {
            let mut map = self.inner.lock();
            if map.occupant.contains_key(&user_key) {
                return Err(RoomError::AlreadyInRoom(username.to_string()));
            }
            let room = map
                .rooms
                .get_mut(&key)
                .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
            if !room.can_watch() {
                return Err(RoomError::NotPlaying(room.name.clone()));
            }
            room.watchers.push(username.to_string());
            let canonical = room.name.clone();
            let summary = room.summary();
            map.occupant.insert(user_key, key);
            (summary, canonical)
        };
        info!(room = %canonical, %username, "watcher joined room");
        let _ = self.events.send(ServerEvent::RoomListChanged);
        Ok(summary)
    }

    /// Remove the user from whichever room they occupy. Idempotent. If the
    /// departing user owns the room and no game is running, the room is
    /// deleted and every remaining member is released.
    pub fn leave(&self, username: &str) -> Option<LeaveOutcome> {
        let user_key = username.to_lowercase();
        let outcome = {
            let mut map = self.inner.lock();
            let room_key = map.occupant.remove(&user_key)?;
            let Some(room) = map.rooms.get_mut(&room_key) else {
                return None;
            };

            let was_player = room.players.iter().any(|p| p.eq_ignore_ascii_case(username));
            room.players.retain(|p| !p.eq_ignore_ascii_case(username));
            room.watchers.retain(|w| !w.eq_ignore_ascii_case(username));

            let mid_game = room.status == RoomStatus::Playing;
            let is_owner = room.owner.eq_ignore_ascii_case(username);
            let canonical = room.name.clone();

            let room_deleted = if is_owner && !mid_game {
                let members: Vec<String> = room
                    .players
                    .iter()
                    .chain(room.watchers.iter())
                    .map(|m| m.to_lowercase())
                    .collect();
                map.rooms.remove(&room_key);
                for member in members {
                    map.occupant.remove(&member);
                }
                true
            } else {
                false
            };

            LeaveOutcome {
                room: canonical,
                was_player,
                mid_game,
                room_deleted,
            }
        };
        info!(
            room = %outcome.room,
            %username,
            deleted = outcome.room_deleted,
            "left room"
        );
        let _ = self.events.send(ServerEvent::RoomListChanged);
        if outcome.was_player {
            let _ = self.events.send(ServerEvent::PlayerLeftRoom {
                room: outcome.room.clone(),
                username: username.to_string(),
                mid_game: outcome.mid_game,
            });
        }
        Some(outcome)
    }

    /// Called only by the game orchestrator.
    pub fn set_status(&self, room_name: &str, status: RoomStatus) {
        let changed = {
            let mut map = self.inner.lock();
            match map.rooms.get_mut(&room_name.trim().to_lowercase()) {
                Some(room) => {
                    room.status = status;
                    true
                }
                None => false,
            }
        };
        if changed {
            info!(room = %room_name, %status, "room status changed");
            let _ = self.events.send(ServerEvent::RoomListChanged);
        }
    }

    pub fn get(&self, room_name: &str) -> Option<Room> {
        self.inner
            .lock()
            .rooms
            .get(&room_name.trim().to_lowercase())
            .cloned()
    }

    pub fn room_of(&self, username: &str) -> Option<String> {
        let map = self.inner.lock();
        let key = map.occupant.get(&username.to_lowercase())?;
        map.rooms.get(key).map(|r| r.name.clone())
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let map = self.inner.lock();
        let mut rooms: Vec<RoomSummary> = map.rooms.values().map(Room::summary).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }
}
