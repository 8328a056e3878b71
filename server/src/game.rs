use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Local;
use dominet_protocol::{
    Action, GameEndedNotice, GameSnapshot, Message, RoomStatus, Rules, SeatView, Tile, TileEnd,
    HAND_SIZE, TileSet,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::archive::{MatchResult, ResultArchiver};
use crate::broadcast::BroadcastDispatcher;
use crate::events::ServerEvent;
use crate::rooms::{Room, RoomRegistry, MIN_PLAYERS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("not your turn")]
    NotYourTurn,
    #[error("tile is not in your hand")]
    TileNotInHand,
    #[error("tile does not match an open end")]
    IllegalTile,
    #[error("cannot pass while the side deck is not empty")]
    SideDeckNotEmpty,
    #[error("no game in progress in room '{0}'")]
    NoGame(String),
    #[error("game already running in room '{0}'")]
    AlreadyRunning(String),
    #[error("room '{0}' not found")]
    RoomNotFound(String),
    #[error("only the room owner can start the game")]
    NotOwner,
    #[error("need at least {MIN_PLAYERS} players to start")]
    NotEnoughPlayers,
}

#[derive(Debug, Clone)]
pub struct Seat {
    pub username: String,
    pub is_active: bool,
    pub passed_this_round: bool,
}

/// Live state of one game. Seat order is the turn order, snapshotted from
/// the room's player list when the game starts.
#[derive(Debug)]
pub struct GameSession {
    pub room_name: String,
    pub seats: Vec<Seat>,
    pub current_turn_index: usize,
    pub table_tiles: Vec<Tile>,
    pub side_deck_count: usize,
    pub hands: HashMap<String, Vec<Tile>>,
    pub round_scores: BTreeMap<String, u32>,
    pub total_scores: BTreeMap<String, u32>,
    pub consecutive_passes: usize,
    pub round: u32,
    pub round_finished: bool,
    pub winner: Option<String>,
}

impl GameSession {
    /// Deal a fresh game: full shuffled set, 7 tiles per player in turn
    /// order, remainder to the side deck, first player active.
    fn deal(room_name: &str, players: &[String]) -> Self {
        let mut session = GameSession {
            room_name: room_name.to_string(),
            seats: players
                .iter()
                .map(|p| Seat {
                    username: p.clone(),
                    is_active: false,
                    passed_this_round: false,
                })
                .collect(),
            current_turn_index: 0,
            table_tiles: Vec::new(),
            side_deck_count: 0,
            hands: HashMap::new(),
            round_scores: players.iter().map(|p| (p.clone(), 0)).collect(),
            total_scores: players.iter().map(|p| (p.clone(), 0)).collect(),
            consecutive_passes: 0,
            round: 0,
            round_finished: false,
            winner: None,
        };
        session.deal_round(0);
        session
    }

    /// (Re)deal one round, preserving total scores. `lead` is the seat that
    /// acts first this round.
    fn deal_round(&mut self, lead: usize) {
        let mut set = TileSet::standard_shuffled();
        for seat in &self.seats {
            self.hands.insert(seat.username.clone(), set.draw(HAND_SIZE));
        }
        self.side_deck_count = set.remaining();
        self.table_tiles.clear();
        self.consecutive_passes = 0;
        self.round += 1;
        self.round_finished = false;
        for (i, seat) in self.seats.iter_mut().enumerate() {
            seat.is_active = i == lead;
            seat.passed_this_round = false;
        }
        self.current_turn_index = lead;
        for score in self.round_scores.values_mut() {
            *score = 0;
        }
    }

    pub fn current_player(&self) -> &str {
        &self.seats[self.current_turn_index].username
    }

    fn advance_turn(&mut self) {
        self.seats[self.current_turn_index].is_active = false;
        self.current_turn_index = (self.current_turn_index + 1) % self.seats.len();
        self.seats[self.current_turn_index].is_active = true;
    }

    /// Attach the tile to the chain on the end the rules picked, flipping it
    /// so touching pips meet. An empty table takes the tile as sent.
    fn place_on_table(&mut self, tile: Tile, end: TileEnd) {
        match end {
            TileEnd::Right | TileEnd::Both if !self.table_tiles.is_empty() => {
                let right_end = self.table_tiles[self.table_tiles.len() - 1].right_value;
                let oriented = if tile.left_value == right_end {
                    tile
                } else {
                    tile.flipped()
                };
                self.table_tiles.push(oriented);
            }
            TileEnd::Left => {
                let left_end = self.table_tiles[0].left_value;
                let oriented = if tile.right_value == left_end {
                    tile
                } else {
                    tile.flipped()
                };
                self.table_tiles.insert(0, oriented);
            }
            _ => self.table_tiles.push(tile),
        }
    }

    fn play_tile(&mut self, username: &str, tile: Tile, rules: &dyn Rules) -> Result<(), GameError> {
        if !self.current_player().eq_ignore_ascii_case(username) {
            return Err(GameError::NotYourTurn);
        }
        let current = self.current_player().to_string();
        let hand = self
            .hands
            .get_mut(&current)
            .ok_or(GameError::TileNotInHand)?;
        // hand removal is by exact instance, matching is symmetric
        let pos = hand
            .iter()
            .position(|t| *t == tile)
            .ok_or(GameError::TileNotInHand)?;
        if !rules.is_legal(tile, &self.table_tiles) {
            return Err(GameError::IllegalTile);
        }
        let end = rules.playable_end(tile, &self.table_tiles);
        hand.remove(pos);
        let went_out = hand.is_empty();
        self.place_on_table(tile, end);
        self.consecutive_passes = 0;
        if went_out {
            // the player went out; the turn pointer stays on them
            self.round_finished = true;
        } else {
            self.advance_turn();
        }
        Ok(())
    }

    fn pass(&mut self, username: &str, rules: &dyn Rules) -> Result<(), GameError> {
        if !self.current_player().eq_ignore_ascii_case(username) {
            return Err(GameError::NotYourTurn);
        }
        if !rules.can_pass(self.side_deck_count) {
            return Err(GameError::SideDeckNotEmpty);
        }
        self.seats[self.current_turn_index].passed_this_round = true;
        self.consecutive_passes += 1;
        if self.consecutive_passes >= self.seats.len() {
            // a full lap of passes ends the round with nobody out
            self.round_finished = true;
        } else {
            self.advance_turn();
        }
        Ok(())
    }

    /// Tally the finished round into the totals and either crown a winner or
    /// redeal. The winner is the strictly highest total at or above the
    /// threshold; ties break to the earliest seat in turn order.
    fn settle_round(&mut self, rules: &dyn Rules, winning_score: u32) {
        for seat in &self.seats {
            let points = self
                .hands
                .get(&seat.username)
                .map(|hand| rules.round_points(hand))
                .unwrap_or(0);
            self.round_scores.insert(seat.username.clone(), points);
            if let Some(total) = self.total_scores.get_mut(&seat.username) {
                *total += points;
            }
        }

        let mut winner: Option<(String, u32)> = None;
        for seat in &self.seats {
            let total = self.total_scores.get(&seat.username).copied().unwrap_or(0);
            if total >= winning_score && winner.as_ref().map_or(true, |(_, best)| total > *best) {
                winner = Some((seat.username.clone(), total));
            }
        }

        match winner {
            Some((username, total)) => {
                info!(room = %self.room_name, winner = %username, total, "game finished");
                self.winner = Some(username);
            }
            None => {
                let lead = self.round as usize % self.seats.len();
                debug!(room = %self.room_name, round = self.round + 1, "redealing next round");
                self.deal_round(lead);
            }
        }
    }

    /// Per-viewer snapshot: the viewer's own hand in full, everyone else's
    /// redacted to a count. `None` viewer (a watcher) gets no hand at all.
    pub fn snapshot_for(&self, viewer: Option<&str>) -> GameSnapshot {
        GameSnapshot {
            room_name: self.room_name.clone(),
            players: self
                .seats
                .iter()
                .map(|seat| SeatView {
                    username: seat.username.clone(),
                    tiles_in_hand: self.hands.get(&seat.username).map_or(0, Vec::len),
                    is_active: seat.is_active,
                    passed_this_round: seat.passed_this_round,
                })
                .collect(),
            current_turn_index: self.current_turn_index,
            table_tiles: self.table_tiles.clone(),
            side_deck_count: self.side_deck_count,
            your_hand: viewer.and_then(|v| self.hands.get(v).cloned()),
            round_scores: self.round_scores.clone(),
            total_scores: self.total_scores.clone(),
            round_finished: self.round_finished,
            winner: self.winner.clone(),
        }
    }
}

/// Drives the per-room state machine. Sessions are keyed by room name and
/// each sits behind its own lock, so moves in different rooms never contend;
/// two actions in the same room serialize on the session lock.
pub struct GameOrchestrator {
    games: Mutex<HashMap<String, Arc<Mutex<GameSession>>>>,
    rooms: Arc<RoomRegistry>,
    dispatcher: BroadcastDispatcher,
    rules: Arc<dyn Rules>,
    archiver: ResultArchiver,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl GameOrchestrator {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        dispatcher: BroadcastDispatcher,
        rules: Arc<dyn Rules>,
        archiver: ResultArchiver,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        GameOrchestrator {
            games: Mutex::new(HashMap::new()),
            rooms,
            dispatcher,
            rules,
            archiver,
            events,
        }
    }

    fn session_handle(&self, room_name: &str) -> Option<Arc<Mutex<GameSession>>> {
        self.games
            .lock()
            .get(&room_name.trim().to_lowercase())
            .cloned()
    }

    /// Start a game in a Waiting (or Finished) room with at least two
    /// players. Used both by the auto-start path and the owner command.
    pub fn start_game(&self, room_name: &str) -> Result<(), GameError> {
        let room = self
            .rooms
            .get(room_name)
            .ok_or_else(|| GameError::RoomNotFound(room_name.to_string()))?;
        if room.players.len() < MIN_PLAYERS {
            return Err(GameError::NotEnoughPlayers);
        }
        let key = room.name.to_lowercase();
        let handle = {
            let mut games = self.games.lock();
            if games.contains_key(&key) {
                return Err(GameError::AlreadyRunning(room.name.clone()));
            }
            let session = GameSession::deal(&room.name, &room.players);
            let handle = Arc::new(Mutex::new(session));
            games.insert(key, handle.clone());
            handle
        };
        self.rooms.set_status(&room.name, RoomStatus::Playing);
        info!(
            room = %room.name,
            players = room.players.len(),
            "game started"
        );

        self.dispatcher
            .push_to_room(&room, Message::ok(Action::GameStarted).in_room(&room.name));
        let views = {
            let session = handle.lock();
            self.dispatcher.snapshot_views(&room, &session)
        };
        self.dispatcher.deliver(views);
        Ok(())
    }

    /// Explicit START_GAME request; only the room owner may issue it.
    pub fn start_requested(&self, room_name: &str, username: &str) -> Result<(), GameError> {
        let room = self
            .rooms
            .get(room_name)
            .ok_or_else(|| GameError::RoomNotFound(room_name.to_string()))?;
        if !room.owner.eq_ignore_ascii_case(username) {
            return Err(GameError::NotOwner);
        }
        self.start_game(&room.name)
    }

    pub fn play(&self, username: &str, room_name: &str, tile: Tile) -> Result<(), GameError> {
        self.apply(room_name, |session, rules| {
            session.play_tile(username, tile, rules)
        })
    }

    pub fn pass(&self, username: &str, room_name: &str) -> Result<(), GameError> {
        self.apply(room_name, |session, rules| session.pass(username, rules))
    }

    /// Run one validated mutation under the room's game lock, settle the
    /// round if it just finished, snapshot for every viewer, then release the
    /// lock before any fan-out I/O.
    fn apply<F>(&self, room_name: &str, mutate: F) -> Result<(), GameError>
    where
        F: FnOnce(&mut GameSession, &dyn Rules) -> Result<(), GameError>,
    {
        let room = self
            .rooms
            .get(room_name)
            .ok_or_else(|| GameError::RoomNotFound(room_name.to_string()))?;
        let handle = self
            .session_handle(&room.name)
            .ok_or_else(|| GameError::NoGame(room.name.clone()))?;

        let (views, finished) = {
            let mut session = handle.lock();
            mutate(&mut session, self.rules.as_ref())?;
            if session.round_finished {
                session.settle_round(self.rules.as_ref(), room.winning_score);
            }
            let finished = session.winner.clone().map(|winner| MatchResult {
                room_name: session.room_name.clone(),
                scores: session
                    .seats
                    .iter()
                    .map(|s| {
                        let total = session.total_scores.get(&s.username).copied().unwrap_or(0);
                        (s.username.clone(), total)
                    })
                    .collect(),
                winner,
                finished_at: Local::now(),
                max_players: room.max_players,
                winning_score: room.winning_score,
            });
            (self.dispatcher.snapshot_views(&room, &session), finished)
        };
        self.dispatcher.deliver(views);

        if let Some(result) = finished {
            self.end_game(&room, result);
        }
        Ok(())
    }

    /// Terminal transition: drop the in-memory session, mark the room
    /// Finished (the room survives for a future game), archive the result
    /// exactly once, and announce the outcome.
    fn end_game(&self, room: &Room, result: MatchResult) {
        self.games.lock().remove(&room.name.to_lowercase());
        self.rooms.set_status(&room.name, RoomStatus::Finished);

        let notice = GameEndedNotice {
            winner: result.winner.clone(),
            total_scores: result.scores.iter().cloned().collect(),
        };
        let _ = self.events.send(ServerEvent::GameEnded {
            room: room.name.clone(),
            notice,
        });

        // archived exactly once, after every lock is released; a failed
        // write must not disturb the in-memory state
        if let Err(error) = self.archiver.archive(&result) {
            warn!(room = %result.room_name, %error, "failed to archive game result");
        }
    }

    pub fn is_active(&self, room_name: &str) -> bool {
        self.session_handle(room_name).is_some()
    }

    /// Redacted snapshot for a viewer outside the turn flow (e.g. a watcher
    /// who just joined).
    pub fn snapshot_for(&self, room_name: &str, viewer: Option<&str>) -> Option<GameSnapshot> {
        let handle = self.session_handle(room_name)?;
        let session = handle.lock();
        Some(session.snapshot_for(viewer))
    }

    /// A player left mid-game. No automatic forfeit; the game waits on their
    /// turn indefinitely.
    pub fn note_departure(&self, room_name: &str, username: &str) {
        if self.is_active(room_name) {
            warn!(room = %room_name, %username, "player left during game; game continues");
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self, room_name: &str) -> Option<Arc<Mutex<GameSession>>> {
        self.session_handle(room_name)
    }
}
