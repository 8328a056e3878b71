use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Highest pip value on a tile face.
pub const MAX_PIP: u8 = 6;
/// Tiles in a full double-six set.
pub const TILE_SET_SIZE: usize = 28;
/// Tiles dealt to each player at the start of a round.
pub const HAND_SIZE: usize = 7;

/// ---- Tiles ----

/// A single domino tile. Matching against the table is symmetric, but a
/// tile is removed from a hand by exact `(left, right)` equality as the
/// client sent it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub left_value: u8,
    pub right_value: u8,
}

impl Tile {
    pub fn new(left: u8, right: u8) -> Self {
        Tile {
            left_value: left,
            right_value: right,
        }
    }

    /// Pip sum, used for round scoring.
    pub fn value(&self) -> u32 {
        self.left_value as u32 + self.right_value as u32
    }

    pub fn has_pip(&self, pip: u8) -> bool {
        self.left_value == pip || self.right_value == pip
    }

    pub fn flipped(&self) -> Tile {
        Tile {
            left_value: self.right_value,
            right_value: self.left_value,
        }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}|{}]", self.left_value, self.right_value)
    }
}

/// A shuffled double-six tile set to deal from.
#[derive(Debug, Clone)]
pub struct TileSet {
    tiles: Vec<Tile>,
}

impl TileSet {
    pub fn standard_shuffled() -> Self {
        let mut tiles = Vec::with_capacity(TILE_SET_SIZE);
        for a in 0..=MAX_PIP {
            for b in a..=MAX_PIP {
                tiles.push(Tile::new(a, b));
            }
        }
        tiles.shuffle(&mut thread_rng());
        TileSet { tiles }
    }

    /// Draw up to `count` tiles from the top of the set.
    pub fn draw(&mut self, count: usize) -> Vec<Tile> {
        let take = count.min(self.tiles.len());
        self.tiles.split_off(self.tiles.len() - take)
    }

    pub fn remaining(&self) -> usize {
        self.tiles.len()
    }
}

/// ---- Rules capability ----

/// Which open end of the table chain a tile can attach to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TileEnd {
    Left,
    Right,
    Both,
    None,
}

/// Pluggable legality and scoring rules. The orchestrator calls these and
/// assumes nothing beyond this contract, so rule variants can be swapped in.
pub trait Rules: Send + Sync {
    /// True if the table is empty or the tile touches either open end.
    fn is_legal(&self, tile: Tile, table: &[Tile]) -> bool;

    /// Passing is only permitted once the side deck is exhausted.
    fn can_pass(&self, side_deck_count: usize) -> bool;

    /// Points for the tiles left in a hand at round end.
    fn round_points(&self, hand: &[Tile]) -> u32;

    /// Which end(s) of the chain the tile may attach to.
    fn playable_end(&self, tile: Tile, table: &[Tile]) -> TileEnd;
}

/// The standard block-domino rules shipped with the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl Rules for StandardRules {
    fn is_legal(&self, tile: Tile, table: &[Tile]) -> bool {
        self.playable_end(tile, table) != TileEnd::None
    }

    fn can_pass(&self, side_deck_count: usize) -> bool {
        side_deck_count == 0
    }

    fn round_points(&self, hand: &[Tile]) -> u32 {
        hand.iter().map(Tile::value).sum()
    }

    fn playable_end(&self, tile: Tile, table: &[Tile]) -> TileEnd {
        let (first, last) = match (table.first(), table.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return TileEnd::Both,
        };
        let left_end = first.left_value;
        let right_end = last.right_value;
        match (tile.has_pip(left_end), tile.has_pip(right_end)) {
            (true, true) => TileEnd::Both,
            (true, false) => TileEnd::Left,
            (false, true) => TileEnd::Right,
            (false, false) => TileEnd::None,
        }
    }
}

/// ---- Rooms ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::Waiting => write!(f, "Waiting"),
            RoomStatus::Playing => write!(f, "Playing"),
            RoomStatus::Finished => write!(f, "Finished"),
        }
    }
}

/// Room summary as pushed to every client in the ROOM_LIST broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub name: String,
    pub owner: String,
    pub max_players: usize,
    pub winning_score: u32,
    pub status: RoomStatus,
    pub players: Vec<String>,
    pub watchers: Vec<String>,
}

/// ---- Wire protocol ----

/// Every action a frame can carry, in both directions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    // requests
    Login,
    Logout,
    CreateRoom,
    JoinRoom,
    WatchRoom,
    LeaveRoom,
    StartGame,
    PlayCard,
    Pass,
    // server pushes
    PlayerList,
    RoomList,
    GameState,
    GameStarted,
    GameEnded,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the wire spelling, e.g. CREATE_ROOM
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One newline-delimited JSON frame. Responses echo the request action with
/// `success`/`errorMessage`; unsolicited pushes always carry `success = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub action: Action,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn default_success() -> bool {
    true
}

impl Message {
    pub fn new(action: Action) -> Self {
        Message {
            action,
            username: String::new(),
            room_name: None,
            data: None,
            timestamp: Utc::now(),
            success: true,
            error_message: None,
        }
    }

    pub fn request(action: Action, username: &str) -> Self {
        Message {
            username: username.to_string(),
            ..Message::new(action)
        }
    }

    /// Success response echoing the request action.
    pub fn ok(action: Action) -> Self {
        Message::new(action)
    }

    /// Failure response echoing the request action.
    pub fn err(action: Action, reason: impl fmt::Display) -> Self {
        Message {
            success: false,
            error_message: Some(reason.to_string()),
            ..Message::new(action)
        }
    }

    pub fn in_room(mut self, room_name: &str) -> Self {
        self.room_name = Some(room_name.to_string());
        self
    }

    /// Attach a JSON-encoded payload to `data`.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> serde_json::Result<Self> {
        self.data = Some(serde_json::to_string(payload)?);
        Ok(self)
    }

    /// Decode the `data` payload; a missing payload decodes as JSON `null`.
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.data.as_deref().unwrap_or("null"))
    }
}

/// ---- Payload DTOs ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_name: String,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default = "default_winning_score")]
    pub winning_score: u32,
}

fn default_max_players() -> usize {
    2
}

fn default_winning_score() -> u32 {
    100
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayTileRequest {
    pub left_value: u8,
    pub right_value: u8,
}

impl From<PlayTileRequest> for Tile {
    fn from(req: PlayTileRequest) -> Tile {
        Tile::new(req.left_value, req.right_value)
    }
}

/// One seat as every participant sees it: hand redacted to a count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub username: String,
    pub tiles_in_hand: usize,
    pub is_active: bool,
    pub passed_this_round: bool,
}

/// Per-viewer game snapshot. `your_hand` is the viewer's own tiles in full;
/// watchers get `None`. Everything else is shared verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub room_name: String,
    pub players: Vec<SeatView>,
    pub current_turn_index: usize,
    pub table_tiles: Vec<Tile>,
    pub side_deck_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_hand: Option<Vec<Tile>>,
    pub round_scores: BTreeMap<String, u32>,
    pub total_scores: BTreeMap<String, u32>,
    pub round_finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedNotice {
    pub winner: String,
    pub total_scores: BTreeMap<String, u32>,
}
