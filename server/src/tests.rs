use std::fs;
use std::sync::Arc;

use dominet_protocol::{
    Action, GameSnapshot, Message, RoomStatus, Rules, StandardRules, Tile, TILE_SET_SIZE,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::archive::ResultArchiver;
use crate::broadcast::BroadcastDispatcher;
use crate::events::{self, ServerEvent};
use crate::game::{GameError, GameOrchestrator, GameSession};
use crate::rooms::{RoomError, RoomRegistry};
use crate::session::{LoginError, SessionRegistry};

struct TestServer {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    games: Arc<GameOrchestrator>,
    results: tempfile::TempDir,
}

/// Fully wired server state minus the TCP front end. The event receiver is
/// handed back so tests can either inspect events or feed them to the
/// dispatcher task.
fn server() -> (TestServer, mpsc::UnboundedReceiver<ServerEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let results = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionRegistry::new(event_tx.clone()));
    let rooms = Arc::new(RoomRegistry::new(event_tx.clone()));
    let games = Arc::new(GameOrchestrator::new(
        rooms.clone(),
        BroadcastDispatcher::new(sessions.clone()),
        Arc::new(StandardRules),
        ResultArchiver::new(results.path()).unwrap(),
        event_tx,
    ));
    (
        TestServer {
            sessions,
            rooms,
            games,
            results,
        },
        event_rx,
    )
}

fn connect(srv: &TestServer, name: &str) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = srv.sessions.register(tx);
    srv.sessions.login(id, name).unwrap();
    (id, rx)
}

/// Alice owns room "t1" with capacity 2, Bob joins, game started. Returns
/// both players' outbound receivers.
fn started_two_player_game(
    srv: &TestServer,
) -> (
    mpsc::UnboundedReceiver<Message>,
    mpsc::UnboundedReceiver<Message>,
) {
    let (_, alice_rx) = connect(srv, "Alice");
    let (_, bob_rx) = connect(srv, "Bob");
    srv.rooms.create("t1", "Alice", 2, 100).unwrap();
    srv.rooms.join("t1", "Bob").unwrap();
    srv.games.start_game("t1").unwrap();
    (alice_rx, bob_rx)
}

fn set_hand(srv: &TestServer, room: &str, player: &str, tiles: Vec<Tile>) {
    let handle = srv.games.session(room).unwrap();
    handle.lock().hands.insert(player.to_string(), tiles);
}

fn set_total(srv: &TestServer, room: &str, player: &str, total: u32) {
    let handle = srv.games.session(room).unwrap();
    handle.lock().total_scores.insert(player.to_string(), total);
}

fn set_side_deck(srv: &TestServer, room: &str, count: usize) {
    let handle = srv.games.session(room).unwrap();
    handle.lock().side_deck_count = count;
}

fn tiles_on_record(session: &GameSession) -> usize {
    session.hands.values().map(Vec::len).sum::<usize>()
        + session.side_deck_count
        + session.table_tiles.len()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

mod login {
    use super::*;

    #[test]
    fn username_uniqueness_is_case_insensitive() {
        let (srv, _rx) = server();
        let (_, _a) = connect(&srv, "Alice");
        let (tx, _b) = mpsc::unbounded_channel();
        let id = srv.sessions.register(tx);
        assert_eq!(srv.sessions.login(id, "ALICE"), Err(LoginError::DuplicateName));
        assert_eq!(srv.sessions.login(id, "alice "), Err(LoginError::DuplicateName));
        assert_eq!(srv.sessions.login(id, "Bob"), Ok(()));
    }

    #[test]
    fn empty_username_is_rejected() {
        let (srv, _rx) = server();
        let (tx, _out) = mpsc::unbounded_channel();
        let id = srv.sessions.register(tx);
        assert_eq!(srv.sessions.login(id, "   "), Err(LoginError::EmptyName));
    }

    #[test]
    fn connection_cannot_log_in_twice() {
        let (srv, _rx) = server();
        let (id, _out) = connect(&srv, "Alice");
        assert_eq!(srv.sessions.login(id, "Bob"), Err(LoginError::AlreadyLoggedIn));
    }

    #[test]
    fn logout_frees_the_name_for_others() {
        let (srv, _rx) = server();
        let (id, _out) = connect(&srv, "Alice");
        assert_eq!(srv.sessions.logout(id), Some("Alice".to_string()));
        let (tx, _b) = mpsc::unbounded_channel();
        let other = srv.sessions.register(tx);
        assert_eq!(srv.sessions.login(other, "alice"), Ok(()));
        // the logged-out connection itself is still usable
        assert_eq!(srv.sessions.login(id, "Alice2"), Ok(()));
    }

    #[test]
    fn disconnect_frees_the_name() {
        let (srv, _rx) = server();
        let (id, _out) = connect(&srv, "Alice");
        assert_eq!(srv.sessions.unregister(id), Some("Alice".to_string()));
        assert!(srv.sessions.player_list().is_empty());
    }

    #[test]
    fn player_list_is_sorted() {
        let (srv, _rx) = server();
        connect(&srv, "zoe");
        connect(&srv, "adam");
        connect(&srv, "mia");
        assert_eq!(srv.sessions.player_list(), vec!["adam", "mia", "zoe"]);
    }
}

mod rooms {
    use super::*;

    #[test]
    fn room_names_are_unique_case_insensitively() {
        let (srv, _rx) = server();
        srv.rooms.create("Table", "Alice", 2, 100).unwrap();
        assert_eq!(
            srv.rooms.create("TABLE", "Bob", 2, 100),
            Err(RoomError::AlreadyExists("TABLE".to_string()))
        );
    }

    #[test]
    fn a_user_occupies_at_most_one_room() {
        let (srv, _rx) = server();
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        srv.rooms.create("t2", "Bob", 2, 100).unwrap();
        assert_eq!(
            srv.rooms.join("t2", "Alice"),
            Err(RoomError::AlreadyInRoom("Alice".to_string()))
        );
        assert_eq!(
            srv.rooms.create("t3", "alice", 2, 100),
            Err(RoomError::AlreadyInRoom("alice".to_string()))
        );
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let (srv, _rx) = server();
        assert!(matches!(
            srv.rooms.create("t1", "Alice", 1, 100),
            Err(RoomError::InvalidConfig(_))
        ));
        assert!(matches!(
            srv.rooms.create("t1", "Alice", 5, 100),
            Err(RoomError::InvalidConfig(_))
        ));
        assert!(matches!(
            srv.rooms.create("t1", "Alice", 2, 0),
            Err(RoomError::InvalidConfig(_))
        ));
        assert!(matches!(
            srv.rooms.create("   ", "Alice", 2, 100),
            Err(RoomError::InvalidConfig(_))
        ));
    }

    #[test]
    fn join_respects_capacity() {
        let (srv, _rx) = server();
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();
        assert_eq!(
            srv.rooms.join("t1", "Carol"),
            Err(RoomError::RoomFull("t1".to_string()))
        );
        assert_eq!(srv.rooms.get("t1").unwrap().players.len(), 2);
    }

    #[test]
    fn join_rejected_once_the_game_is_running() {
        let (srv, _rx) = server();
        connect(&srv, "Alice");
        connect(&srv, "Bob");
        srv.rooms.create("t1", "Alice", 3, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();
        srv.games.start_game("t1").unwrap();
        assert_eq!(
            srv.rooms.join("t1", "Carol"),
            Err(RoomError::GameInProgress("t1".to_string()))
        );
    }

    #[test]
    fn watch_is_only_allowed_while_playing() {
        let (srv, _rx) = server();
        connect(&srv, "Alice");
        connect(&srv, "Bob");
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        assert_eq!(
            srv.rooms.watch("t1", "Eve"),
            Err(RoomError::NotPlaying("t1".to_string()))
        );
        srv.rooms.join("t1", "Bob").unwrap();
        srv.games.start_game("t1").unwrap();
        srv.rooms.watch("t1", "Eve").unwrap();
        assert_eq!(srv.rooms.get("t1").unwrap().watchers, vec!["Eve"]);
    }

    #[test]
    fn owner_leaving_deletes_the_room_and_frees_everyone() {
        let (srv, _rx) = server();
        srv.rooms.create("t1", "Alice", 3, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();

        let outcome = srv.rooms.leave("Alice").unwrap();
        assert!(outcome.room_deleted);
        assert!(srv.rooms.get("t1").is_none());
        // Bob's occupancy was released with the room
        srv.rooms.create("t2", "Bob", 2, 100).unwrap();
    }

    #[test]
    fn non_owner_leaving_keeps_the_room() {
        let (srv, _rx) = server();
        srv.rooms.create("t1", "Alice", 3, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();

        let outcome = srv.rooms.leave("Bob").unwrap();
        assert!(!outcome.room_deleted);
        assert_eq!(srv.rooms.get("t1").unwrap().players, vec!["Alice"]);
    }

    #[test]
    fn leave_is_idempotent() {
        let (srv, _rx) = server();
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        assert!(srv.rooms.leave("Alice").is_some());
        assert!(srv.rooms.leave("Alice").is_none());
    }

    #[test]
    fn leaving_mid_game_keeps_the_room_and_the_game() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);

        let outcome = srv.rooms.leave("Bob").unwrap();
        assert!(outcome.mid_game);
        assert!(!outcome.room_deleted);
        let room = srv.rooms.get("t1").unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(srv.games.is_active("t1"));
    }

    #[test]
    fn a_mid_game_departure_is_announced_exactly_once() {
        let (srv, mut event_rx) = server();
        started_two_player_game(&srv);

        srv.rooms.leave("Bob").unwrap();

        let mut departures = 0;
        while let Ok(event) = event_rx.try_recv() {
            if let ServerEvent::PlayerLeftRoom {
                username, mid_game, ..
            } = event
            {
                assert_eq!(username, "Bob");
                assert!(mid_game);
                departures += 1;
            }
        }
        assert_eq!(departures, 1);
    }
}

mod game_flow {
    use super::*;

    #[test]
    fn deal_gives_seven_tiles_each_and_a_side_deck() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);

        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert_eq!(session.round, 1);
        assert_eq!(session.hands["Alice"].len(), 7);
        assert_eq!(session.hands["Bob"].len(), 7);
        assert_eq!(session.side_deck_count, 14);
        assert!(session.table_tiles.is_empty());
        assert_eq!(session.current_player(), "Alice");
        assert_eq!(tiles_on_record(&session), TILE_SET_SIZE);
        assert_eq!(srv.rooms.get("t1").unwrap().status, RoomStatus::Playing);
    }

    #[test]
    fn starting_needs_two_players() {
        let (srv, _rx) = server();
        connect(&srv, "Alice");
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        assert_eq!(srv.games.start_game("t1"), Err(GameError::NotEnoughPlayers));
    }

    #[test]
    fn only_the_owner_may_start_explicitly() {
        let (srv, _rx) = server();
        connect(&srv, "Alice");
        connect(&srv, "Bob");
        srv.rooms.create("t1", "Alice", 3, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();
        assert_eq!(
            srv.games.start_requested("t1", "Bob"),
            Err(GameError::NotOwner)
        );
        assert_eq!(srv.games.start_requested("t1", "alice"), Ok(()));
    }

    #[test]
    fn a_room_hosts_at_most_one_game() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        assert_eq!(
            srv.games.start_game("t1"),
            Err(GameError::AlreadyRunning("t1".to_string()))
        );
    }

    #[test]
    fn acting_without_a_game_fails() {
        let (srv, _rx) = server();
        connect(&srv, "Alice");
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        assert_eq!(
            srv.games.pass("Alice", "t1"),
            Err(GameError::NoGame("t1".to_string()))
        );
        assert_eq!(
            srv.games.play("Alice", "nowhere", Tile::new(3, 5)),
            Err(GameError::RoomNotFound("nowhere".to_string()))
        );
    }

    #[test]
    fn first_tile_lands_on_the_empty_table() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(3, 5), Tile::new(0, 1)]);

        srv.games.play("Alice", "t1", Tile::new(3, 5)).unwrap();

        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert_eq!(session.table_tiles, vec![Tile::new(3, 5)]);
        assert_eq!(session.hands["Alice"], vec![Tile::new(0, 1)]);
        assert_eq!(session.current_player(), "Bob");
        assert!(!session.round_finished);
    }

    #[test]
    fn playing_out_of_turn_changes_nothing() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        let bob_tile = {
            let handle = srv.games.session("t1").unwrap();
            let session = handle.lock();
            session.hands["Bob"][0]
        };

        assert_eq!(
            srv.games.play("Bob", "t1", bob_tile),
            Err(GameError::NotYourTurn)
        );

        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert!(session.table_tiles.is_empty());
        assert_eq!(session.hands["Bob"].len(), 7);
        assert_eq!(session.current_player(), "Alice");
    }

    #[test]
    fn tile_must_come_from_the_hand() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(1, 2)]);
        assert_eq!(
            srv.games.play("Alice", "t1", Tile::new(6, 6)),
            Err(GameError::TileNotInHand)
        );
    }

    #[test]
    fn tile_must_match_an_open_end() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        {
            let handle = srv.games.session("t1").unwrap();
            handle.lock().table_tiles = vec![Tile::new(2, 4)];
        }
        set_hand(&srv, "t1", "Alice", vec![Tile::new(5, 5), Tile::new(1, 1)]);

        assert_eq!(
            srv.games.play("Alice", "t1", Tile::new(5, 5)),
            Err(GameError::IllegalTile)
        );

        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert_eq!(session.hands["Alice"].len(), 2);
        assert_eq!(session.table_tiles.len(), 1);
        assert_eq!(session.current_player(), "Alice");
    }

    #[test]
    fn tiles_are_flipped_to_meet_the_chain() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        {
            let handle = srv.games.session("t1").unwrap();
            handle.lock().table_tiles = vec![Tile::new(2, 4)];
        }
        set_hand(&srv, "t1", "Alice", vec![Tile::new(6, 4), Tile::new(0, 0)]);
        set_hand(&srv, "t1", "Bob", vec![Tile::new(5, 2), Tile::new(0, 1)]);

        // (6,4) touches the right end 4, so it goes down flipped
        srv.games.play("Alice", "t1", Tile::new(6, 4)).unwrap();
        // (5,2) touches the left end 2 as sent
        srv.games.play("Bob", "t1", Tile::new(5, 2)).unwrap();

        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert_eq!(
            session.table_tiles,
            vec![Tile::new(5, 2), Tile::new(2, 4), Tile::new(4, 6)]
        );
    }

    #[test]
    fn passing_needs_an_empty_side_deck() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        assert_eq!(
            srv.games.pass("Alice", "t1"),
            Err(GameError::SideDeckNotEmpty)
        );
        set_side_deck(&srv, "t1", 0);
        assert_eq!(srv.games.pass("Alice", "t1"), Ok(()));
    }

    #[test]
    fn tile_conservation_holds_through_play() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        let handle = srv.games.session("t1").unwrap();

        for _ in 0..100 {
            if !srv.games.is_active("t1") {
                break;
            }
            let (player, choice, may_pass) = {
                let session = handle.lock();
                let player = session.current_player().to_string();
                let choice = session.hands[&player]
                    .iter()
                    .copied()
                    .find(|t| StandardRules.is_legal(*t, &session.table_tiles));
                (player, choice, session.side_deck_count == 0)
            };
            match choice {
                Some(tile) => srv.games.play(&player, "t1", tile).unwrap(),
                None if may_pass => srv.games.pass(&player, "t1").unwrap(),
                // blocked with a non-empty side deck; the game stalls here
                None => break,
            }
            if srv.games.is_active("t1") {
                assert_eq!(tiles_on_record(&handle.lock()), TILE_SET_SIZE);
            }
        }
    }

    #[test]
    fn a_full_lap_of_passes_ends_the_round() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_side_deck(&srv, "t1", 0);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(1, 2)]);
        set_hand(&srv, "t1", "Bob", vec![Tile::new(4, 6)]);

        srv.games.pass("Alice", "t1").unwrap();
        srv.games.pass("Bob", "t1").unwrap();

        // nobody reached 100, so the next round was dealt with Bob leading
        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert_eq!(session.round, 2);
        assert_eq!(session.total_scores["Alice"], 3);
        assert_eq!(session.total_scores["Bob"], 10);
        assert_eq!(session.hands["Alice"].len(), 7);
        assert_eq!(session.hands["Bob"].len(), 7);
        assert!(session.table_tiles.is_empty());
        assert!(!session.round_finished);
        assert_eq!(session.current_player(), "Bob");
        assert_eq!(session.round_scores["Alice"], 0);
    }

    #[test]
    fn going_out_ends_the_round_and_scores_the_others() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(3, 5)]);
        set_hand(&srv, "t1", "Bob", vec![Tile::new(2, 2), Tile::new(6, 1)]);

        srv.games.play("Alice", "t1", Tile::new(3, 5)).unwrap();

        let handle = srv.games.session("t1").unwrap();
        let session = handle.lock();
        assert_eq!(session.round, 2);
        assert_eq!(session.total_scores["Alice"], 0);
        assert_eq!(session.total_scores["Bob"], 11);
        assert!(srv.games.is_active("t1"));
    }

    #[test]
    fn crossing_the_threshold_finishes_the_game() {
        let (srv, mut event_rx) = server();
        let (mut alice_rx, _bob_rx) = started_two_player_game(&srv);
        set_total(&srv, "t1", "Bob", 95);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(3, 5)]);
        set_hand(&srv, "t1", "Bob", vec![Tile::new(6, 6), Tile::new(5, 4)]);

        srv.games.play("Alice", "t1", Tile::new(3, 5)).unwrap();

        // Bob's leftover pips push him to 116 and past the limit
        assert!(!srv.games.is_active("t1"));
        assert_eq!(srv.rooms.get("t1").unwrap().status, RoomStatus::Finished);

        let mut ended = None;
        while let Ok(event) = event_rx.try_recv() {
            if let ServerEvent::GameEnded { room, notice } = event {
                ended = Some((room, notice));
            }
        }
        let (room, notice) = ended.expect("game end event");
        assert_eq!(room, "t1");
        assert_eq!(notice.winner, "Bob");
        assert_eq!(notice.total_scores["Bob"], 116);
        assert_eq!(notice.total_scores["Alice"], 0);

        // exactly one result file, with the final standings
        let files: Vec<_> = fs::read_dir(srv.results.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let contents = fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("Room_Name = \"t1\""));
        assert!(contents.contains("Winner = \"Bob\""));
        assert!(contents.contains("Player Name = \"Bob\", Player Points = 116"));
        assert!(contents.contains("Winning Score Limit = 100"));

        // the final snapshot announced the winner before the teardown
        let last_state = drain(&mut alice_rx)
            .into_iter()
            .filter(|m| m.action == Action::GameState)
            .last()
            .unwrap();
        let snapshot: GameSnapshot = last_state.payload().unwrap();
        assert_eq!(snapshot.winner.as_deref(), Some("Bob"));

        // moves after the end hit a missing game, not stale state
        assert_eq!(
            srv.games.pass("Alice", "t1"),
            Err(GameError::NoGame("t1".to_string()))
        );
    }

    #[test]
    fn ties_at_the_threshold_go_to_the_earliest_seat() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_total(&srv, "t1", "Alice", 105);
        set_total(&srv, "t1", "Bob", 105);
        set_side_deck(&srv, "t1", 0);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(0, 0)]);
        set_hand(&srv, "t1", "Bob", vec![Tile::new(0, 0)]);

        srv.games.pass("Alice", "t1").unwrap();
        srv.games.pass("Bob", "t1").unwrap();

        let room = srv.rooms.get("t1").unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        let files: Vec<_> = fs::read_dir(srv.results.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        let contents = fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("Winner = \"Alice\""));
    }

    #[test]
    fn the_strictly_highest_total_wins() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_total(&srv, "t1", "Alice", 100);
        set_total(&srv, "t1", "Bob", 100);
        set_side_deck(&srv, "t1", 0);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(0, 0)]);
        set_hand(&srv, "t1", "Bob", vec![Tile::new(5, 5)]);

        srv.games.pass("Alice", "t1").unwrap();
        srv.games.pass("Bob", "t1").unwrap();

        let files: Vec<_> = fs::read_dir(srv.results.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        let contents = fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("Winner = \"Bob\""));
    }

    #[test]
    fn a_finished_room_can_host_a_new_game() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        set_total(&srv, "t1", "Bob", 200);
        set_hand(&srv, "t1", "Alice", vec![Tile::new(3, 5)]);
        srv.games.play("Alice", "t1", Tile::new(3, 5)).unwrap();
        assert_eq!(srv.rooms.get("t1").unwrap().status, RoomStatus::Finished);

        srv.games.start_requested("t1", "Alice").unwrap();
        assert_eq!(srv.rooms.get("t1").unwrap().status, RoomStatus::Playing);
        let handle = srv.games.session("t1").unwrap();
        // totals start over with the new game
        assert_eq!(handle.lock().total_scores["Bob"], 0);
    }
}

mod broadcasts {
    use super::*;

    #[test]
    fn players_only_ever_see_their_own_hand() {
        let (srv, _rx) = server();
        let (mut alice_rx, mut bob_rx) = started_two_player_game(&srv);

        let msgs = drain(&mut alice_rx);
        assert!(msgs.iter().any(|m| m.action == Action::GameStarted));
        let state = msgs
            .iter()
            .find(|m| m.action == Action::GameState)
            .expect("deal snapshot");
        let snapshot: GameSnapshot = state.payload().unwrap();
        let hand = snapshot.your_hand.expect("own hand visible");
        assert_eq!(hand.len(), 7);
        assert!(snapshot.players.iter().all(|p| p.tiles_in_hand == 7));

        let bob_state = drain(&mut bob_rx)
            .into_iter()
            .find(|m| m.action == Action::GameState)
            .unwrap();
        let bob_snapshot: GameSnapshot = bob_state.payload().unwrap();
        let bob_hand = bob_snapshot.your_hand.unwrap();
        assert_eq!(bob_hand.len(), 7);
        assert_ne!(bob_hand, hand);
    }

    #[test]
    fn watchers_see_no_hand_at_all() {
        let (srv, _rx) = server();
        started_two_player_game(&srv);
        let (_, mut eve_rx) = connect(&srv, "Eve");
        srv.rooms.watch("t1", "Eve").unwrap();

        set_hand(&srv, "t1", "Alice", vec![Tile::new(3, 5), Tile::new(0, 1)]);
        srv.games.play("Alice", "t1", Tile::new(3, 5)).unwrap();

        let state = drain(&mut eve_rx)
            .into_iter()
            .find(|m| m.action == Action::GameState)
            .expect("watcher snapshot");
        let snapshot: GameSnapshot = state.payload().unwrap();
        assert!(snapshot.your_hand.is_none());
        assert_eq!(snapshot.table_tiles, vec![Tile::new(3, 5)]);
        assert_eq!(snapshot.players[0].tiles_in_hand, 1);
    }

    #[test]
    fn every_move_is_broadcast_to_the_whole_room() {
        let (srv, _rx) = server();
        let (mut alice_rx, mut bob_rx) = started_two_player_game(&srv);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        set_hand(&srv, "t1", "Alice", vec![Tile::new(3, 5), Tile::new(0, 1)]);
        srv.games.play("Alice", "t1", Tile::new(3, 5)).unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let msgs = drain(rx);
            let state = msgs.iter().find(|m| m.action == Action::GameState).unwrap();
            let snapshot: GameSnapshot = state.payload().unwrap();
            assert_eq!(snapshot.table_tiles, vec![Tile::new(3, 5)]);
            assert_eq!(snapshot.current_turn_index, 1);
        }
    }
}

mod dispatcher {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn full_room_starts_automatically() {
        let (srv, event_rx) = server();
        tokio::spawn(events::run_dispatcher(
            event_rx,
            srv.sessions.clone(),
            srv.rooms.clone(),
            srv.games.clone(),
        ));

        connect(&srv, "Alice");
        connect(&srv, "Bob");
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();

        for _ in 0..100 {
            if srv.rooms.get("t1").unwrap().status == RoomStatus::Playing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(srv.rooms.get("t1").unwrap().status, RoomStatus::Playing);
        assert!(srv.games.is_active("t1"));
    }

    #[tokio::test]
    async fn partial_rooms_wait_for_the_owner() {
        let (srv, event_rx) = server();
        tokio::spawn(events::run_dispatcher(
            event_rx,
            srv.sessions.clone(),
            srv.rooms.clone(),
            srv.games.clone(),
        ));

        connect(&srv, "Alice");
        connect(&srv, "Bob");
        srv.rooms.create("t1", "Alice", 3, 100).unwrap();
        srv.rooms.join("t1", "Bob").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(srv.rooms.get("t1").unwrap().status, RoomStatus::Waiting);
        assert!(!srv.games.is_active("t1"));
    }

    #[tokio::test]
    async fn lobby_lists_are_pushed_on_change() {
        let (srv, event_rx) = server();
        tokio::spawn(events::run_dispatcher(
            event_rx,
            srv.sessions.clone(),
            srv.rooms.clone(),
            srv.games.clone(),
        ));

        let (_, mut alice_rx) = connect(&srv, "Alice");
        srv.rooms.create("t1", "Alice", 2, 100).unwrap();

        let mut saw_players = false;
        let mut saw_rooms = false;
        for _ in 0..100 {
            for msg in drain(&mut alice_rx) {
                match msg.action {
                    Action::PlayerList => saw_players = true,
                    Action::RoomList => saw_rooms = true,
                    _ => {}
                }
            }
            if saw_players && saw_rooms {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_players && saw_rooms);
    }
}
