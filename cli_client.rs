use clap::Parser;
use dominet_protocol::{
    Action, CreateRoomRequest, GameEndedNotice, GameSnapshot, Message, PlayTileRequest,
    RoomSummary,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "cli_client", about = "Line-mode domino client")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:5000")]
    addr: String,
    /// Username to log in with
    #[arg(long)]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("🁫 Dominet CLI Client");
    println!("====================");
    println!("🔗 Connecting to {}...", args.addr);

    let stream = TcpStream::connect(&args.addr).await?;
    println!("✅ Connected!");
    let (read_half, mut write_half) = stream.into_split();

    let login = Message::request(Action::Login, &args.name);
    write_half
        .write_all((serde_json::to_string(&login)? + "\n").as_bytes())
        .await?;

    tokio::spawn({
        let name = args.name.clone();
        async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<Message>(&line) {
                    Ok(msg) => handle_server_message(msg, &name),
                    Err(e) => println!("❌ Bad frame from server: {}", e),
                }
            }
            println!("🔌 Connection closed by server");
        }
    });

    println!("\n📋 Commands available:");
    println!("  create <room> [players] [score] - Create a room and sit down");
    println!("  join <room>                     - Join a waiting room");
    println!("  watch <room>                    - Watch a running game");
    println!("  leave                           - Leave the current room");
    println!("  start                           - Start the game (owner only)");
    println!("  play <a> <b>                    - Play the [a|b] tile");
    println!("  pass                            - Pass (side deck must be empty)");
    println!("  quit                            - Exit");
    println!("\nType commands and press Enter:");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            let logout = Message::request(Action::Logout, &args.name);
            let _ = write_half
                .write_all((serde_json::to_string(&logout)? + "\n").as_bytes())
                .await;
            break;
        }
        match parse_command(line, &args.name) {
            Some(msg) => {
                write_half
                    .write_all((serde_json::to_string(&msg)? + "\n").as_bytes())
                    .await?;
            }
            None => println!("❓ Unknown command: {}", line),
        }
    }

    println!("👋 Goodbye!");
    Ok(())
}

fn parse_command(input: &str, name: &str) -> Option<Message> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.first()?.to_lowercase().as_str() {
        "create" => {
            let room = parts.get(1)?;
            let request = CreateRoomRequest {
                room_name: room.to_string(),
                max_players: parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(2),
                winning_score: parts.get(3).and_then(|p| p.parse().ok()).unwrap_or(100),
            };
            Message::request(Action::CreateRoom, name)
                .with_payload(&request)
                .ok()
        }
        "join" => Some(Message::request(Action::JoinRoom, name).in_room(parts.get(1)?)),
        "watch" => Some(Message::request(Action::WatchRoom, name).in_room(parts.get(1)?)),
        "leave" => Some(Message::request(Action::LeaveRoom, name)),
        "start" => Some(Message::request(Action::StartGame, name)),
        "play" => {
            let request = PlayTileRequest {
                left_value: parts.get(1)?.parse().ok()?,
                right_value: parts.get(2)?.parse().ok()?,
            };
            Message::request(Action::PlayCard, name)
                .with_payload(&request)
                .ok()
        }
        "pass" => Some(Message::request(Action::Pass, name)),
        _ => None,
    }
}

fn handle_server_message(msg: Message, name: &str) {
    if !msg.success {
        let reason = msg.error_message.unwrap_or_else(|| "unknown error".into());
        println!("❌ {}: {}", msg.action, reason);
        return;
    }
    match msg.action {
        Action::PlayerList => {
            if let Ok(players) = msg.payload::<Vec<String>>() {
                println!("👥 Online: {}", players.join(", "));
            }
        }
        Action::RoomList => {
            if let Ok(rooms) = msg.payload::<Vec<RoomSummary>>() {
                if rooms.is_empty() {
                    println!("🏠 No rooms yet");
                }
                for room in rooms {
                    println!(
                        "🏠 {} [{}] {}/{} players, first to {}",
                        room.name,
                        room.status,
                        room.players.len(),
                        room.max_players,
                        room.winning_score
                    );
                }
            }
        }
        Action::GameStarted => {
            println!("🎲 Game started in '{}'!", msg.room_name.unwrap_or_default());
        }
        Action::GameState => {
            if let Ok(snapshot) = msg.payload::<GameSnapshot>() {
                print_game_state(&snapshot, name);
            }
        }
        Action::GameEnded => {
            if let Ok(notice) = msg.payload::<GameEndedNotice>() {
                println!("\n🏁 GAME OVER! Winner: {}", notice.winner);
                for (player, total) in notice.total_scores {
                    println!("  {}: {} points", player, total);
                }
            }
        }
        action => println!("✅ {}", action),
    }
}

fn print_game_state(snapshot: &GameSnapshot, name: &str) {
    println!("\n🁫 === {} (round scores below) ===", snapshot.room_name);
    let chain: Vec<String> = snapshot.table_tiles.iter().map(|t| t.to_string()).collect();
    println!("🪢 Table: {}", if chain.is_empty() { "(empty)".into() } else { chain.join(" ") });
    println!("🂠 Side deck: {} tiles", snapshot.side_deck_count);
    for (i, seat) in snapshot.players.iter().enumerate() {
        let to_act = if i == snapshot.current_turn_index { " 👈 TO ACT" } else { "" };
        let passed = if seat.passed_this_round { " [PASSED]" } else { "" };
        let total = snapshot.total_scores.get(&seat.username).copied().unwrap_or(0);
        println!(
            "  {}: {} ({} tiles, {} points){}{}",
            i, seat.username, seat.tiles_in_hand, total, passed, to_act
        );
    }
    if let Some(hand) = &snapshot.your_hand {
        let tiles: Vec<String> = hand.iter().map(|t| t.to_string()).collect();
        println!("🃏 Your hand: {}", tiles.join(" "));
    }
    if let Some(winner) = &snapshot.winner {
        println!("🏆 Winner: {}", winner);
    } else if snapshot
        .players
        .get(snapshot.current_turn_index)
        .map(|s| s.username.eq_ignore_ascii_case(name))
        .unwrap_or(false)
    {
        println!("▶️  Your move!");
    }
    println!("==================\n");
}
