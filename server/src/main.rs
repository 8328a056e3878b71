use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dominet_protocol::{Rules, StandardRules};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod archive;
mod broadcast;
mod connection;
mod events;
mod game;
mod rooms;
mod session;
#[cfg(test)]
mod tests;

use archive::ResultArchiver;
use broadcast::BroadcastDispatcher;
use game::GameOrchestrator;
use rooms::RoomRegistry;
use session::SessionRegistry;

#[derive(Parser)]
#[command(name = "dominet-server", about = "Multiplayer domino game server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: String,
    /// Directory for archived game results
    #[arg(long, default_value = "./results")]
    results_dir: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub games: Arc<GameOrchestrator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let sessions = Arc::new(SessionRegistry::new(event_tx.clone()));
    let rooms = Arc::new(RoomRegistry::new(event_tx.clone()));
    let archiver = ResultArchiver::new(&args.results_dir)
        .with_context(|| format!("creating results dir {}", args.results_dir.display()))?;
    let rules: Arc<dyn Rules> = Arc::new(StandardRules);
    let games = Arc::new(GameOrchestrator::new(
        rooms.clone(),
        BroadcastDispatcher::new(sessions.clone()),
        rules,
        archiver,
        event_tx,
    ));
    let state = AppState {
        sessions: sessions.clone(),
        rooms: rooms.clone(),
        games: games.clone(),
    };

    tokio::spawn(events::run_dispatcher(event_rx, sessions, rooms, games));

    // failure to bind is the only fatal startup error
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, "server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(connection::serve(
                        stream,
                        peer,
                        state.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(error) => warn!(%error, "accept failed"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }
    Ok(())
}
