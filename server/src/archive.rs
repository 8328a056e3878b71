use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

/// Immutable record of one finished game. Built once by the orchestrator and
/// owned by the archiver from then on.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub room_name: String,
    /// Final totals in turn order.
    pub scores: Vec<(String, u32)>,
    pub winner: String,
    pub finished_at: DateTime<Local>,
    pub max_players: usize,
    pub winning_score: u32,
}

/// Writes one plain-text result file per finished game. A failed write is
/// logged by the caller and never affects in-memory state.
#[derive(Clone)]
pub struct ResultArchiver {
    results_dir: PathBuf,
}

impl ResultArchiver {
    pub fn new(results_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let results_dir = results_dir.into();
        fs::create_dir_all(&results_dir)?;
        Ok(ResultArchiver { results_dir })
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn archive(&self, result: &MatchResult) -> io::Result<PathBuf> {
        let filename = format!(
            "{}_{}.txt",
            result.room_name,
            result.finished_at.format("%Y-%m-%d_%H-%M-%S")
        );
        let path = self.results_dir.join(filename);

        let mut lines = vec![format!("Room_Name = \"{}\"", result.room_name)];
        for (username, points) in &result.scores {
            lines.push(format!(
                "    Player Name = \"{username}\", Player Points = {points}"
            ));
        }
        lines.push(String::new());
        lines.push(format!(
            "Game Date = {}",
            result.finished_at.format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(format!("Winner = \"{}\"", result.winner));
        lines.push(format!("Max Players = {}", result.max_players));
        lines.push(format!("Winning Score Limit = {}", result.winning_score));

        fs::write(&path, lines.join("\n") + "\n")?;
        info!(path = %path.display(), "game result archived");
        Ok(path)
    }
}
