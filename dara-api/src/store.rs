//! Flat-file stores: user credentials and per-lobby rankings.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dara_core::BoardSize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::pairing::Lobby;
use crate::session::{GameResult, ResultSink};

/// Entries returned by a ranking query.
pub const RANKING_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user registered with a different password")]
    WrongPassword,
    #[error("unknown user")]
    UnknownUser,
    #[error("invalid nick")]
    InvalidNick,
    #[error("storage error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt ranking file: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Credentials
// =============================================================================

/// `nick:sha256hex` lines, loaded once and appended on registration.
pub struct Credentials {
    path: PathBuf,
    users: Mutex<HashMap<String, String>>,
}

impl Credentials {
    pub fn open(path: impl Into<PathBuf>) -> Result<Credentials, StoreError> {
        let path = path.into();
        let users = match fs::read_to_string(&path) {
            Ok(text) => parse_credentials(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), users = users.len(), "credentials loaded");
        Ok(Credentials {
            path,
            users: Mutex::new(users),
        })
    }

    /// Register a new nick, or check the password of a known one.
    pub fn register(&self, nick: &str, password: &str) -> Result<(), StoreError> {
        if nick.is_empty() || nick.contains([':', '\n', '\r']) {
            return Err(StoreError::InvalidNick);
        }
        let hash = hash_password(password);
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = users.get(nick) {
            return if *known == hash {
                Ok(())
            } else {
                Err(StoreError::WrongPassword)
            };
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}:{}", nick, hash)?;
        users.insert(nick.to_string(), hash);
        info!(nick, "registered");
        Ok(())
    }

    pub fn verify(&self, nick: &str, password: &str) -> Result<(), StoreError> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        match users.get(nick) {
            None => Err(StoreError::UnknownUser),
            Some(known) if *known == hash_password(password) => Ok(()),
            Some(_) => Err(StoreError::WrongPassword),
        }
    }
}

fn parse_credentials(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(nick, hash)| (nick.to_string(), hash.trim().to_string()))
        .collect()
}

fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// =============================================================================
// Ranking
// =============================================================================

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RankEntry {
    pub nick: String,
    pub victories: u32,
    pub games: u32,
}

impl RankEntry {
    fn win_rate(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            f64::from(self.victories) / f64::from(self.games)
        }
    }
}

/// One JSON file per lobby under `<root>/ranking/<group>/<rows>-<columns>.json`.
pub struct Rankings {
    root: PathBuf,
    lock: Mutex<()>,
}

impl Rankings {
    pub fn new(data_dir: impl AsRef<Path>) -> Rankings {
        Rankings {
            root: data_dir.as_ref().join("ranking"),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, group: u32, size: BoardSize) -> PathBuf {
        self.root
            .join(group.to_string())
            .join(format!("{}-{}.json", size.rows, size.columns))
    }

    fn load(&self, path: &Path) -> Result<Vec<RankEntry>, StoreError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Add one game to both players' records.
    pub fn record(&self, result: &GameResult) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path(result.lobby.group, result.lobby.size);
        let mut entries = self.load(&path)?;
        for nick in [&result.winner, &result.loser] {
            let entry = match entries.iter().position(|e| e.nick == *nick) {
                Some(i) => &mut entries[i],
                None => {
                    entries.push(RankEntry {
                        nick: nick.clone(),
                        victories: 0,
                        games: 0,
                    });
                    let last = entries.len() - 1;
                    &mut entries[last]
                }
            };
            entry.games += 1;
            if *nick == result.winner {
                entry.victories += 1;
            }
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
        debug!(path = %path.display(), winner = %result.winner, "ranking updated");
        Ok(())
    }

    /// Best players of a lobby: most victories, then best win rate.
    pub fn top(&self, lobby: Lobby) -> Result<Vec<RankEntry>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load(&self.path(lobby.group, lobby.size))?;
        entries.sort_by(|a, b| {
            b.victories
                .cmp(&a.victories)
                .then_with(|| b.win_rate().total_cmp(&a.win_rate()))
        });
        entries.truncate(RANKING_SIZE);
        Ok(entries)
    }
}

impl ResultSink for Arc<Rankings> {
    fn record(&mut self, result: &GameResult) -> Result<(), StoreError> {
        Rankings::record(self, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dara-store-{}-{:x}", name, rand::random::<u64>()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn result(winner: &str, loser: &str) -> GameResult {
        GameResult {
            lobby: Lobby::new(7, BoardSize::STANDARD),
            winner: winner.to_string(),
            loser: loser.to_string(),
        }
    }

    #[test]
    fn test_register_and_verify() {
        let dir = temp_dir("credentials");
        let path = dir.join("users.txt");
        let credentials = Credentials::open(&path).unwrap();
        credentials.register("ann", "secret").unwrap();
        credentials.register("ann", "secret").unwrap();
        assert!(matches!(credentials.register("ann", "other"), Err(StoreError::WrongPassword)));
        assert!(matches!(credentials.verify("bo", "x"), Err(StoreError::UnknownUser)));
        assert!(matches!(credentials.register("a:b", "x"), Err(StoreError::InvalidNick)));

        // Survives a reload.
        let reloaded = Credentials::open(&path).unwrap();
        reloaded.verify("ann", "secret").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(!text.contains("secret"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_ranking_order() {
        let dir = temp_dir("ranking");
        let rankings = Rankings::new(&dir);
        rankings.record(&result("ann", "bo")).unwrap();
        rankings.record(&result("ann", "cy")).unwrap();
        rankings.record(&result("cy", "bo")).unwrap();
        rankings.record(&result("dee", "ann")).unwrap();

        let top = rankings.top(Lobby::new(7, BoardSize::STANDARD)).unwrap();
        let order: Vec<&str> = top.iter().map(|e| e.nick.as_str()).collect();
        // ann 2/3, dee 1/1, cy 1/2, bo 0/2
        assert_eq!(order, ["ann", "dee", "cy", "bo"]);
        assert_eq!(top[0].games, 3);
        assert!(dir.join("ranking/7/6-6.json").exists());

        // Other lobbies are separate files.
        assert!(rankings.top(Lobby::new(8, BoardSize::STANDARD)).unwrap().is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_ranking_keeps_top_ten() {
        let dir = temp_dir("top-ten");
        let rankings = Rankings::new(&dir);
        for i in 0..12 {
            rankings.record(&result(&format!("p{}", i), "loser")).unwrap();
        }
        let top = rankings.top(Lobby::new(7, BoardSize::STANDARD)).unwrap();
        assert_eq!(top.len(), RANKING_SIZE);
        assert!(top.iter().all(|e| e.victories == 1));
        assert!(top.iter().all(|e| e.nick != "loser"));
        fs::remove_dir_all(dir).unwrap();
    }
}
