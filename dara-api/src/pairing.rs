//! Match pairing: turns independent joins into pairs of players.
//!
//! A pairing game lives in one of three states. A fresh joiner is
//! `Connecting` until it confirms with `update`, then `Searching` in its
//! lobby's FIFO queue. The next joiner of that lobby takes the oldest
//! searcher and the game becomes `Pairing` until that joiner confirms too.
//! Confirmation removes the game from here; the caller starts the match.
//!
//! Each seat owns the timer that guards it. Every transition that retires a
//! seat cancels its timer in the same step, and a delivered timer whose id no
//! longer matches its seat is dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use dara_core::BoardSize;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::timer::{Scheduler, TimerEvent, TimerId, VirtualClock};

/// Opaque game identifier handed to clients.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// 128 random bits as hex.
    pub fn random() -> GameId {
        GameId(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        GameId(s.to_string())
    }
}

impl From<String> for GameId {
    fn from(s: String) -> Self {
        GameId(s)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Players are only paired within the same group and board size.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Lobby {
    pub group: u32,
    pub size: BoardSize,
}

impl Lobby {
    pub fn new(group: u32, size: BoardSize) -> Lobby {
        Lobby { group, size }
    }
}

impl fmt::Display for Lobby {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.size)
    }
}

/// Where a user stands, derived from the state of their game.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UserStatus {
    /// Joined, not yet confirmed.
    Connecting,
    /// Confirmed and queued for an opponent.
    Searching,
    /// Queued and taken by a joiner who has not confirmed yet.
    Pairing,
    /// Joined onto a searcher, not yet confirmed.
    Paired,
}

/// State of a game as seen from outside.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameStatus {
    Connecting,
    Searching,
    Pairing,
}

/// Run when a search gives up, before the searcher is removed.
pub type TimeoutHook = Box<dyn FnOnce() + Send>;

struct Seat {
    user: String,
    timer: TimerId,
}

struct SearchSeat {
    user: String,
    timer: TimerId,
    on_timeout: Option<TimeoutHook>,
}

enum PairingState {
    Connecting { connecting: Seat },
    Searching { searching: SearchSeat },
    Pairing { connecting: Seat, searching: SearchSeat },
}

impl PairingState {
    fn status(&self) -> GameStatus {
        match self {
            PairingState::Connecting { .. } => GameStatus::Connecting,
            PairingState::Searching { .. } => GameStatus::Searching,
            PairingState::Pairing { .. } => GameStatus::Pairing,
        }
    }

    fn connecting(&self) -> Option<&Seat> {
        match self {
            PairingState::Connecting { connecting } | PairingState::Pairing { connecting, .. } => {
                Some(connecting)
            }
            PairingState::Searching { .. } => None,
        }
    }

    fn searching(&self) -> Option<&SearchSeat> {
        match self {
            PairingState::Searching { searching } | PairingState::Pairing { searching, .. } => {
                Some(searching)
            }
            PairingState::Connecting { .. } => None,
        }
    }

    fn has(&self, user: &str) -> bool {
        self.connecting().is_some_and(|s| s.user == user)
            || self.searching().is_some_and(|s| s.user == user)
    }

    fn user_status(&self, user: &str) -> Option<UserStatus> {
        match self {
            PairingState::Connecting { connecting } if connecting.user == user => {
                Some(UserStatus::Connecting)
            }
            PairingState::Searching { searching } if searching.user == user => {
                Some(UserStatus::Searching)
            }
            PairingState::Pairing { connecting, .. } if connecting.user == user => {
                Some(UserStatus::Paired)
            }
            PairingState::Pairing { searching, .. } if searching.user == user => {
                Some(UserStatus::Pairing)
            }
            _ => None,
        }
    }
}

struct PairingGame {
    lobby: Lobby,
    state: PairingState,
}

/// A completed pairing. The searcher waited longest and plays first.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Paired {
    pub id: GameId,
    pub connecting: String,
    pub searching: String,
    pub lobby: Lobby,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Update {
    /// No opponent yet; keep the connection open.
    Waiting,
    Paired(Paired),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Leave {
    /// The game held nobody else and is gone.
    Closed,
    /// The other occupant stays, one state back.
    Reverted { remaining: String, status: UserStatus },
}

/// A pairing timer that removed someone.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Expired {
    Join { game: GameId, user: String },
    Search { game: GameId, user: String },
}

#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum PairingError {
    #[error("unknown game")]
    UnknownGame,
    #[error("not a member of this game")]
    NotAMember,
    #[error("invalid pairing state")]
    InvalidState,
}

#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub join: Duration,
    pub search: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            join: Duration::from_millis(5000),
            search: Duration::from_millis(60000),
        }
    }
}

pub struct Pairing<S> {
    timers: S,
    timeouts: Timeouts,
    games: HashMap<GameId, PairingGame>,
    users: HashMap<(String, Lobby), GameId>,
    searching: HashMap<Lobby, VecDeque<GameId>>,
}

impl<S: Scheduler> Pairing<S> {
    pub fn new(timers: S, timeouts: Timeouts) -> Pairing<S> {
        Pairing {
            timers,
            timeouts,
            games: HashMap::new(),
            users: HashMap::new(),
            searching: HashMap::new(),
        }
    }

    pub fn timers(&self) -> &S {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut S {
        &mut self.timers
    }

    /// Games currently pairing.
    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn status(&self, user: &str, lobby: Lobby) -> Option<UserStatus> {
        let id = self.users.get(&(user.to_string(), lobby))?;
        self.games.get(id)?.state.user_status(user)
    }

    pub fn game_status(&self, id: &GameId) -> Option<GameStatus> {
        self.games.get(id).map(|game| game.state.status())
    }

    pub fn contains(&self, id: &GameId, user: &str) -> bool {
        self.games.get(id).is_some_and(|game| game.state.has(user))
    }

    /// Searching games of a lobby, oldest first.
    pub fn queue(&self, lobby: Lobby) -> Vec<GameId> {
        self.searching
            .get(&lobby)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Enter a lobby. Repeated joins return the same game.
    pub fn join(&mut self, user: &str, lobby: Lobby) -> GameId {
        let key = (user.to_string(), lobby);
        if let Some(id) = self.users.get(&key).cloned() {
            self.refresh(&id, user);
            return id;
        }

        if let Some(id) = self.pop_searching(lobby) {
            if let Some(game) = self.games.remove(&id) {
                if let PairingState::Searching { searching } = game.state {
                    let timer = self.timers.schedule(
                        self.timeouts.join,
                        TimerEvent::JoinTimeout {
                            game: id.clone(),
                            user: user.to_string(),
                        },
                    );
                    info!(game = %id, user, searching = %searching.user, lobby = %lobby, "paired with searcher");
                    let connecting = Seat {
                        user: user.to_string(),
                        timer,
                    };
                    let state = PairingState::Pairing { connecting, searching };
                    self.games.insert(id.clone(), PairingGame { lobby, state });
                    self.users.insert(key, id.clone());
                    return id;
                }
                self.games.insert(id, game);
            }
        }

        let mut id = GameId::random();
        while self.games.contains_key(&id) {
            id = GameId::random();
        }
        let timer = self.timers.schedule(
            self.timeouts.join,
            TimerEvent::JoinTimeout {
                game: id.clone(),
                user: user.to_string(),
            },
        );
        let connecting = Seat {
            user: user.to_string(),
            timer,
        };
        self.games.insert(
            id.clone(),
            PairingGame {
                lobby,
                state: PairingState::Connecting { connecting },
            },
        );
        self.users.insert(key, id.clone());
        info!(game = %id, user, lobby = %lobby, "new game");
        id
    }

    /// Confirm a joiner is alive. The first confirmation of a new game
    /// starts the search. A joiner's confirmation completes its pairing.
    pub fn update(
        &mut self,
        id: &GameId,
        user: &str,
        on_timeout: TimeoutHook,
    ) -> Result<Update, PairingError> {
        let game = self.games.remove(id).ok_or(PairingError::UnknownGame)?;
        if !game.state.has(user) {
            self.games.insert(id.clone(), game);
            return Err(PairingError::NotAMember);
        }
        if self.users.get(&(user.to_string(), game.lobby)) != Some(id) {
            error!(game = %id, user, "user index out of sync with game");
            self.games.insert(id.clone(), game);
            return Err(PairingError::InvalidState);
        }

        let lobby = game.lobby;
        let state = match game.state {
            PairingState::Connecting { connecting } => {
                self.timers.cancel(connecting.timer);
                let timer = self.timers.schedule(
                    self.timeouts.search,
                    TimerEvent::SearchTimeout {
                        game: id.clone(),
                        user: connecting.user.clone(),
                    },
                );
                self.searching.entry(lobby).or_default().push_back(id.clone());
                debug!(game = %id, user, "searching");
                PairingState::Searching {
                    searching: SearchSeat {
                        user: connecting.user,
                        timer,
                        on_timeout: Some(on_timeout),
                    },
                }
            }
            PairingState::Searching { mut searching } => {
                // Refresh from the searcher: keep its place and its timer.
                searching.on_timeout = Some(on_timeout);
                PairingState::Searching { searching }
            }
            PairingState::Pairing { connecting, searching } if connecting.user == user => {
                self.timers.cancel(connecting.timer);
                self.timers.cancel(searching.timer);
                self.users.remove(&(connecting.user.clone(), lobby));
                self.users.remove(&(searching.user.clone(), lobby));
                info!(game = %id, connecting = %connecting.user, searching = %searching.user, "pairing complete");
                return Ok(Update::Paired(Paired {
                    id: id.clone(),
                    connecting: connecting.user,
                    searching: searching.user,
                    lobby,
                }));
            }
            PairingState::Pairing { connecting, mut searching } => {
                searching.on_timeout = Some(on_timeout);
                PairingState::Pairing { connecting, searching }
            }
        };
        self.games.insert(id.clone(), PairingGame { lobby, state });
        Ok(Update::Waiting)
    }

    /// Remove a user from its game. The other occupant of a pairing game
    /// falls back one state and keeps its record.
    pub fn leave(&mut self, id: &GameId, user: &str) -> Result<Leave, PairingError> {
        let game = self.games.remove(id).ok_or(PairingError::UnknownGame)?;
        if !game.state.has(user) {
            self.games.insert(id.clone(), game);
            return Err(PairingError::NotAMember);
        }

        let lobby = game.lobby;
        self.users.remove(&(user.to_string(), lobby));
        let (state, leave) = match game.state {
            PairingState::Connecting { connecting } => {
                self.timers.cancel(connecting.timer);
                (None, Leave::Closed)
            }
            PairingState::Searching { searching } => {
                self.timers.cancel(searching.timer);
                self.dequeue(lobby, id);
                (None, Leave::Closed)
            }
            PairingState::Pairing { connecting, searching } if connecting.user == user => {
                self.timers.cancel(connecting.timer);
                // The searcher was first in line and goes back to the front.
                self.searching.entry(lobby).or_default().push_front(id.clone());
                let leave = Leave::Reverted {
                    remaining: searching.user.clone(),
                    status: UserStatus::Searching,
                };
                (Some(PairingState::Searching { searching }), leave)
            }
            PairingState::Pairing { connecting, searching } => {
                self.timers.cancel(searching.timer);
                let leave = Leave::Reverted {
                    remaining: connecting.user.clone(),
                    status: UserStatus::Connecting,
                };
                (Some(PairingState::Connecting { connecting }), leave)
            }
        };
        if let Some(state) = state {
            self.games.insert(id.clone(), PairingGame { lobby, state });
        }
        info!(game = %id, user, ?leave, "left pairing");
        Ok(leave)
    }

    /// Handle a delivered pairing timer. Returns who it removed, if anyone.
    pub fn on_timer(&mut self, timer: TimerId, event: &TimerEvent) -> Option<Expired> {
        match event {
            TimerEvent::JoinTimeout { game, user } => {
                let current = self
                    .games
                    .get(game)
                    .and_then(|g| g.state.connecting())
                    .is_some_and(|seat| seat.user == *user && seat.timer == timer);
                if !current {
                    debug!(game = %game, user = %user, "stale join timer");
                    return None;
                }
                info!(game = %game, user = %user, "join timed out");
                self.leave(game, user).ok()?;
                Some(Expired::Join {
                    game: game.clone(),
                    user: user.clone(),
                })
            }
            TimerEvent::SearchTimeout { game, user } => {
                let hook = match self.games.get_mut(game).map(|g| &mut g.state) {
                    Some(PairingState::Searching { searching })
                    | Some(PairingState::Pairing { searching, .. })
                        if searching.user == *user && searching.timer == timer =>
                    {
                        searching.on_timeout.take()
                    }
                    _ => {
                        debug!(game = %game, user = %user, "stale search timer");
                        return None;
                    }
                };
                info!(game = %game, user = %user, "search timed out");
                if let Some(hook) = hook {
                    hook();
                }
                self.leave(game, user).ok()?;
                Some(Expired::Search {
                    game: game.clone(),
                    user: user.clone(),
                })
            }
            _ => None,
        }
    }

    fn refresh(&mut self, id: &GameId, user: &str) {
        let Some(game) = self.games.get_mut(id) else {
            return;
        };
        match &mut game.state {
            PairingState::Connecting { connecting } | PairingState::Pairing { connecting, .. }
                if connecting.user == user =>
            {
                self.timers.cancel(connecting.timer);
                connecting.timer = self.timers.schedule(
                    self.timeouts.join,
                    TimerEvent::JoinTimeout {
                        game: id.clone(),
                        user: user.to_string(),
                    },
                );
                debug!(game = %id, user, "join refreshed");
            }
            _ => debug!(game = %id, user, "join repeated while searching"),
        }
    }

    fn pop_searching(&mut self, lobby: Lobby) -> Option<GameId> {
        let queue = self.searching.get_mut(&lobby)?;
        let found = loop {
            let id = queue.pop_front()?;
            if matches!(
                self.games.get(&id).map(|g| &g.state),
                Some(PairingState::Searching { .. })
            ) {
                break id;
            }
            error!(game = %id, "queued game is not searching");
        };
        if queue.is_empty() {
            self.searching.remove(&lobby);
        }
        Some(found)
    }

    fn dequeue(&mut self, lobby: Lobby, id: &GameId) {
        if let Some(queue) = self.searching.get_mut(&lobby) {
            queue.retain(|queued| queued != id);
            if queue.is_empty() {
                self.searching.remove(&lobby);
            }
        }
    }
}

impl Pairing<VirtualClock> {
    /// Let `by` pass on the virtual clock, delivering every timer due.
    pub fn advance(&mut self, by: Duration) -> Vec<Expired> {
        let until = self.timers.now() + by;
        let mut expired = Vec::new();
        while let Some(fired) = self.timers.next_due(until) {
            expired.extend(self.on_timer(fired.id, &fired.event));
        }
        self.timers.set_now(until);
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn lobby() -> Lobby {
        Lobby::new(1, BoardSize::STANDARD)
    }

    fn pairing() -> Pairing<VirtualClock> {
        Pairing::new(VirtualClock::new(), Timeouts::default())
    }

    fn noop() -> TimeoutHook {
        Box::new(|| {})
    }

    #[test]
    fn test_join_creates_connecting_game() {
        let mut pairing = pairing();
        let id = pairing.join("alice", lobby());
        assert_eq!(pairing.game_status(&id), Some(GameStatus::Connecting));
        assert_eq!(pairing.status("alice", lobby()), Some(UserStatus::Connecting));
        assert_eq!(pairing.timers().pending(), 1);
    }

    #[test]
    fn test_repeated_join_refreshes_timer() {
        let mut pairing = pairing();
        let id = pairing.join("alice", lobby());
        pairing.advance(Duration::from_millis(4000));
        assert_eq!(pairing.join("alice", lobby()), id);
        assert_eq!(pairing.timers().pending(), 1);

        // The original deadline passes without effect.
        assert!(pairing.advance(Duration::from_millis(2000)).is_empty());
        assert_eq!(pairing.game_status(&id), Some(GameStatus::Connecting));
        assert_eq!(pairing.advance(Duration::from_millis(3000)).len(), 1);
        assert_eq!(pairing.game_status(&id), None);
    }

    #[test]
    fn test_lobbies_are_separate() {
        let mut pairing = pairing();
        let a = pairing.join("alice", lobby());
        pairing.update(&a, "alice", noop()).unwrap();
        let other = Lobby::new(2, BoardSize::STANDARD);
        let b = pairing.join("bob", other);
        assert_ne!(a, b);
        let small = Lobby::new(1, BoardSize::new(5, 5));
        let c = pairing.join("carol", small);
        assert_ne!(a, c);
        assert_eq!(pairing.queue(lobby()), vec![a]);
    }

    #[test]
    fn test_searcher_refresh_keeps_place() {
        let mut pairing = pairing();
        let small = Lobby::new(1, BoardSize::new(5, 5));
        let a = pairing.join("alice", lobby());
        pairing.update(&a, "alice", noop()).unwrap();
        let b = pairing.join("bob", small);
        pairing.update(&b, "bob", noop()).unwrap();
        pairing.advance(Duration::from_secs(30));

        assert_eq!(pairing.update(&a, "alice", noop()), Ok(Update::Waiting));
        assert_eq!(pairing.join("alice", lobby()), a);
        assert_eq!(pairing.queue(lobby()), vec![a.clone()]);
        assert_eq!(pairing.status("alice", lobby()), Some(UserStatus::Searching));
        assert_eq!(pairing.timers().pending(), 2);

        // The search deadline still counts from the first confirmation.
        let expired = pairing.advance(Duration::from_secs(30));
        assert_eq!(expired.len(), 2);
        assert_eq!(pairing.game_status(&a), None);
    }

    #[test]
    fn test_update_errors() {
        let mut pairing = pairing();
        let id = pairing.join("alice", lobby());
        assert_eq!(
            pairing.update(&GameId::from("nope"), "alice", noop()),
            Err(PairingError::UnknownGame)
        );
        assert_eq!(pairing.update(&id, "bob", noop()), Err(PairingError::NotAMember));
        assert_eq!(pairing.leave(&id, "bob"), Err(PairingError::NotAMember));
        assert_eq!(pairing.game_status(&id), Some(GameStatus::Connecting));
    }

    #[test]
    fn test_searching_joiner_waits_for_its_own_update() {
        let mut pairing = pairing();
        let id = pairing.join("alice", lobby());
        pairing.update(&id, "alice", noop()).unwrap();
        assert_eq!(pairing.join("bob", lobby()), id);

        // The searcher confirming again does not complete the pairing.
        assert_eq!(pairing.update(&id, "alice", noop()), Ok(Update::Waiting));
        assert_eq!(pairing.game_status(&id), Some(GameStatus::Pairing));
        assert!(matches!(pairing.update(&id, "bob", noop()), Ok(Update::Paired(_))));
    }

    #[test]
    fn test_search_timeout_runs_hook_then_leaves() {
        let mut pairing = pairing();
        let id = pairing.join("alice", lobby());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        pairing
            .update(
                &id,
                "alice",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(pairing.advance(Duration::from_millis(59_999)).is_empty());
        let expired = pairing.advance(Duration::from_millis(1));
        assert_eq!(
            expired,
            vec![Expired::Search {
                game: id.clone(),
                user: "alice".to_string()
            }]
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(pairing.is_empty());
        assert!(pairing.queue(lobby()).is_empty());
        assert_eq!(pairing.status("alice", lobby()), None);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let mut pairing = pairing();
        let id = pairing.join("alice", lobby());
        let stale = TimerEvent::JoinTimeout {
            game: id.clone(),
            user: "alice".to_string(),
        };
        pairing.update(&id, "alice", noop()).unwrap();
        // A join timer delivered after the game moved on must do nothing,
        // whatever its id.
        let mut clock = VirtualClock::new();
        let foreign = clock.schedule(Duration::ZERO, stale.clone());
        assert_eq!(pairing.on_timer(foreign, &stale), None);
        assert_eq!(pairing.game_status(&id), Some(GameStatus::Searching));
    }
}
