//! Live matches on top of pairing.
//!
//! A user's update stream is its connection. The first connection of a
//! pairing game confirms the joiner and parks it until an opponent arrives;
//! the connection that completes a pairing starts the match. From then on
//! the manager owns the game, one chess clock per player, a keep-alive ping
//! per connected player and, once the game is decided, a grace timer after
//! which the match is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dara_core::{Game, Player, Pos, RuleError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pairing::{Expired, GameId, Lobby, Paired, Pairing, PairingError, Timeouts, TimeoutHook, Update};
use crate::push::{GameUpdate, Push};
use crate::store::StoreError;
use crate::timer::{Scheduler, TimerEvent, TimerId, VirtualClock};

/// Sending half of a player's update stream.
pub type Channel = mpsc::UnboundedSender<Push>;

/// The match clock ticks steadily; each tick is charged to whoever is to
/// move when it fires.
const TICK: Duration = Duration::from_secs(1);

/// Identifies one update stream, so a replaced stream cannot disconnect
/// its successor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionId(u64);

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub pairing: Timeouts,
    /// Thinking time per player.
    pub clock: Duration,
    pub keepalive: Duration,
    /// How long a decided match stays around for reconnects.
    pub grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            pairing: Timeouts::default(),
            clock: Duration::from_secs(300),
            keepalive: Duration::from_secs(30),
            grace: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GameResult {
    pub lobby: Lobby,
    pub winner: String,
    pub loser: String,
}

/// Where finished games are reported.
pub trait ResultSink: Send {
    fn record(&mut self, result: &GameResult) -> Result<(), StoreError>;
}

/// In-memory sink; clones share the same list.
#[derive(Clone, Default, Debug)]
pub struct ResultLog(Arc<Mutex<Vec<GameResult>>>);

impl ResultLog {
    pub fn results(&self) -> Vec<GameResult> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ResultSink for ResultLog {
    fn record(&mut self, result: &GameResult) -> Result<(), StoreError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Pairing(#[from] PairingError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("not your turn to play")]
    NotYourTurn,
    #[error("game is over")]
    GameOver,
}

struct Link {
    id: ConnectionId,
    tx: Channel,
}

struct Slot {
    user: String,
    link: Option<Link>,
    /// Seconds left.
    clock: u32,
    keepalive: Option<TimerId>,
}

struct Match {
    lobby: Lobby,
    /// Indexed by `Player::index`.
    slots: [Slot; 2],
    game: Game,
    last: Option<Pos>,
    clock: Option<TimerId>,
    teardown: Option<TimerId>,
}

impl Match {
    fn seat(&self, user: &str) -> Option<Player> {
        [Player::Black, Player::White]
            .into_iter()
            .find(|p| self.slots[p.index()].user == user)
    }

    fn slot(&self, player: Player) -> &Slot {
        &self.slots[player.index()]
    }

    fn slot_mut(&mut self, player: Player) -> &mut Slot {
        &mut self.slots[player.index()]
    }

    fn all_disconnected(&self) -> bool {
        self.slots.iter().all(|slot| slot.link.is_none())
    }

    fn state(&self) -> Push {
        let [black, white] = &self.slots;
        Push::State(Box::new(GameUpdate::new(
            &self.game,
            [black.user.as_str(), white.user.as_str()],
            [black.clock, white.clock],
            self.last,
        )))
    }

    fn send(&self, player: Player, push: Push) {
        if let Some(link) = &self.slot(player).link {
            if link.tx.send(push).is_err() {
                debug!(user = %self.slot(player).user, "update stream closed");
            }
        }
    }

    fn broadcast(&self, push: Push) {
        self.send(Player::Black, push.clone());
        self.send(Player::White, push);
    }
}

pub struct SessionManager<S> {
    pairing: Pairing<S>,
    config: SessionConfig,
    waiting: HashMap<(GameId, String), Link>,
    matches: HashMap<GameId, Match>,
    results: Box<dyn ResultSink>,
    next_link: u64,
}

impl<S: Scheduler> SessionManager<S> {
    pub fn new(timers: S, config: SessionConfig, results: Box<dyn ResultSink>) -> SessionManager<S> {
        SessionManager {
            pairing: Pairing::new(timers, config.pairing),
            config,
            waiting: HashMap::new(),
            matches: HashMap::new(),
            results,
            next_link: 0,
        }
    }

    pub fn pairing(&self) -> &Pairing<S> {
        &self.pairing
    }

    pub fn join(&mut self, user: &str, lobby: Lobby) -> GameId {
        self.pairing.join(user, lobby)
    }

    /// Attach an update stream: reconnect to a running match, or confirm a
    /// pairing game.
    pub fn connect(&mut self, id: &GameId, user: &str, tx: Channel) -> Result<ConnectionId, SessionError> {
        self.next_link += 1;
        let link = Link {
            id: ConnectionId(self.next_link),
            tx,
        };
        let conn = link.id;

        if let Some(m) = self.matches.get_mut(id) {
            let player = m.seat(user).ok_or(PairingError::NotAMember)?;
            let timers = self.pairing.timers_mut();
            let slot = m.slot_mut(player);
            let was_away = slot.link.is_none();
            slot.link = Some(link);
            if let Some(old) = slot.keepalive.take() {
                timers.cancel(old);
            }
            slot.keepalive = Some(timers.schedule(self.config.keepalive, keepalive(id, user)));
            info!(game = %id, user, "reconnected");
            if was_away {
                m.send(
                    player.opponent(),
                    Push::Reconnected {
                        reconnected: user.to_string(),
                    },
                );
            }
            m.send(player, m.state());
            return Ok(conn);
        }

        let hook_tx = link.tx.clone();
        let on_timeout: TimeoutHook = Box::new(move || {
            let _ = hook_tx.send(Push::Ended { winner: None });
        });
        match self.pairing.update(id, user, on_timeout)? {
            Update::Waiting => {
                debug!(game = %id, user, "waiting for an opponent");
                self.waiting.insert((id.clone(), user.to_string()), link);
            }
            Update::Paired(paired) => self.start(paired, link),
        }
        Ok(conn)
    }

    /// Apply a clicked cell from the side to move.
    pub fn notify(&mut self, id: &GameId, user: &str, pos: Pos) -> Result<(), SessionError> {
        let m = self.matches.get_mut(id).ok_or(PairingError::UnknownGame)?;
        let player = m.seat(user).ok_or(PairingError::NotAMember)?;
        if m.game.is_over() {
            return Err(SessionError::GameOver);
        }
        if m.game.turn() != player {
            return Err(SessionError::NotYourTurn);
        }
        m.game.notify(pos)?;
        m.last = Some(pos);
        debug!(game = %id, user, %pos, "played");

        if m.game.is_over() {
            self.finish(id);
            return Ok(());
        }
        m.broadcast(m.state());
        Ok(())
    }

    /// The user's update stream went away.
    pub fn disconnect(&mut self, id: &GameId, user: &str) -> Result<(), SessionError> {
        self.drop_link(id, user, None)
    }

    /// Like `disconnect`, but only if `conn` is still the user's stream.
    pub fn disconnect_stream(&mut self, id: &GameId, user: &str, conn: ConnectionId) -> Result<(), SessionError> {
        self.drop_link(id, user, Some(conn))
    }

    /// Forfeit a running match, or stop waiting for one.
    pub fn leave(&mut self, id: &GameId, user: &str) -> Result<(), SessionError> {
        if let Some(m) = self.matches.get_mut(id) {
            let player = m.seat(user).ok_or(PairingError::NotAMember)?;
            if m.game.is_over() {
                return Ok(());
            }
            m.game.forfeit(player);
            info!(game = %id, user, "forfeited");
            self.finish(id);
            return Ok(());
        }
        self.pairing.leave(id, user)?;
        self.waiting.remove(&(id.clone(), user.to_string()));
        Ok(())
    }

    /// Handle a delivered timer.
    pub fn on_timer(&mut self, timer: TimerId, event: TimerEvent) {
        self.pairing.timers_mut().fired(timer);
        match event {
            TimerEvent::JoinTimeout { .. } | TimerEvent::SearchTimeout { .. } => {
                if let Some(Expired::Join { game, user } | Expired::Search { game, user }) =
                    self.pairing.on_timer(timer, &event)
                {
                    self.waiting.remove(&(game, user));
                }
            }
            TimerEvent::ClockTick { game } => self.tick(timer, &game),
            TimerEvent::KeepAlive { game, user } => self.ping(timer, &game, &user),
            TimerEvent::Teardown { game } => {
                if self.matches.get(&game).is_some_and(|m| m.teardown == Some(timer)) {
                    self.close(&game);
                } else {
                    debug!(game = %game, "stale teardown timer");
                }
            }
        }
    }

    pub fn is_waiting(&self, id: &GameId, user: &str) -> bool {
        self.waiting.contains_key(&(id.clone(), user.to_string()))
    }

    pub fn is_live(&self, id: &GameId) -> bool {
        self.matches.contains_key(id)
    }

    pub fn game(&self, id: &GameId) -> Option<&Game> {
        self.matches.get(id).map(|m| &m.game)
    }

    /// Seconds left on a player's clock.
    pub fn clock(&self, id: &GameId, user: &str) -> Option<u32> {
        let m = self.matches.get(id)?;
        m.seat(user).map(|player| m.slot(player).clock)
    }

    pub fn is_connected(&self, id: &GameId, user: &str) -> Option<bool> {
        let m = self.matches.get(id)?;
        m.seat(user).map(|player| m.slot(player).link.is_some())
    }

    fn start(&mut self, paired: Paired, link: Link) {
        let Paired {
            id,
            connecting,
            searching,
            lobby,
        } = paired;
        let searcher_link = self.waiting.remove(&(id.clone(), searching.clone()));
        if searcher_link.is_none() {
            warn!(game = %id, user = %searching, "searcher has no update stream");
        }
        let clock = u32::try_from(self.config.clock.as_secs()).unwrap_or(u32::MAX);
        let slot = |user: String, link: Option<Link>| Slot {
            user,
            link,
            clock,
            keepalive: None,
        };
        let mut m = Match {
            lobby,
            slots: [slot(searching, searcher_link), slot(connecting, Some(link))],
            game: Game::new(lobby.size),
            last: None,
            clock: None,
            teardown: None,
        };

        let timers = self.pairing.timers_mut();
        for seat in m.slots.iter_mut().filter(|seat| seat.link.is_some()) {
            seat.keepalive = Some(timers.schedule(self.config.keepalive, keepalive(&id, &seat.user)));
        }
        m.clock = Some(timers.schedule(TICK, TimerEvent::ClockTick { game: id.clone() }));
        info!(
            game = %id,
            black = %m.slot(Player::Black).user,
            white = %m.slot(Player::White).user,
            lobby = %lobby,
            "match started"
        );
        m.broadcast(m.state());
        self.matches.insert(id, m);
    }

    /// Report a decided match and start its grace period.
    fn finish(&mut self, id: &GameId) {
        let Some(m) = self.matches.get_mut(id) else {
            return;
        };
        let Some(winner) = m.game.winner() else {
            return;
        };
        let timers = self.pairing.timers_mut();
        if let Some(clock) = m.clock.take() {
            timers.cancel(clock);
        }
        m.broadcast(m.state());

        let result = GameResult {
            lobby: m.lobby,
            winner: m.slot(winner).user.clone(),
            loser: m.slot(winner.opponent()).user.clone(),
        };
        info!(game = %id, winner = %result.winner, loser = %result.loser, "match over");
        if let Err(e) = self.results.record(&result) {
            warn!(game = %id, error = %e, "could not record result");
        }

        if m.all_disconnected() {
            self.close(id);
        } else {
            m.teardown = Some(timers.schedule(self.config.grace, TimerEvent::Teardown { game: id.clone() }));
        }
    }

    /// Drop a match and every timer it holds. Open streams end.
    fn close(&mut self, id: &GameId) {
        let Some(m) = self.matches.remove(id) else {
            return;
        };
        let timers = self.pairing.timers_mut();
        let held = m.slots.iter().map(|slot| slot.keepalive).chain([m.clock, m.teardown]);
        for timer in held.flatten() {
            timers.cancel(timer);
        }
        info!(game = %id, "match closed");
    }

    fn drop_link(&mut self, id: &GameId, user: &str, conn: Option<ConnectionId>) -> Result<(), SessionError> {
        if let Some(m) = self.matches.get_mut(id) {
            let player = m.seat(user).ok_or(PairingError::NotAMember)?;
            let slot = m.slot_mut(player);
            let current = slot.link.as_ref().map(|link| link.id);
            match (conn, current) {
                (_, None) => return Ok(()),
                (Some(conn), Some(current)) if conn != current => {
                    debug!(game = %id, user, "replaced stream closed");
                    return Ok(());
                }
                _ => {}
            }
            slot.link = None;
            if let Some(timer) = slot.keepalive.take() {
                self.pairing.timers_mut().cancel(timer);
            }
            info!(game = %id, user, "disconnected");
            m.send(
                player.opponent(),
                Push::Disconnected {
                    disconnected: user.to_string(),
                },
            );
            if m.game.is_over() && m.all_disconnected() {
                self.close(id);
            }
            return Ok(());
        }

        let key = (id.clone(), user.to_string());
        let parked = self.waiting.get(&key).map(|link| link.id);
        match parked {
            Some(parked) if conn.is_some_and(|conn| conn != parked) => Ok(()),
            Some(_) => {
                self.waiting.remove(&key);
                self.pairing.leave(id, user)?;
                info!(game = %id, user, "stopped waiting");
                Ok(())
            }
            None if self.pairing.contains(id, user) => Ok(()),
            None => Err(PairingError::UnknownGame.into()),
        }
    }

    fn tick(&mut self, timer: TimerId, id: &GameId) {
        let Some(m) = self.matches.get_mut(id) else {
            return;
        };
        if m.clock != Some(timer) {
            debug!(game = %id, "stale clock tick");
            return;
        }
        m.clock = None;
        let mover = m.game.turn();
        let slot = m.slot_mut(mover);
        slot.clock = slot.clock.saturating_sub(1);
        if slot.clock > 0 {
            m.clock = Some(
                self.pairing
                    .timers_mut()
                    .schedule(TICK, TimerEvent::ClockTick { game: id.clone() }),
            );
            return;
        }
        info!(game = %id, user = %slot.user, "out of time");
        m.game.forfeit(mover);
        self.finish(id);
    }

    fn ping(&mut self, timer: TimerId, id: &GameId, user: &str) {
        let Some(m) = self.matches.get_mut(id) else {
            return;
        };
        let Some(player) = m.seat(user) else {
            return;
        };
        let slot = m.slot_mut(player);
        if slot.keepalive != Some(timer) {
            debug!(game = %id, user, "stale keep-alive");
            return;
        }
        slot.keepalive = None;
        let alive = slot
            .link
            .as_ref()
            .is_some_and(|link| link.tx.send(Push::Ping).is_ok());
        if alive {
            slot.keepalive = Some(
                self.pairing
                    .timers_mut()
                    .schedule(self.config.keepalive, keepalive(id, user)),
            );
        } else if let Err(e) = self.disconnect(id, user) {
            debug!(game = %id, user, error = %e, "keep-alive found no stream");
        }
    }
}

impl SessionManager<VirtualClock> {
    /// Let `by` pass on the virtual clock, delivering every timer due.
    pub fn advance(&mut self, by: Duration) {
        let until = self.pairing.timers().now() + by;
        while let Some(fired) = self.pairing.timers_mut().next_due(until) {
            self.on_timer(fired.id, fired.event);
        }
        self.pairing.timers_mut().set_now(until);
    }
}

fn keepalive(id: &GameId, user: &str) -> TimerEvent {
    TimerEvent::KeepAlive {
        game: id.clone(),
        user: user.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dara_core::BoardSize;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (SessionManager<VirtualClock>, ResultLog) {
        let log = ResultLog::default();
        let session = SessionManager::new(VirtualClock::new(), SessionConfig::default(), Box::new(log.clone()));
        (session, log)
    }

    fn stream() -> (Channel, UnboundedReceiver<Push>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_first_connection_waits() {
        let (mut session, _) = session();
        let lobby = Lobby::new(3, BoardSize::STANDARD);
        let id = session.join("ann", lobby);
        let (tx, _rx) = stream();
        session.connect(&id, "ann", tx).unwrap();
        assert!(session.is_waiting(&id, "ann"));
        assert!(!session.is_live(&id));
    }

    #[test]
    fn test_pairing_starts_match_with_searcher_as_black() {
        let (mut session, _) = session();
        let lobby = Lobby::new(3, BoardSize::STANDARD);
        let id = session.join("ann", lobby);
        let (ann_tx, mut ann_rx) = stream();
        session.connect(&id, "ann", ann_tx).unwrap();
        assert_eq!(session.join("bo", lobby), id);
        let (bo_tx, mut bo_rx) = stream();
        session.connect(&id, "bo", bo_tx).unwrap();

        assert!(session.is_live(&id));
        assert!(!session.is_waiting(&id, "ann"));
        for rx in [&mut ann_rx, &mut bo_rx] {
            match rx.try_recv().unwrap() {
                Push::State(update) => assert_eq!(update.turn, "ann"),
                other => panic!("expected state, got {:?}", other),
            }
        }
        assert_eq!(session.clock(&id, "bo"), Some(300));
    }

    #[test]
    fn test_disconnect_of_unknown_game() {
        let (mut session, _) = session();
        assert!(matches!(
            session.disconnect(&GameId::from("missing"), "ann"),
            Err(SessionError::Pairing(PairingError::UnknownGame))
        ));
    }
}
