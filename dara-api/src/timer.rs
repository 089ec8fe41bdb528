//! Cancellable timers.
//!
//! Pairing and sessions never sleep themselves. They ask a [`Scheduler`] to
//! deliver a [`TimerEvent`] later and get a [`TimerId`] back. The owner
//! stores the id next to the state the timer guards, cancels it when that
//! state changes, and ignores any delivered event whose id it no longer holds.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::pairing::GameId;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimerId(u64);

/// What a timer means when it fires.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TimerEvent {
    /// A joined user did not confirm in time.
    JoinTimeout { game: GameId, user: String },
    /// A searching user found no opponent in time.
    SearchTimeout { game: GameId, user: String },
    /// One second of the mover's clock elapsed.
    ClockTick { game: GameId },
    /// Time to ping a player's push channel.
    KeepAlive { game: GameId, user: String },
    /// Grace period after the end of a match ran out.
    Teardown { game: GameId },
}

/// A timer that went off.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Fired {
    pub id: TimerId,
    pub event: TimerEvent,
}

pub trait Scheduler {
    /// Deliver `event` after `delay`.
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId;

    /// Stop a timer. Unknown or already fired ids are ignored.
    fn cancel(&mut self, id: TimerId);

    /// Told when a timer has been delivered, so its bookkeeping can go.
    fn fired(&mut self, _id: TimerId) {}
}

// =============================================================================
// Tokio
// =============================================================================

/// Real timers: one sleeping task per timer, fired events go to a channel
/// that a single dispatcher drains.
pub struct TokioScheduler {
    next: u64,
    tx: mpsc::UnboundedSender<Fired>,
    tasks: HashMap<TimerId, AbortHandle>,
}

impl TokioScheduler {
    pub fn new() -> (TokioScheduler, mpsc::UnboundedReceiver<Fired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler {
            next: 0,
            tx,
            tasks: HashMap::new(),
        };
        (scheduler, rx)
    }

    /// Timers scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId {
        self.next += 1;
        let id = TimerId(self.next);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The dispatcher is gone only during shutdown.
            let _ = tx.send(Fired { id, event });
        });
        self.tasks.insert(id, task.abort_handle());
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }

    fn fired(&mut self, id: TimerId) {
        self.tasks.remove(&id);
    }
}

// =============================================================================
// Virtual clock
// =============================================================================

/// Manual time for tests: nothing fires until the clock is advanced.
#[derive(Default, Debug)]
pub struct VirtualClock {
    now: Duration,
    next: u64,
    queue: BTreeMap<(Duration, TimerId), TimerEvent>,
    due: HashMap<TimerId, Duration>,
}

impl VirtualClock {
    pub fn new() -> VirtualClock {
        VirtualClock::default()
    }

    /// Time elapsed since the clock was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.due.contains_key(&id)
    }

    pub fn pending(&self) -> usize {
        self.due.len()
    }

    /// Pending events, earliest first.
    pub fn pending_events(&self) -> Vec<TimerEvent> {
        self.queue.values().cloned().collect()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its deadline.
    pub fn next_due(&mut self, until: Duration) -> Option<Fired> {
        let (&(at, id), _) = self.queue.iter().next()?;
        if at > until {
            return None;
        }
        let event = self.queue.remove(&(at, id))?;
        self.due.remove(&id);
        self.now = self.now.max(at);
        Some(Fired { id, event })
    }

    /// Move the clock forward without firing anything.
    pub fn set_now(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }
}

impl Scheduler for VirtualClock {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId {
        self.next += 1;
        let id = TimerId(self.next);
        let at = self.now + delay;
        self.queue.insert((at, id), event);
        self.due.insert(id, at);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(at) = self.due.remove(&id) {
            self.queue.remove(&(at, id));
        }
    }
}
