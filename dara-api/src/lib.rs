//! Dara match server: pairing, live sessions and the HTTP surface.
//!
//! Everything that mutates game state lives in [`session::SessionManager`],
//! a plain value the server keeps behind one mutex. Timers are injected via
//! [`timer::Scheduler`], so the same code runs on tokio in the server and on
//! a virtual clock in tests.

pub mod config;
pub mod pairing;
pub mod push;
pub mod routes;
pub mod session;
pub mod store;
pub mod timer;

pub use pairing::{GameId, Lobby, Pairing, PairingError};
pub use session::{SessionConfig, SessionError, SessionManager};
