//! Dining philosophers played out over TCP.
//!
//! Every philosopher is a peer with its own ring server, sitting between two
//! neighbors. A [`manager::Manager`] seats them, hands out neighbor pairs and
//! the initial token, waits for everyone to be ready, starts the dinner,
//! polls statistics and finally tells everyone it is time to die.

pub mod config;
pub mod connection;
pub mod control;
pub mod dining;
pub mod error;
pub mod log;
pub mod manager;
pub mod message;
pub mod philosopher;
pub mod ring;
pub mod state;
pub mod stats;
pub mod sync;

pub use error::{Error, Result};
