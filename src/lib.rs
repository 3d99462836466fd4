//! Offline-first arcade kiosk core
//!
//! The on-terminal half of a coin-operated, quiz-gated slot machine: a
//! budget-gated outcome engine, a durable SQLite store for game results and ad
//! impressions, and a background worker that reconciles both with the remote
//! backend whenever the network allows.

pub mod backend;
pub mod config;
pub mod engine;
pub mod kiosk;
pub mod storage;
pub mod sync;
pub mod types;
