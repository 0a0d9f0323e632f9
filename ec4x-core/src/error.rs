//! Daemon error taxonomy. Everything here is recoverable for the daemon
//! as a whole; per-kind policy (log level, whether state changed) lives
//! with the handlers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("transport: {0}")]
    Transport(String),

    /// Signature or AEAD failure; logged with the event id prefix, event
    /// dropped.
    #[error("crypto [{event_id}]: {reason}")]
    Crypto { event_id: String, reason: String },

    /// Event id already processed in this direction; silently dropped.
    #[error("replay of event {0}")]
    Replay(String),

    #[error("turn mismatch: event for turn {event_turn}, game at turn {game_turn}")]
    TurnMismatch { event_turn: u32, game_turn: u32 },

    #[error("invite mismatch: {0}")]
    InviteMismatch(String),

    #[error("unknown game {0}")]
    UnknownGame(String),

    /// Database or serialization failure; fatal for the current operation,
    /// the daemon keeps managing other games.
    #[error("persistence: {0}")]
    Persistence(#[from] anyhow::Error),
}
