pub mod cli_args;
pub mod configuration;
pub mod daemon;
pub mod error;
pub mod game_setup;
pub mod identity;
pub mod relay;
pub mod rules;

pub use error::DaemonError;
pub use rules::{resolve_turn, TurnOutcome};
