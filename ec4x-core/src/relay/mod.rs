pub mod client;
pub mod crypto;
pub mod envelope;

pub use client::{game_filter, RelayClient, RelayInbound, RelayPublisher};
pub use envelope::{
    game_tags, state_tags, turn_tags, RelayEvent, KIND_GAME_DEFINITION, KIND_SLOT_CLAIM, KIND_TURN_COMMAND,
    KIND_TURN_STATE,
};
