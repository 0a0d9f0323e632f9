pub mod commands;
pub mod config;
pub mod events;
pub mod ids;
pub mod intel;
mod kdl_util;
pub mod model;
pub mod ops;
pub mod orders;
pub mod starmap;
pub mod state;
pub mod store;
pub mod tech;

pub use commands::*;
pub use config::{load_game_config, GameConfig};
pub use events::*;
pub use ids::*;
pub use intel::*;
pub use model::*;
pub use starmap::{HexCoord, JumpLane, LaneClass, Starmap};
pub use state::{GameState, STATE_BLOB_VERSION};
pub use store::{EntityStore, MultiIndex, StoreError};
pub use tech::{TechField, TechTree};
