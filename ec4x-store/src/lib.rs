pub mod blob;
pub mod command_bmc;
pub mod db;
pub mod event_bmc;
pub mod game_bmc;
pub mod relay_log_bmc;
pub mod snapshot_bmc;

pub use blob::{decode_player_state, decode_state, encode_player_state, encode_state};
pub use command_bmc::{assemble_packet, explode_packet, CommandBmc, OrderParams};
pub use db::{is_game_dir, GameDb, GAME_DB_FILE};
pub use event_bmc::EventBmc;
pub use game_bmc::{GameBmc, GameMeta};
pub use relay_log_bmc::{Direction, RelayLogBmc};
pub use snapshot_bmc::SnapshotBmc;
