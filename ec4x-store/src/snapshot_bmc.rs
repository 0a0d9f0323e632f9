use crate::db::GameDb;
use anyhow::Result;
use ec4x_domain::{GameId, HouseId};
use sqlx::Row;

pub struct SnapshotBmc;

/// Per-player view blobs, retained independently of the replay log so
/// clients can catch up after downtime.
impl SnapshotBmc {
    pub async fn load(db: &GameDb, game_id: &GameId, house_id: HouseId, turn: u32) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            "SELECT state_blob FROM player_state_snapshots WHERE game_id = ?1 AND house_id = ?2 AND turn = ?3",
        )
        .bind(&game_id.0)
        .bind(house_id.0 as i64)
        .bind(turn as i64)
        .fetch_optional(db.pool())
        .await?;
        Ok(row.map(|r| r.get("state_blob")))
    }

    pub async fn latest_turn(db: &GameDb, game_id: &GameId, house_id: HouseId) -> Result<Option<u32>> {
        let row = sqlx::query(
            "SELECT MAX(turn) AS turn FROM player_state_snapshots WHERE game_id = ?1 AND house_id = ?2",
        )
        .bind(&game_id.0)
        .bind(house_id.0 as i64)
        .fetch_one(db.pool())
        .await?;
        Ok(row.get::<Option<i64>, _>("turn").map(|t| t as u32))
    }

    pub async fn prune_before_turn(db: &GameDb, game_id: &GameId, cutoff_turn: u32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM player_state_snapshots WHERE game_id = ?1 AND turn < ?2")
            .bind(&game_id.0)
            .bind(cutoff_turn as i64)
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
