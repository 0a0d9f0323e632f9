use crate::db::GameDb;
use anyhow::Result;
use ec4x_domain::GameId;
use sqlx::Row;

pub struct EventBmc;

/// Audit-log access. Inserts happen inside `GameBmc::commit_turn`; this Bmc
/// covers reads and retention.
impl EventBmc {
    pub async fn descriptions_for_turn(db: &GameDb, game_id: &GameId, turn: u32) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT description FROM game_events WHERE game_id = ?1 AND turn = ?2 ORDER BY id")
            .bind(&game_id.0)
            .bind(turn as i64)
            .fetch_all(db.pool())
            .await?;
        Ok(rows.iter().map(|row| row.get("description")).collect())
    }

    pub async fn count(db: &GameDb, game_id: &GameId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM game_events WHERE game_id = ?1")
            .bind(&game_id.0)
            .fetch_one(db.pool())
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn prune_before_turn(db: &GameDb, game_id: &GameId, cutoff_turn: u32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM game_events WHERE game_id = ?1 AND turn < ?2")
            .bind(&game_id.0)
            .bind(cutoff_turn as i64)
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
