use crate::db::GameDb;
use anyhow::Result;
use chrono::{Duration, Utc};
use ec4x_domain::GameId;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Replay-protection set over relay event ids (the `nostr_event_log`
/// table). An event id recorded Inbound is processed at most once across
/// reconnects and crashes.
pub struct RelayLogBmc;

impl RelayLogBmc {
    pub async fn has_seen(db: &GameDb, game_id: &GameId, kind: u32, event_id: &str, direction: Direction) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM nostr_event_log WHERE game_id = ?1 AND kind = ?2 AND event_id = ?3 AND direction = ?4",
        )
        .bind(&game_id.0)
        .bind(kind as i64)
        .bind(event_id)
        .bind(direction.to_string())
        .fetch_optional(db.pool())
        .await?;
        Ok(row.is_some())
    }

    pub async fn record(db: &GameDb, game_id: &GameId, kind: u32, event_id: &str, direction: Direction, turn: u32) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO nostr_event_log (game_id, kind, event_id, direction, turn, recorded_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (game_id, kind, event_id, direction) DO NOTHING
            "#,
        )
        .bind(&game_id.0)
        .bind(kind as i64)
        .bind(event_id)
        .bind(direction.to_string())
        .bind(turn as i64)
        .bind(Utc::now())
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Retention pass run after each resolution. Entries age out by turn
    /// and by wall-clock days, with dedicated day windows for the long
    /// lived Game Definition (30400) and Turn State (30403) kinds.
    pub async fn prune(
        db: &GameDb,
        game_id: &GameId,
        current_turn: u32,
        retention_turns: u32,
        retention_days: i64,
        retention_days_definition: i64,
        retention_days_state: i64,
    ) -> Result<u64> {
        let turn_cutoff = current_turn.saturating_sub(retention_turns);
        let mut pruned = 0;

        let result = sqlx::query("DELETE FROM nostr_event_log WHERE game_id = ?1 AND turn < ?2")
            .bind(&game_id.0)
            .bind(turn_cutoff as i64)
            .execute(db.pool())
            .await?;
        pruned += result.rows_affected();

        for (kinds, days) in [
            ("kind NOT IN (30400, 30403)", retention_days),
            ("kind = 30400", retention_days_definition),
            ("kind = 30403", retention_days_state),
        ] {
            let cutoff = Utc::now() - Duration::days(days);
            let result = sqlx::query(&format!(
                "DELETE FROM nostr_event_log WHERE game_id = ?1 AND {kinds} AND recorded_at < ?2"
            ))
            .bind(&game_id.0)
            .bind(cutoff)
            .execute(db.pool())
            .await?;
            pruned += result.rows_affected();
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GameDb;

    #[tokio::test]
    async fn replayed_event_ids_are_detected() {
        let db = GameDb::open_in_memory().await.unwrap();
        let game_id = GameId("g1".into());
        let event_id = "e".repeat(64);

        assert!(!RelayLogBmc::has_seen(&db, &game_id, 30402, &event_id, Direction::Inbound).await.unwrap());

        RelayLogBmc::record(&db, &game_id, 30402, &event_id, Direction::Inbound, 4).await.unwrap();
        assert!(RelayLogBmc::has_seen(&db, &game_id, 30402, &event_id, Direction::Inbound).await.unwrap());

        // same id outbound is a distinct entry
        assert!(!RelayLogBmc::has_seen(&db, &game_id, 30402, &event_id, Direction::Outbound).await.unwrap());

        // double record is a no-op, not an error
        RelayLogBmc::record(&db, &game_id, 30402, &event_id, Direction::Inbound, 4).await.unwrap();
    }

    #[tokio::test]
    async fn prune_ages_out_by_turn() {
        let db = GameDb::open_in_memory().await.unwrap();
        let game_id = GameId("g1".into());
        RelayLogBmc::record(&db, &game_id, 30402, "old", Direction::Inbound, 1).await.unwrap();
        RelayLogBmc::record(&db, &game_id, 30402, "new", Direction::Inbound, 9).await.unwrap();

        RelayLogBmc::prune(&db, &game_id, 10, 5, 365, 365, 365).await.unwrap();

        assert!(!RelayLogBmc::has_seen(&db, &game_id, 30402, "old", Direction::Inbound).await.unwrap());
        assert!(RelayLogBmc::has_seen(&db, &game_id, 30402, "new", Direction::Inbound).await.unwrap());
    }
}
