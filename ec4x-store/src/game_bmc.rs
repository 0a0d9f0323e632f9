use crate::blob::{decode_state, encode_state};
use crate::db::GameDb;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use ec4x_domain::{GameEvent, GameId, GameState, HouseId};
use sqlx::Row;
use std::collections::BTreeMap;

/// The cheap metadata row, loadable without touching the state blob.
#[derive(Debug, Clone, PartialEq)]
pub struct GameMeta {
    pub id: GameId,
    pub name: String,
    pub description: String,
    pub turn: u32,
    pub phase: String,
    pub turn_deadline: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub struct GameBmc;

impl GameBmc {
    /// First write of a freshly created game.
    pub async fn create(db: &GameDb, state: &GameState) -> Result<()> {
        let blob = encode_state(state)?;
        sqlx::query(
            r#"
INSERT INTO games (id, name, description, turn, phase, turn_deadline, state_blob, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&state.game_id.0)
        .bind(&state.name)
        .bind(&state.description)
        .bind(state.turn as i64)
        .bind(state.phase.to_string())
        .bind(state.turn_deadline)
        .bind(blob)
        .bind(Utc::now())
        .execute(db.pool())
        .await?;
        Ok(())
    }

    pub async fn load_meta(db: &GameDb) -> Result<Option<GameMeta>> {
        let row = sqlx::query(
            "SELECT id, name, description, turn, phase, turn_deadline, updated_at FROM games LIMIT 1",
        )
        .fetch_optional(db.pool())
        .await?;

        Ok(row.map(|row| GameMeta {
            id: GameId(row.get("id")),
            name: row.get("name"),
            description: row.get("description"),
            turn: row.get::<i64, _>("turn") as u32,
            phase: row.get("phase"),
            turn_deadline: row.get("turn_deadline"),
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn load_state(db: &GameDb) -> Result<GameState> {
        let row = sqlx::query("SELECT state_blob FROM games LIMIT 1")
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| anyhow!("game database {} holds no game row", db.path().display()))?;

        let mut state = decode_state(row.get::<Vec<u8>, _>("state_blob").as_slice())?;
        state.db_path = Some(db.path().to_path_buf());
        Ok(state)
    }

    /// Persists the state outside the turn pipeline (slot claims mutate the
    /// blob without resolving a turn).
    pub async fn save_state(db: &GameDb, state: &GameState) -> Result<()> {
        let blob = encode_state(state)?;
        sqlx::query(
            "UPDATE games SET name = ?2, turn = ?3, phase = ?4, turn_deadline = ?5, state_blob = ?6, updated_at = ?7 WHERE id = ?1",
        )
        .bind(&state.game_id.0)
        .bind(&state.name)
        .bind(state.turn as i64)
        .bind(state.phase.to_string())
        .bind(state.turn_deadline)
        .bind(blob)
        .bind(Utc::now())
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Commits one resolved turn atomically: the successor state, the event
    /// batch, processed-marks on the consumed commands, and one snapshot
    /// row per house. Either the whole new turn becomes visible or none of
    /// it does.
    pub async fn commit_turn(
        db: &GameDb,
        state: &GameState,
        resolved_turn: u32,
        events: &[GameEvent],
        snapshots: &BTreeMap<HouseId, Vec<u8>>,
    ) -> Result<()> {
        let blob = encode_state(state)?;
        let mut tx = db.pool().begin().await?;

        sqlx::query(
            "UPDATE games SET turn = ?2, phase = ?3, turn_deadline = ?4, state_blob = ?5, updated_at = ?6 WHERE id = ?1",
        )
        .bind(&state.game_id.0)
        .bind(state.turn as i64)
        .bind(state.phase.to_string())
        .bind(state.turn_deadline)
        .bind(blob)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for event in events {
            sqlx::query(
                r#"
INSERT INTO game_events (game_id, turn, event_type, house_id, fleet_id, system_id, description, event_data)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&state.game_id.0)
            .bind(event.turn as i64)
            .bind(event.event_type.to_string())
            .bind(event.house_id.map(|h| h.0 as i64))
            .bind(event.fleet_id.map(|f| f.0 as i64))
            .bind(event.system_id.map(|s| s.0 as i64))
            .bind(&event.description)
            .bind(event.details.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE commands SET processed = 1 WHERE game_id = ?1 AND turn = ?2 AND processed = 0")
            .bind(&state.game_id.0)
            .bind(resolved_turn as i64)
            .execute(&mut *tx)
            .await?;

        for (house_id, blob) in snapshots {
            sqlx::query(
                r#"
INSERT INTO player_state_snapshots (game_id, house_id, turn, state_blob)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (game_id, house_id, turn) DO UPDATE SET state_blob = excluded.state_blob
                "#,
            )
            .bind(&state.game_id.0)
            .bind(house_id.0 as i64)
            .bind(state.turn as i64)
            .bind(blob.as_slice())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec4x_domain::{EventType, GamePhase};

    #[tokio::test]
    async fn create_load_round_trip() {
        let db = GameDb::open_in_memory().await.unwrap();
        let state = GameState::new(GameId("g1".into()), "Crusade".into(), "integration".into());

        GameBmc::create(&db, &state).await.unwrap();

        let meta = GameBmc::load_meta(&db).await.unwrap().unwrap();
        assert_eq!(meta.id, GameId("g1".into()));
        assert_eq!(meta.turn, 1);

        let mut loaded = GameBmc::load_state(&db).await.unwrap();
        loaded.db_path = None; // runtime-only field
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn commit_turn_is_atomic_and_marks_commands() {
        let db = GameDb::open_in_memory().await.unwrap();
        let mut state = GameState::new(GameId("g1".into()), "Crusade".into(), String::new());
        GameBmc::create(&db, &state).await.unwrap();

        state.turn = 2;
        state.phase = GamePhase::Command;
        let events = vec![GameEvent::new(1, EventType::TurnResolved, "turn 1 resolved")];
        let snapshots = BTreeMap::from([(HouseId(1), vec![1u8, 2, 3])]);

        GameBmc::commit_turn(&db, &state, 1, &events, &snapshots).await.unwrap();

        let meta = GameBmc::load_meta(&db).await.unwrap().unwrap();
        assert_eq!(meta.turn, 2);
    }
}
