//! The turn-resolution step of the daemon: load, resolve, commit in one
//! transaction, publish per-player states, prune the replay log. The
//! resolving flag makes the step idempotent against double triggers; a
//! resolver failure clears it and leaves the previous turn intact.

use crate::daemon::DaemonModel;
use crate::relay::{crypto, envelope, state_tags, RelayEvent};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use ec4x_domain::{GameConfig, GameId, GamePhase, GameState, HouseId, PlayerState};
use ec4x_store::{encode_player_state, CommandBmc, Direction, EventBmc, GameBmc, GameDb, RelayLogBmc, SnapshotBmc};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{event, Level};

pub async fn resolve_game(model: &mut DaemonModel, game_id: &GameId) -> Result<()> {
    if model.resolving.contains(game_id) {
        event!(Level::DEBUG, game = %game_id, "resolution already in flight, proposal dropped");
        return Ok(());
    }
    model.resolving.insert(game_id.clone());
    let result = resolve_inner(model, game_id).await;
    model.resolving.remove(game_id);
    result
}

async fn resolve_inner(model: &mut DaemonModel, game_id: &GameId) -> Result<()> {
    let db = model.open_game_db(game_id).await?;
    let state = GameBmc::load_state(&db).await?;
    if state.phase == GamePhase::Completed {
        event!(Level::INFO, game = %game_id, "game already completed, nothing to resolve");
        return Ok(());
    }
    let resolved_turn = state.turn;
    let packets = CommandBmc::load_pending_packets(&db, game_id, resolved_turn).await?;

    let outcome = crate::rules::resolve_turn(state, &packets, &model.game_config)
        .with_context(|| format!("resolver failed for game {game_id} turn {resolved_turn}"))?;

    let mut new_state = outcome.state;
    let phase_changed = new_state.phase == GamePhase::Completed;
    if !phase_changed {
        let hours = model.game_config.progression.deadline_hours;
        new_state.turn_deadline = Some(Utc::now() + ChronoDuration::hours(hours));
    } else {
        new_state.turn_deadline = None;
    }

    let mut snapshots: BTreeMap<HouseId, Vec<u8>> = BTreeMap::new();
    for (house_id, view) in &outcome.views {
        snapshots.insert(*house_id, encode_player_state(view)?);
    }

    GameBmc::commit_turn(&db, &new_state, resolved_turn, &outcome.events, &snapshots).await?;
    event!(
        Level::INFO,
        game = %game_id,
        turn = resolved_turn,
        events = outcome.events.len(),
        "turn committed"
    );

    // publish each bound player's encrypted snapshot
    for (house_id, view) in &outcome.views {
        publish_player_state(model, &db, &new_state, *house_id, view).await;
    }
    if phase_changed {
        publish_game_definition(model, &new_state).await;
    }

    cleanup_retention(model, &db, game_id, new_state.turn).await;

    if let Some(game) = model.games.get_mut(game_id) {
        game.turn = new_state.turn;
        game.phase = new_state.phase.to_string();
        game.turn_deadline = new_state.turn_deadline;
    }
    Ok(())
}

/// Manual resolve path used by `ec4xd resolve`: identical to the automatic
/// step from loading onward, minus relays.
pub async fn resolve_once(data_dir: &Path, game_id: &str, game_config: &GameConfig) -> Result<u32> {
    let game_dir = data_dir.join("games").join(game_id);
    let db = GameDb::open(&game_dir).await?;
    let state = GameBmc::load_state(&db).await?;
    let game_id = state.game_id.clone();
    let resolved_turn = state.turn;
    let packets = CommandBmc::load_pending_packets(&db, &game_id, resolved_turn).await?;

    let outcome = crate::rules::resolve_turn(state, &packets, game_config)?;

    let mut snapshots = BTreeMap::new();
    for (house_id, view) in &outcome.views {
        snapshots.insert(*house_id, encode_player_state(view)?);
    }
    GameBmc::commit_turn(&db, &outcome.state, resolved_turn, &outcome.events, &snapshots).await?;
    Ok(outcome.state.turn)
}

pub async fn publish_player_state(model: &DaemonModel, db: &GameDb, state: &GameState, house_id: HouseId, view: &PlayerState) {
    let Some(pubkey) = model
        .games
        .get(&state.game_id)
        .and_then(|game| game.bound.get(&house_id))
        .cloned()
    else {
        return;
    };

    let result: Result<()> = async {
        let plaintext = serde_json::to_vec(view)?;
        let content = crypto::encrypt(&model.identity, &pubkey, &plaintext)?;
        let relay_event = RelayEvent::sign(
            &model.identity,
            envelope::KIND_TURN_STATE,
            state_tags(&state.game_id, state.turn, house_id),
            content,
        )?;
        RelayLogBmc::record(db, &state.game_id, relay_event.kind, &relay_event.id, Direction::Outbound, state.turn).await?;
        model.publisher.publish(relay_event).await?;
        Ok(())
    }
    .await;

    if let Err(error) = result {
        event!(Level::WARN, game = %state.game_id, house = %house_id, "publishing player state failed: {error:#}");
    }
}

/// Public announcement: roster names and invite codes, no pubkeys, plain
/// JSON content.
pub async fn publish_game_definition(model: &DaemonModel, state: &GameState) {
    let roster: Vec<_> = state
        .houses
        .iter()
        .filter(|house| house.is_playing())
        .map(|house| {
            json!({
                "houseId": house.id.0,
                "name": house.name,
                "inviteCode": if house.is_bound() { String::new() } else { house.invite_code.clone() },
                "claimed": house.is_bound(),
            })
        })
        .collect();
    let content = json!({
        "gameId": state.game_id.0,
        "name": state.name,
        "description": state.description,
        "phase": state.phase.to_string(),
        "turn": state.turn,
        "houses": roster,
    })
    .to_string();

    let result: Result<()> = async {
        let relay_event = RelayEvent::sign(
            &model.identity,
            envelope::KIND_GAME_DEFINITION,
            crate::relay::game_tags(&state.game_id),
            content,
        )?;
        model.publisher.publish(relay_event).await?;
        Ok(())
    }
    .await;

    if let Err(error) = result {
        event!(Level::WARN, game = %state.game_id, "publishing game definition failed: {error:#}");
    }
}

async fn cleanup_retention(model: &DaemonModel, db: &GameDb, game_id: &GameId, current_turn: u32) {
    let config = &model.config;
    if let Err(error) = RelayLogBmc::prune(
        db,
        game_id,
        current_turn,
        config.replay_retention_turns,
        config.replay_retention_days,
        config.replay_retention_days_definition,
        config.replay_retention_days_state,
    )
    .await
    {
        event!(Level::WARN, game = %game_id, "replay log pruning failed: {error:#}");
    }

    let event_cutoff = current_turn.saturating_sub(config.replay_retention_turns.max(1) * 4);
    if event_cutoff > 0 {
        if let Err(error) = EventBmc::prune_before_turn(db, game_id, event_cutoff).await {
            event!(Level::WARN, game = %game_id, "event pruning failed: {error:#}");
        }
    }
    let snapshot_cutoff = current_turn.saturating_sub(config.replay_retention_turns.max(1) * 2);
    if snapshot_cutoff > 0 {
        if let Err(error) = SnapshotBmc::prune_before_turn(db, game_id, snapshot_cutoff).await {
            event!(Level::WARN, game = %game_id, "snapshot pruning failed: {error:#}");
        }
    }
}
