//! Inbound event handling: the verification pipeline of the transport
//! contract (signature, replay set, turn tag, decrypt), then slot claims
//! and turn commands. Returns the game id when a completed ingestion made
//! the game ready to resolve.

use crate::daemon::{resolve, DaemonModel};
use crate::error::DaemonError;
use crate::relay::{crypto, envelope, RelayEvent};
use crate::rules::visibility;
use anyhow::{Context, Result};
use ec4x_domain::{orders, GameId, HouseId};
use ec4x_store::{CommandBmc, Direction, GameBmc, GameDb, RelayLogBmc};
use tracing::{event, Level};

pub async fn handle_event(model: &mut DaemonModel, relay_event: RelayEvent) -> Result<Option<GameId>, DaemonError> {
    relay_event.verify().map_err(|error| DaemonError::Crypto {
        event_id: relay_event.short_id().to_string(),
        reason: format!("{error:#}"),
    })?;

    let game_id = relay_event
        .game_id()
        .ok_or_else(|| DaemonError::Transport("event carries no game tag".into()))?;
    if !model.games.contains_key(&game_id) {
        return Err(DaemonError::UnknownGame(game_id.0));
    }

    let db = model.open_game_db(&game_id).await.map_err(DaemonError::Persistence)?;

    if RelayLogBmc::has_seen(&db, &game_id, relay_event.kind, &relay_event.id, Direction::Inbound)
        .await
        .map_err(DaemonError::Persistence)?
    {
        return Err(DaemonError::Replay(relay_event.short_id().to_string()));
    }

    let outcome = match relay_event.kind {
        envelope::KIND_SLOT_CLAIM => handle_slot_claim(model, &db, &game_id, &relay_event).await.map(|_| None),
        envelope::KIND_TURN_COMMAND => handle_turn_command(model, &db, &game_id, &relay_event).await,
        other => Err(DaemonError::Transport(format!("unexpected inbound kind {other}"))),
    }?;

    let turn = relay_event.turn().unwrap_or(0);
    RelayLogBmc::record(&db, &game_id, relay_event.kind, &relay_event.id, Direction::Inbound, turn)
        .await
        .map_err(DaemonError::Persistence)?;

    Ok(outcome)
}

async fn handle_slot_claim(
    model: &mut DaemonModel,
    db: &GameDb,
    game_id: &GameId,
    relay_event: &RelayEvent,
) -> Result<(), DaemonError> {
    let invite = relay_event
        .invite_code()
        .ok_or_else(|| DaemonError::InviteMismatch("claim carries no invite tag".into()))?
        .to_string();

    let house_id = model
        .games
        .get(game_id)
        .and_then(|game| game.open_invites.get(&invite).copied())
        .ok_or_else(|| DaemonError::InviteMismatch(format!("invite \"{invite}\" unknown or already claimed")))?;

    let mut state = GameBmc::load_state(db).await.map_err(DaemonError::Persistence)?;
    {
        let house = state
            .houses
            .get_mut(house_id)
            .ok_or_else(|| DaemonError::InviteMismatch(format!("invite \"{invite}\" points at a missing house")))?;
        if !house.nostr_pubkey.is_empty() {
            return Err(DaemonError::InviteMismatch(format!("house {house_id} already claimed")));
        }
        house.nostr_pubkey = relay_event.pubkey.clone();
    }
    GameBmc::save_state(db, &state).await.map_err(DaemonError::Persistence)?;

    if let Some(game) = model.games.get_mut(game_id) {
        game.open_invites.remove(&invite);
        game.bound.insert(house_id, relay_event.pubkey.clone());
    }
    event!(Level::INFO, game = %game_id, house = %house_id, "slot claimed");

    // the new player immediately gets a view and the roster update goes out
    let view = visibility::derive_player_state(&state, &model.game_config, house_id).map_err(DaemonError::Persistence)?;
    resolve::publish_player_state(model, db, &state, house_id, &view).await;
    resolve::publish_game_definition(model, &state).await;
    Ok(())
}

async fn handle_turn_command(
    model: &mut DaemonModel,
    db: &GameDb,
    game_id: &GameId,
    relay_event: &RelayEvent,
) -> Result<Option<GameId>, DaemonError> {
    let game_turn = model.games.get(game_id).map(|g| g.turn).unwrap_or(0);
    let event_turn = relay_event
        .turn()
        .ok_or_else(|| DaemonError::Transport("turn command carries no turn tag".into()))?;
    if event_turn != game_turn {
        return Err(DaemonError::TurnMismatch { event_turn, game_turn });
    }

    let plaintext = crypto::decrypt(&model.identity, &relay_event.pubkey, &relay_event.content).map_err(|error| {
        DaemonError::Crypto {
            event_id: relay_event.short_id().to_string(),
            reason: format!("{error:#}"),
        }
    })?;
    let text = String::from_utf8(plaintext)
        .map_err(|_| DaemonError::Transport("command payload is not UTF-8".into()))?;
    let packet =
        orders::parse_orders(&text).map_err(|error| DaemonError::Transport(format!("unparseable orders: {error:#}")))?;

    // the signer must own the house it is ordering around
    let bound_house = model
        .games
        .get(game_id)
        .and_then(|game| game.pubkey_house(&relay_event.pubkey));
    if bound_house != Some(packet.house_id) {
        return Err(DaemonError::InviteMismatch(format!(
            "pubkey not bound to house {}",
            packet.house_id
        )));
    }
    if packet.turn != game_turn {
        return Err(DaemonError::TurnMismatch {
            event_turn: packet.turn,
            game_turn,
        });
    }

    CommandBmc::store_packet(db, game_id, &packet).await.map_err(DaemonError::Persistence)?;
    event!(Level::INFO, game = %game_id, house = %packet.house_id, turn = packet.turn, "turn command stored");

    readiness(model, db, game_id, game_turn).await.map_err(DaemonError::Persistence)
}

/// All bound houses in, turn resolves. Zero bound houses never auto-fires.
async fn readiness(model: &DaemonModel, db: &GameDb, game_id: &GameId, turn: u32) -> Result<Option<GameId>> {
    let bound: Vec<HouseId> = model
        .games
        .get(game_id)
        .map(|game| game.bound.keys().copied().collect())
        .unwrap_or_default();
    if bound.is_empty() {
        return Ok(None);
    }
    let pending = CommandBmc::houses_with_pending(db, game_id, turn).await?;
    let all_in = bound.iter().all(|house_id| pending.contains(house_id));
    Ok(all_in.then(|| game_id.clone()))
}

/// Filesystem drop-in used by local tooling: orders files beside the game
/// database, consumed on ingestion. Returns true when the game became
/// ready.
pub async fn ingest_dropin_orders(model: &mut DaemonModel, game_id: &GameId) -> Result<bool> {
    let Some(game) = model.games.get(game_id) else {
        return Ok(false);
    };
    let houses_dir = game.dir.join("houses");
    if !houses_dir.is_dir() {
        return Ok(false);
    }
    let game_turn = game.turn;

    let mut ingested = false;
    let mut paths: Vec<_> = std::fs::read_dir(&houses_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.ends_with("_orders_pending.kdl"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Ok(false);
    }
    let db = model.open_game_db(game_id).await?;

    for path in paths {
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        match orders::parse_orders(&text) {
            Ok(packet) if packet.turn == game_turn => {
                CommandBmc::store_packet(&db, game_id, &packet).await?;
                ingested = true;
                event!(Level::INFO, game = %game_id, house = %packet.house_id, "drop-in orders ingested from {}", path.display());
            }
            Ok(packet) => {
                event!(Level::WARN, game = %game_id, "drop-in orders for turn {} ignored (game at {})", packet.turn, game_turn);
            }
            Err(error) => {
                event!(Level::WARN, game = %game_id, "unparseable drop-in orders {}: {error:#}", path.display());
            }
        }
        let _ = std::fs::remove_file(&path);
    }

    if !ingested {
        return Ok(false);
    }
    Ok(readiness(model, &db, game_id, game_turn).await?.is_some())
}
