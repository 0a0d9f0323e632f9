//! Daemon-level flows against a real on-disk game database: discovery,
//! slot claims, replay protection, command ingestion and the resolution
//! step, with a publisher fake standing in for the relays.

use async_trait::async_trait;
use ec4x_core::configuration::DaemonConfig;
use ec4x_core::daemon::{ingest, resolve, Daemon, DaemonModel};
use ec4x_core::error::DaemonError;
use ec4x_core::game_setup::{bootstrap_game, GameSetup};
use ec4x_core::identity::Identity;
use ec4x_core::relay::{crypto, RelayEvent, RelayPublisher, KIND_GAME_DEFINITION, KIND_SLOT_CLAIM, KIND_TURN_COMMAND, KIND_TURN_STATE};
use ec4x_domain::config::BUILTIN_CONFIG;
use ec4x_domain::{GameId, HouseId};
use ec4x_store::{GameBmc, GameDb};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingPublisher {
    events: Mutex<Vec<RelayEvent>>,
}

#[async_trait]
impl RelayPublisher for CollectingPublisher {
    async fn publish(&self, event: RelayEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl CollectingPublisher {
    fn kinds(&self) -> Vec<u32> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

async fn daemon_with_game() -> (Daemon, Arc<CollectingPublisher>, GameId, tempfile::TempDir) {
    let data_dir = tempfile::tempdir().unwrap();
    let game_id = GameId("crusade-1".into());
    let game_dir = data_dir.path().join("games").join(&game_id.0);
    std::fs::create_dir_all(&game_dir).unwrap();

    let state = bootstrap_game(
        &BUILTIN_CONFIG,
        GameSetup {
            game_id: game_id.clone(),
            name: "Crusade".into(),
            description: String::new(),
            house_names: vec!["Atreides".into(), "Harkonnen".into()],
            rings: 2,
        },
    )
    .unwrap();
    let db = GameDb::open(&game_dir).await.unwrap();
    GameBmc::create(&db, &state).await.unwrap();

    let publisher = Arc::new(CollectingPublisher::default());
    let config = DaemonConfig {
        data_dir: data_dir.path().to_path_buf(),
        ..DaemonConfig::default()
    };
    let model = DaemonModel::new(
        config,
        Arc::new(BUILTIN_CONFIG.clone()),
        Identity::generate(),
        publisher.clone(),
        None,
    );
    let mut daemon = Daemon::new(model);
    daemon.discover_games().await.unwrap();
    assert!(daemon.model.games.contains_key(&game_id));

    (daemon, publisher, game_id, data_dir)
}

fn slot_claim(player: &Identity, game_id: &GameId, invite: &str) -> RelayEvent {
    RelayEvent::sign(
        player,
        KIND_SLOT_CLAIM,
        vec![
            vec!["g".into(), game_id.0.clone()],
            vec!["invite".into(), invite.into()],
        ],
        String::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn slot_claim_binds_pubkey_and_answers_with_state() {
    let (mut daemon, publisher, game_id, _dir) = daemon_with_game().await;
    let before = publisher.count(); // discovery already announced the game

    let invite = daemon
        .model
        .games
        .get(&game_id)
        .unwrap()
        .open_invites
        .keys()
        .next()
        .unwrap()
        .clone();
    let player = Identity::generate();
    let claim = slot_claim(&player, &game_id, &invite);

    let outcome = ingest::handle_event(&mut daemon.model, claim.clone()).await.unwrap();
    assert!(outcome.is_none());

    // pubkey bound in the state blob
    let db = daemon.model.open_game_db(&game_id).await.unwrap();
    let state = GameBmc::load_state(&db).await.unwrap();
    let bound: Vec<&str> = state
        .houses
        .iter()
        .filter(|h| h.is_bound())
        .map(|h| h.nostr_pubkey.as_str())
        .collect();
    assert_eq!(bound, vec![player.public_hex().as_str()]);

    // one encrypted state for the claimant plus a roster update
    let new_kinds: Vec<u32> = publisher.kinds()[before..].to_vec();
    assert!(new_kinds.contains(&KIND_TURN_STATE));
    assert!(new_kinds.contains(&KIND_GAME_DEFINITION));

    // replayed claim: dropped, no writes, no publications
    let count_after_claim = publisher.count();
    let replay = ingest::handle_event(&mut daemon.model, claim).await;
    assert!(matches!(replay, Err(DaemonError::Replay(_))));
    assert_eq!(publisher.count(), count_after_claim);
}

#[tokio::test]
async fn wrong_invite_is_rejected() {
    let (mut daemon, _publisher, game_id, _dir) = daemon_with_game().await;
    let player = Identity::generate();
    let claim = slot_claim(&player, &game_id, "no-such-code");
    let result = ingest::handle_event(&mut daemon.model, claim).await;
    assert!(matches!(result, Err(DaemonError::InviteMismatch(_))));
}

#[tokio::test]
async fn commands_from_unbound_pubkeys_never_trigger_resolution() {
    let (mut daemon, _publisher, game_id, _dir) = daemon_with_game().await;
    let stranger = Identity::generate();
    let daemon_pubkey = daemon.model.identity.public_hex();

    let content = crypto::encrypt(&stranger, &daemon_pubkey, b"orders turn=1 house=1 { }").unwrap();
    let command = RelayEvent::sign(
        &stranger,
        KIND_TURN_COMMAND,
        vec![
            vec!["g".into(), game_id.0.clone()],
            vec!["t".into(), "1".into()],
        ],
        content,
    )
    .unwrap();

    let result = ingest::handle_event(&mut daemon.model, command).await;
    assert!(matches!(result, Err(DaemonError::InviteMismatch(_))));
}

#[tokio::test]
async fn full_turn_flow_over_the_wire() {
    let (mut daemon, publisher, game_id, _dir) = daemon_with_game().await;

    // both players claim their slots
    let invites: Vec<(String, HouseId)> = daemon
        .model
        .games
        .get(&game_id)
        .unwrap()
        .open_invites
        .iter()
        .map(|(code, house)| (code.clone(), *house))
        .collect();
    let mut players = Vec::new();
    for (code, house_id) in &invites {
        let player = Identity::generate();
        ingest::handle_event(&mut daemon.model, slot_claim(&player, &game_id, code))
            .await
            .unwrap();
        players.push((player, *house_id));
    }

    // first player's orders: not everyone in yet, no resolution
    let daemon_pubkey = daemon.model.identity.public_hex();
    let (first, first_house) = &players[0];
    let orders_text = format!("orders turn=1 house={first_house} {{ }}");
    let content = crypto::encrypt(first, &daemon_pubkey, orders_text.as_bytes()).unwrap();
    let command = RelayEvent::sign(
        first,
        KIND_TURN_COMMAND,
        vec![
            vec!["g".into(), game_id.0.clone()],
            vec!["t".into(), "1".into()],
        ],
        content,
    )
    .unwrap();
    let outcome = ingest::handle_event(&mut daemon.model, command).await.unwrap();
    assert!(outcome.is_none());

    // second player's orders complete the roster and mark readiness
    let (second, second_house) = &players[1];
    let orders_text = format!("orders turn=1 house={second_house} {{ }}");
    let content = crypto::encrypt(second, &daemon_pubkey, orders_text.as_bytes()).unwrap();
    let command = RelayEvent::sign(
        second,
        KIND_TURN_COMMAND,
        vec![
            vec!["g".into(), game_id.0.clone()],
            vec!["t".into(), "1".into()],
        ],
        content,
    )
    .unwrap();
    let outcome = ingest::handle_event(&mut daemon.model, command).await.unwrap();
    assert_eq!(outcome, Some(game_id.clone()));

    let before = publisher.count();
    resolve::resolve_game(&mut daemon.model, &game_id).await.unwrap();

    // the game advanced and every bound player got an encrypted snapshot
    assert_eq!(daemon.model.games.get(&game_id).unwrap().turn, 2);
    let new_events: Vec<RelayEvent> = publisher.events.lock().unwrap()[before..].to_vec();
    let states: Vec<&RelayEvent> = new_events.iter().filter(|e| e.kind == KIND_TURN_STATE).collect();
    assert_eq!(states.len(), 2);

    // each snapshot decrypts for its player and nobody else
    for (player, house_id) in &players {
        let ours: Vec<&&RelayEvent> = states
            .iter()
            .filter(|e| e.tag("h") == Some(house_id.to_string().as_str()))
            .collect();
        assert_eq!(ours.len(), 1);
        let plaintext = crypto::decrypt(player, &daemon.model.identity.public_hex(), &ours[0].content).unwrap();
        let view: ec4x_domain::PlayerState = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(view.house.id, *house_id);
        assert_eq!(view.turn, 2);
    }
}
