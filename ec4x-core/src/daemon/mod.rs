//! The daemon supervisor: a single-threaded, message-driven state machine.
//! Every mutation of the model goes through a [`Proposal`] drained by
//! [`Daemon::process`]; the async select loop only multiplexes relay I/O,
//! the tick interval, and shutdown onto that queue.

pub mod ingest;
pub mod resolve;

use crate::configuration::DaemonConfig;
use crate::identity::Identity;
use crate::relay::{game_filter, RelayClient, RelayEvent, RelayInbound, RelayPublisher};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ec4x_domain::{GameConfig, GameId, HouseId};
use ec4x_store::{GameBmc, GameDb};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

/// Cached per-game bookkeeping so the hot paths (readiness checks, turn
/// tags) never deserialize the state blob.
#[derive(Debug, Clone)]
pub struct ManagedGame {
    pub game_id: GameId,
    pub dir: PathBuf,
    pub turn: u32,
    pub phase: String,
    pub turn_deadline: Option<DateTime<Utc>>,
    /// House -> bound pubkey (hex), only claimed slots.
    pub bound: BTreeMap<HouseId, String>,
    /// Unclaimed invite codes.
    pub open_invites: BTreeMap<String, HouseId>,
}

impl ManagedGame {
    pub fn pubkey_house(&self, pubkey: &str) -> Option<HouseId> {
        self.bound
            .iter()
            .find(|(_, bound)| bound.as_str() == pubkey)
            .map(|(house_id, _)| *house_id)
    }
}

pub struct DaemonModel {
    pub config: DaemonConfig,
    pub game_config: Arc<GameConfig>,
    pub identity: Identity,
    pub games: BTreeMap<GameId, ManagedGame>,
    pub resolving: BTreeSet<GameId>,
    pub publisher: Arc<dyn RelayPublisher>,
    relay: Option<Arc<RelayClient>>,
    shutdown: bool,
}

impl DaemonModel {
    pub fn new(
        config: DaemonConfig,
        game_config: Arc<GameConfig>,
        identity: Identity,
        publisher: Arc<dyn RelayPublisher>,
        relay: Option<Arc<RelayClient>>,
    ) -> Self {
        Self {
            config,
            game_config,
            identity,
            games: BTreeMap::new(),
            resolving: BTreeSet::new(),
            publisher,
            relay,
            shutdown: false,
        }
    }

    pub async fn open_game_db(&self, game_id: &GameId) -> Result<GameDb> {
        let game = self
            .games
            .get(game_id)
            .with_context(|| format!("game {game_id} is not managed"))?;
        GameDb::open(&game.dir).await
    }
}

#[derive(Debug)]
pub enum Proposal {
    Tick,
    Inbound(RelayEvent),
    ResolveTurn(GameId),
    Shutdown,
}

pub struct Daemon {
    pub model: DaemonModel,
    queue: VecDeque<Proposal>,
}

impl Daemon {
    pub fn new(model: DaemonModel) -> Self {
        Self {
            model,
            queue: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, proposal: Proposal) {
        self.queue.push_back(proposal);
    }

    /// Dequeues and runs one proposal. Acceptors may enqueue follow-ups.
    pub async fn process(&mut self) -> Result<bool> {
        let Some(proposal) = self.queue.pop_front() else {
            return Ok(false);
        };
        match proposal {
            Proposal::Tick => {
                if let Err(error) = self.tick().await {
                    event!(Level::WARN, "tick failed: {error:#}");
                }
            }
            Proposal::Inbound(relay_event) => {
                let short = relay_event.short_id().to_string();
                match ingest::handle_event(&mut self.model, relay_event).await {
                    Ok(Some(ready_game)) => self.queue.push_back(Proposal::ResolveTurn(ready_game)),
                    Ok(None) => {}
                    Err(error) => error.log(&short),
                }
            }
            Proposal::ResolveTurn(game_id) => {
                if let Err(error) = resolve::resolve_game(&mut self.model, &game_id).await {
                    event!(Level::ERROR, game = %game_id, "turn resolution failed: {error:#}");
                }
            }
            Proposal::Shutdown => {
                self.model.shutdown = true;
            }
        }
        Ok(true)
    }

    async fn tick(&mut self) -> Result<()> {
        self.discover_games().await?;
        self.ingest_local_orders().await;
        self.check_deadlines();
        Ok(())
    }

    /// Walks the data directory for game databases and registers each new
    /// one: cache the roster, subscribe on the relays, announce the game.
    pub async fn discover_games(&mut self) -> Result<()> {
        let games_dir = self.model.config.games_dir();
        if !games_dir.is_dir() {
            return Ok(());
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&games_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| ec4x_store::is_game_dir(path))
            .collect();
        entries.sort();

        for dir in entries {
            let db = match GameDb::open(&dir).await {
                Ok(db) => db,
                Err(error) => {
                    event!(Level::WARN, dir = %dir.display(), "skipping unopenable game database: {error:#}");
                    continue;
                }
            };
            let Some(meta) = GameBmc::load_meta(&db).await? else {
                event!(Level::WARN, dir = %dir.display(), "game database without a game row");
                continue;
            };

            let known = self.model.games.contains_key(&meta.id);
            if known {
                // refresh the cheap columns only
                if let Some(game) = self.model.games.get_mut(&meta.id) {
                    game.turn = meta.turn;
                    game.phase = meta.phase.clone();
                    game.turn_deadline = meta.turn_deadline;
                }
                continue;
            }

            let state = GameBmc::load_state(&db).await?;
            let mut managed = ManagedGame {
                game_id: meta.id.clone(),
                dir: dir.clone(),
                turn: meta.turn,
                phase: meta.phase.clone(),
                turn_deadline: meta.turn_deadline,
                bound: BTreeMap::new(),
                open_invites: BTreeMap::new(),
            };
            for house in state.houses.iter().filter(|h| h.is_playing()) {
                if house.is_bound() {
                    managed.bound.insert(house.id, house.nostr_pubkey.clone());
                } else if !house.invite_code.is_empty() {
                    managed.open_invites.insert(house.invite_code.clone(), house.id);
                }
            }

            event!(Level::INFO, game = %meta.id, turn = meta.turn, "discovered game");
            if let Some(relay) = &self.model.relay {
                relay
                    .subscribe(format!("ec4x-{}", meta.id), game_filter(&meta.id.0))
                    .await;
            }
            resolve::publish_game_definition(&self.model, &state).await;
            self.model.games.insert(meta.id.clone(), managed);
        }
        Ok(())
    }

    /// Localhost drop-in path: `houses/{houseId}_orders_pending.kdl` files
    /// are ingested as if they had arrived over a relay, then removed.
    async fn ingest_local_orders(&mut self) {
        let games: Vec<GameId> = self.model.games.keys().cloned().collect();
        for game_id in games {
            match ingest::ingest_dropin_orders(&mut self.model, &game_id).await {
                Ok(true) => self.queue.push_back(Proposal::ResolveTurn(game_id)),
                Ok(false) => {}
                Err(error) => {
                    event!(Level::WARN, game = %game_id, "drop-in order ingestion failed: {error:#}")
                }
            }
        }
    }

    /// Deadline policy: once the deadline passes, the turn resolves with
    /// whatever orders are in; silent houses get empty packets.
    fn check_deadlines(&mut self) {
        let now = Utc::now();
        for (game_id, game) in &self.model.games {
            if self.model.resolving.contains(game_id) || game.bound.is_empty() {
                continue;
            }
            if let Some(deadline) = game.turn_deadline {
                if now >= deadline {
                    event!(Level::INFO, game = %game_id, "turn deadline reached, forcing resolution");
                    self.queue.push_back(Proposal::ResolveTurn(game_id.clone()));
                }
            }
        }
    }

    /// Main loop: one async select over tick, relay inbound, and ctrl-c,
    /// feeding the proposal queue; proposals run strictly one at a time.
    pub async fn run(mut self, mut inbound: RelayInbound) -> Result<()> {
        let mut tick = tokio::time::interval(Duration::from_secs(self.model.config.poll_interval_secs.max(1)));
        self.enqueue(Proposal::Tick);

        loop {
            while self.process().await? {}
            if self.model.shutdown {
                break;
            }

            tokio::select! {
                _ = tick.tick() => self.enqueue(Proposal::Tick),
                maybe_event = inbound.rx.recv() => match maybe_event {
                    Some(relay_event) => self.enqueue(Proposal::Inbound(relay_event)),
                    None => self.enqueue(Proposal::Shutdown),
                },
                _ = tokio::signal::ctrl_c() => {
                    event!(Level::INFO, "shutdown signal received, draining");
                    self.enqueue(Proposal::Shutdown);
                }
            }
        }

        event!(Level::INFO, "daemon stopped");
        Ok(())
    }
}

impl crate::error::DaemonError {
    /// Per-kind logging policy from the error table: replays are silent,
    /// crypto failures carry the event id prefix, the rest warn.
    pub fn log(&self, event_id_prefix: &str) {
        use crate::error::DaemonError::*;
        match self {
            Replay(_) => event!(Level::DEBUG, "duplicate event {event_id_prefix} dropped"),
            Crypto { .. } => event!(Level::WARN, "{self}"),
            TurnMismatch { .. } | InviteMismatch(_) | UnknownGame(_) => {
                event!(Level::WARN, "[{event_id_prefix}] {self}")
            }
            Transport(_) => event!(Level::WARN, "[{event_id_prefix}] {self}"),
            Persistence(_) => event!(Level::ERROR, "[{event_id_prefix}] {self:#}"),
        }
    }
}
