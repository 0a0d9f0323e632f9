//! Deterministic turn resolution. One call to [`resolve_turn`] runs the
//! full phase cycle - Command, Conflict, Maintenance - then settles
//! prestige, checks victory, and derives the per-house views. The function
//! owns its input state and never suspends; the daemon treats it as a
//! black box between two database transactions.

pub mod combat;
pub mod command;
pub mod conflict;
pub mod maintenance;
pub mod rng;
pub mod routes;
pub mod visibility;

use anyhow::{bail, Result};
use ec4x_domain::{
    CommandPacket, EventType, GameConfig, GameEvent, GamePhase, GameState, HouseId, PlayerState, ResearchAllocation,
};
use std::collections::BTreeMap;
use tracing::{event, Level};

/// Scratch space threaded through the phases of one resolution.
pub struct Resolution<'a> {
    pub config: &'a GameConfig,
    /// The turn being resolved (the state's counter before advancement).
    pub turn: u32,
    pub events: Vec<GameEvent>,
    /// Direct prestige awards collected as phases run; merged with the
    /// event-derived deltas in the closing pass.
    pub prestige: BTreeMap<HouseId, i64>,
    /// Research points banked by the Command phase, invested during
    /// Maintenance.
    pub research: BTreeMap<HouseId, ResearchAllocation>,
    /// Counter-intelligence budget for this turn, raising espionage
    /// defense rolls.
    pub cip_budget: BTreeMap<HouseId, i64>,
    /// Validated espionage actions awaiting the Conflict phase.
    pub espionage: BTreeMap<HouseId, Vec<ec4x_domain::EspionageOrder>>,
}

impl<'a> Resolution<'a> {
    pub fn new(config: &'a GameConfig, turn: u32) -> Self {
        Self {
            config,
            turn,
            events: Vec::new(),
            prestige: BTreeMap::new(),
            research: BTreeMap::new(),
            cip_budget: BTreeMap::new(),
            espionage: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn award(&mut self, house: HouseId, delta: i64) {
        if delta != 0 {
            *self.prestige.entry(house).or_insert(0) += delta;
        }
    }
}

pub struct TurnOutcome {
    pub state: GameState,
    pub events: Vec<GameEvent>,
    pub views: BTreeMap<HouseId, PlayerState>,
}

/// Resolves one turn. Houses absent from `packets` are treated as having
/// submitted empty orders (their missed-order counters advance).
pub fn resolve_turn(
    mut state: GameState,
    packets: &BTreeMap<HouseId, CommandPacket>,
    config: &GameConfig,
) -> Result<TurnOutcome> {
    if state.phase == GamePhase::Completed {
        bail!("game {} is completed; no further turns resolve", state.game_id);
    }
    let turn = state.turn;
    event!(Level::INFO, game = %state.game_id, turn, "resolving turn");

    let mut ctx = Resolution::new(config, turn);

    command::run(&mut state, packets, &mut ctx)?;
    conflict::run(&mut state, &mut ctx)?;
    maintenance::run(&mut state, &mut ctx)?;
    settle_prestige_and_victory(&mut state, &mut ctx)?;

    let problems = state.validate();
    if !problems.is_empty() {
        bail!(
            "invariant break after resolving turn {turn} of {}: {}",
            state.game_id,
            problems.join("; ")
        );
    }

    ctx.push(
        GameEvent::new(turn, EventType::TurnResolved, format!("turn {turn} resolved"))
            .details_json(format!("{{\"nextTurn\":{}}}", state.turn)),
    );

    state.last_turn_events = ctx.events.clone();

    let mut views = BTreeMap::new();
    for house_id in state.active_houses() {
        views.insert(house_id, visibility::derive_player_state(&state, config, house_id)?);
    }

    Ok(TurnOutcome {
        state,
        events: ctx.events,
        views,
    })
}

/// Prestige delta a finished event log entry is worth to whom.
fn event_prestige(event: &GameEvent, config: &GameConfig) -> Vec<(HouseId, i64)> {
    let p = &config.prestige;
    match event.event_type {
        EventType::ResearchAdvanced => event.house_id.map(|h| (h, p.tech_advance)).into_iter().collect(),
        EventType::ColonyFounded => event.house_id.map(|h| (h, p.colony_founded)).into_iter().collect(),
        EventType::ColonyCaptured => {
            let mut deltas = Vec::new();
            if let Some(source) = event.source_house_id {
                deltas.push((source, p.colony_captured));
            }
            if let Some(target) = event.target_house_id {
                deltas.push((target, p.colony_lost));
            }
            deltas
        }
        EventType::InvasionRepelled => event.target_house_id.map(|h| (h, p.invasion_repelled)).into_iter().collect(),
        EventType::StarbaseDestroyed => event.source_house_id.map(|h| (h, p.starbase_destroyed)).into_iter().collect(),
        EventType::EspionageSuccess => event.source_house_id.map(|h| (h, p.espionage_success)).into_iter().collect(),
        EventType::EspionageDetected => event.source_house_id.map(|h| (h, p.espionage_exposed)).into_iter().collect(),
        EventType::PactViolation => event.source_house_id.map(|h| (h, p.pact_violation)).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn settle_prestige_and_victory(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let config = ctx.config;
    let mut ledger = ctx.prestige.clone();

    for event in &ctx.events {
        for (house, delta) in event_prestige(event, config) {
            *ledger.entry(house).or_insert(0) += delta;
        }
    }

    for house_id in state.active_houses() {
        *ledger.entry(house_id).or_insert(0) += config.prestige.turn_survived;
    }
    // colonies with neither ground forces nor a working starbase invite
    // raids and cost standing
    for colony in state.colonies.iter() {
        let has_garrison = !colony.ground_unit_ids.is_empty();
        let has_base = colony.kastra_ids.iter().any(|k| {
            state
                .kastra
                .get(*k)
                .map(|b| b.state != ec4x_domain::ShipState::Destroyed)
                .unwrap_or(false)
        });
        if !has_garrison && !has_base {
            if state.houses.get(colony.owner).map(|h| h.is_playing()).unwrap_or(false) {
                *ledger.entry(colony.owner).or_insert(0) += config.prestige.undefended_colony;
            }
        }
    }

    for (house_id, delta) in &ledger {
        let Some(house) = state.houses.get_mut(*house_id) else {
            continue;
        };
        if !house.is_playing() || *delta == 0 {
            continue;
        }
        house.prestige += delta;
        ctx.events.push(
            GameEvent::new(ctx.turn, EventType::PrestigeAwarded, format!("prestige {delta:+}"))
                .house(*house_id)
                .details_json(format!("{{\"delta\":{delta}}}")),
        );
    }

    // victory progress: +1 exactly when at or above the bar this turn
    let mut prestige_winner = None;
    for house_id in state.active_houses() {
        let Some(house) = state.houses.get_mut(house_id) else {
            continue;
        };
        if house.prestige >= config.prestige.victory_threshold {
            house.prestige_victory_progress += 1;
        } else {
            house.prestige_victory_progress = 0;
        }
        if house.prestige < 0 {
            house.negative_prestige_turns += 1;
        } else {
            house.negative_prestige_turns = 0;
        }
        if house.negative_prestige_turns >= config.limits.collapse_negative_prestige_turns
            && matches!(house.status, ec4x_domain::HouseStatus::Active | ec4x_domain::HouseStatus::Autopilot)
        {
            house.status = ec4x_domain::HouseStatus::DefensiveCollapse;
            ctx.events.push(
                GameEvent::new(
                    ctx.turn,
                    EventType::HouseStatusChanged,
                    format!("house {house_id} collapses under sustained disgrace"),
                )
                .house(house_id),
            );
        }
        if house.prestige_victory_progress >= config.prestige.victory_consecutive_turns && prestige_winner.is_none() {
            prestige_winner = Some(house_id);
        }
    }

    // elimination: nothing left to play with
    let doomed: Vec<HouseId> = state
        .active_houses()
        .into_iter()
        .filter(|house_id| {
            let has_colony = state.colonies.iter().any(|c| c.owner == *house_id);
            let has_ships = !state.ship_index.by_house.get(*house_id).is_empty();
            !has_colony && !has_ships
        })
        .collect();
    for house_id in doomed {
        let enemies: Vec<HouseId> = state
            .active_houses()
            .into_iter()
            .filter(|other| *other != house_id && state.are_hostile(*other, house_id))
            .collect();
        for enemy in enemies {
            let bounty = config.prestige.house_eliminated;
            if let Some(house) = state.houses.get_mut(enemy) {
                house.prestige += bounty;
            }
        }
        ec4x_domain::ops::eliminate_house(state, house_id, ctx.turn)?;
        ctx.events.push(
            GameEvent::new(ctx.turn, EventType::HouseEliminated, format!("house {house_id} eliminated"))
                .house(house_id),
        );
    }

    let survivors = state.active_houses();
    let game_over = if let Some(winner) = prestige_winner {
        ctx.events.push(
            GameEvent::new(ctx.turn, EventType::PrestigeVictory, format!("house {winner} achieves prestige victory"))
                .house(winner),
        );
        true
    } else if survivors.len() <= 1 && state.houses.len() > 1 {
        if let Some(winner) = survivors.first() {
            ctx.events.push(
                GameEvent::new(ctx.turn, EventType::GameCompleted, format!("house {winner} stands alone")).house(*winner),
            );
        }
        true
    } else if state.turn > config.progression.turn_limit {
        let winner = state
            .houses
            .iter()
            .filter(|h| h.is_playing())
            .max_by_key(|h| (h.prestige, std::cmp::Reverse(h.id)))
            .map(|h| h.id);
        if let Some(winner) = winner {
            ctx.events.push(
                GameEvent::new(
                    ctx.turn,
                    EventType::GameCompleted,
                    format!("turn limit reached; house {winner} leads on prestige"),
                )
                .house(winner),
            );
        }
        true
    } else {
        false
    };

    if game_over {
        state.phase = GamePhase::Completed;
        if !ctx.events.iter().any(|e| e.event_type == EventType::GameCompleted) {
            ctx.events
                .push(GameEvent::new(ctx.turn, EventType::GameCompleted, "game completed"));
        }
    }

    Ok(())
}
