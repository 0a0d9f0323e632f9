//! Conflict phase: fleet movement along jump lanes, combat at contested
//! systems, espionage resolution, then post-combat cleanup (blockades,
//! salvage, empty fleets) and diplomatic fallout.

use crate::rules::combat::{self, EngagementOutcome, SystemBattle};
use crate::rules::rng::TurnRng;
use crate::rules::{routes, visibility, Resolution};
use anyhow::Result;
use ec4x_domain::ops;
use ec4x_domain::{
    CargoKind, DiplomaticRelation, DiplomaticState, EspionageKind, EventType, FleetCommand, FleetId, FleetStatus,
    GameEvent, GameState, HouseId, RetreatPolicy, ShipClass, SystemId, TechField, ViolationRecord,
};
use itertools::Itertools;

pub fn run(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    auto_retreat_overrides(state, ctx);
    movement(state, ctx)?;
    routes::refresh_fallback_routes(state, ctx.config);
    escalate_aggression(state, ctx);
    combat_pass(state, ctx)?;
    colonize_pass(state, ctx)?;
    scout_pass(state, ctx);
    espionage_pass(state, ctx);
    cleanup_pass(state, ctx)?;
    Ok(())
}

fn house_attack_at(state: &GameState, system_id: SystemId, house: HouseId) -> f64 {
    state
        .fleets_at(system_id)
        .iter()
        .filter(|f| f.house_id == house && f.status == FleetStatus::Active)
        .flat_map(|f| f.ships.iter())
        .filter_map(|s| state.ships.get(*s))
        .map(|ship| ship.stats.attack as f64)
        .sum()
}

/// Auto-retreat policy check before movement: outmatched fleets override
/// their command with SeekHome when doctrine allows.
fn auto_retreat_overrides(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        if fleet.status != FleetStatus::Active || fleet.command == FleetCommand::SeekHome {
            continue;
        }
        let allowed = match fleet.retreat_policy {
            RetreatPolicy::Never => false,
            RetreatPolicy::MissionsOnly => !fleet.command.is_mission(),
            RetreatPolicy::Conservative | RetreatPolicy::Aggressive => true,
        };
        if !allowed {
            continue;
        }
        let own = house_attack_at(state, fleet.location, fleet.house_id);
        let hostile: f64 = state
            .fleets_at(fleet.location)
            .iter()
            .map(|f| f.house_id)
            .unique()
            .filter(|h| state.are_hostile(*h, fleet.house_id))
            .map(|h| house_attack_at(state, fleet.location, h))
            .sum();
        if hostile <= 0.0 {
            continue;
        }
        let threshold = (10 - fleet.roe.min(10)) as f64 * ctx.config.combat.retreat_threshold_millis_per_roe as f64 / 1000.0;
        // Aggressive doctrine only breaks off when truly overwhelmed
        let threshold = if fleet.retreat_policy == RetreatPolicy::Aggressive {
            threshold / 2.0
        } else {
            threshold
        };
        if own / hostile < threshold {
            if let Some(target) = state.fleets.get_mut(fleet_id) {
                target.command = FleetCommand::SeekHome;
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::FleetRetreated, format!("fleet {fleet_id} falls back on standing orders"))
                    .house(fleet.house_id)
                    .fleet(fleet_id)
                    .system(fleet.location),
            );
        }
    }
}

fn movement(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        if fleet.status != FleetStatus::Active {
            continue;
        }

        let destination = match fleet.command {
            FleetCommand::SeekHome => {
                let route = fleet
                    .fallback_route
                    .clone()
                    .or_else(|| routes::compute_fallback_route(state, ctx.config, &fleet));
                match route {
                    Some(route) => {
                        if let Some(target) = state.fleets.get_mut(fleet_id) {
                            target.fallback_route = Some(route.clone());
                        }
                        route.path.last().copied()
                    }
                    None => {
                        ctx.push(
                            GameEvent::new(ctx.turn, EventType::MovementFailed, format!("fleet {fleet_id} has nowhere safe to fall back to"))
                                .house(fleet.house_id)
                                .fleet(fleet_id)
                                .system(fleet.location),
                        );
                        continue;
                    }
                }
            }
            FleetCommand::JoinFleet { fleet: target_id } => match state.fleets.get(target_id) {
                Some(target) => Some(target.location),
                None => {
                    // target destroyed mid-turn: stale target, stand down
                    if let Some(target) = state.fleets.get_mut(fleet_id) {
                        target.command = FleetCommand::Hold;
                    }
                    ctx.push(
                        GameEvent::new(ctx.turn, EventType::CommandFailed, format!("fleet {fleet_id} join target no longer exists"))
                            .house(fleet.house_id)
                            .fleet(fleet_id),
                    );
                    continue;
                }
            },
            other => other.destination(),
        };

        let Some(destination) = destination else {
            continue;
        };
        // re-read: the SeekHome arm may have stored a fresh route
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        if destination == fleet.location {
            if matches!(fleet.command, FleetCommand::Move { .. }) {
                if let Some(target) = state.fleets.get_mut(fleet_id) {
                    target.command = FleetCommand::Hold;
                }
            }
            continue;
        }

        let path = match fleet.command {
            // retreat follows the precomputed corridor
            FleetCommand::SeekHome => fleet
                .fallback_route
                .as_ref()
                .map(|route| route.path.clone())
                .filter(|path| path.contains(&fleet.location)),
            _ => routes::shortest_safe_path(state, fleet.house_id, fleet.location, destination),
        };

        let next_hop = path.as_ref().and_then(|path| {
            let here = path.iter().position(|s| *s == fleet.location)?;
            path.get(here + 1).copied()
        });

        match next_hop {
            Some(next) if state.starmap.are_adjacent(fleet.location, next) => {
                let from = fleet.location;
                ops::move_fleet(state, fleet_id, next)?;
                if next == destination {
                    if let Some(target) = state.fleets.get_mut(fleet_id) {
                        if matches!(target.command, FleetCommand::Move { .. } | FleetCommand::SeekHome) {
                            target.command = FleetCommand::Hold;
                        }
                    }
                }
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::FleetMoved, format!("fleet {fleet_id} moved {from} -> {next}"))
                        .house(fleet.house_id)
                        .fleet(fleet_id)
                        .system(next),
                );
            }
            _ => {
                ctx.push(
                    GameEvent::new(
                        ctx.turn,
                        EventType::MovementFailed,
                        format!("fleet {fleet_id} found no lane toward system {destination}"),
                    )
                    .house(fleet.house_id)
                    .fleet(fleet_id)
                    .system(fleet.location),
                );
            }
        }
    }
    Ok(())
}

fn mark_violation(state: &mut GameState, ctx: &mut Resolution<'_>, aggressor: HouseId, victim: HouseId, description: String) {
    let current = state.relation(aggressor, victim);
    let violations = current.violations + 1;
    let escalate_to_enemy = violations >= ctx.config.diplomacy.violations_to_enemy;
    state.set_relation(
        aggressor,
        victim,
        DiplomaticRelation {
            state: if escalate_to_enemy { DiplomaticState::Enemy } else { DiplomaticState::Hostile },
            since_turn: ctx.turn,
            violations,
        },
    );
    state
        .violation_history
        .entry(aggressor)
        .or_default()
        .push(ViolationRecord {
            turn: ctx.turn,
            against: victim,
            description: description.clone(),
        });
    ctx.push(
        GameEvent::new(ctx.turn, EventType::PactViolation, description)
            .source(aggressor)
            .target(victim),
    );
}

/// Mission commands against a neutral house's colony break the peace
/// before the shooting starts.
fn escalate_aggression(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        if !fleet.command.is_mission() {
            continue;
        }
        let Some(target_system) = fleet.command.destination() else {
            continue;
        };
        if fleet.location != target_system {
            continue;
        }
        let Some(owner) = state.colony_at(target_system).map(|c| c.owner) else {
            continue;
        };
        if owner == fleet.house_id {
            continue;
        }
        if state.relation(fleet.house_id, owner).state == DiplomaticState::Neutral {
            mark_violation(
                state,
                ctx,
                fleet.house_id,
                owner,
                format!("house {} moved against neutral house {} at system {}", fleet.house_id, owner, target_system),
            );
        }
    }
}

fn combat_pass(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let system_ids: Vec<SystemId> = state.systems.ids().collect();
    for system_id in system_ids {
        let battles = combat::hostile_pairs_at(state, system_id);
        let mut fought: Vec<(HouseId, HouseId)> = Vec::new();
        let mut rng = TurnRng::new(&state.game_id, ctx.turn, "conflict", &format!("system-{system_id}"));

        for battle in battles {
            fought.push((battle.attacker, battle.defender));
            let result = combat::resolve_space_combat(state, ctx.config, &battle, &mut rng, &mut ctx.events, ctx.turn);
            ctx.award(battle.attacker, ctx.config.prestige.ship_destroyed * result.attacker_kills as i64);
            ctx.award(battle.defender, ctx.config.prestige.ship_destroyed * result.defender_kills as i64);

            let winner = match result.outcome {
                EngagementOutcome::AttackerHolds | EngagementOutcome::DefenderRetreated => Some(battle.attacker),
                EngagementOutcome::DefenderHolds | EngagementOutcome::AttackerRetreated => Some(battle.defender),
                EngagementOutcome::MutualAttrition => None,
            };
            if let Some(winner) = winner {
                ctx.award(winner, ctx.config.prestige.combat_victory);
            }

            if winner == Some(battle.attacker) {
                resolve_orbit_and_ground(state, ctx, &battle, &mut rng)?;
            }
        }

        // missions against a colony with no fleet screen skip straight to
        // the orbital phase
        if let Some(owner) = state.colony_at(system_id).map(|c| c.owner) {
            let uncontested: Vec<HouseId> = state
                .fleets_at(system_id)
                .iter()
                .filter(|f| {
                    f.house_id != owner
                        && f.status == ec4x_domain::FleetStatus::Active
                        && f.command.is_mission()
                        && f.command.destination() == Some(system_id)
                        && state.are_hostile(f.house_id, owner)
                })
                .map(|f| f.house_id)
                .unique()
                .sorted()
                .collect();
            for attacker in uncontested {
                if fought.contains(&(attacker, owner)) || fought.contains(&(owner, attacker)) {
                    continue;
                }
                let battle = SystemBattle {
                    system_id,
                    attacker,
                    defender: owner,
                };
                resolve_orbit_and_ground(state, ctx, &battle, &mut rng)?;
            }
        }
    }
    Ok(())
}

fn resolve_orbit_and_ground(state: &mut GameState, ctx: &mut Resolution<'_>, battle: &SystemBattle, rng: &mut TurnRng) -> Result<()> {
    let orbital_won = combat::resolve_orbital_assault(state, ctx.config, battle, rng, &mut ctx.events, ctx.turn);
    if !orbital_won {
        return Ok(());
    }

    let wants_ground = state.fleets_at(battle.system_id).iter().any(|f| {
        f.house_id == battle.attacker
            && matches!(
                f.command,
                FleetCommand::Invade { system } | FleetCommand::Blitz { system } if system == battle.system_id
            )
    });
    if wants_ground {
        combat::resolve_ground_combat(state, ctx.config, battle, rng, &mut ctx.events, ctx.turn);
    }

    // bombardment runs from orbit whether or not troops go down
    let bombarders: Vec<FleetId> = state
        .fleets_at(battle.system_id)
        .iter()
        .filter(|f| f.house_id == battle.attacker && matches!(f.command, FleetCommand::Bombard { system } if system == battle.system_id))
        .map(|f| f.id)
        .collect();
    if !bombarders.is_empty() {
        bombard_colony(state, ctx, battle.attacker, battle.system_id, &bombarders);
    }
    Ok(())
}

fn bombard_colony(state: &mut GameState, ctx: &mut Resolution<'_>, attacker: HouseId, system_id: SystemId, fleets: &[FleetId]) {
    let Some(colony) = state.colony_at(system_id).cloned() else {
        return;
    };
    let has_planet_breaker = fleets.iter().any(|f| {
        state
            .fleets
            .get(*f)
            .map(|fleet| {
                fleet
                    .ships
                    .iter()
                    .filter_map(|s| state.ships.get(*s))
                    .any(|ship| ship.class == ShipClass::PlanetBreaker)
            })
            .unwrap_or(false)
    });

    let mut damage = ctx.config.combat.bombard_damage_millis as u32;
    if has_planet_breaker {
        damage *= 5;
        if let Some(house) = state.houses.get_mut(attacker) {
            house.planet_breaker_count += 1;
        }
        ctx.award(attacker, ctx.config.prestige.planet_breaker_used);
    }
    let shield_absorb = colony.planetary_shield_level as u32 * ctx.config.combat.shield_absorb_per_level;
    let damage = damage.saturating_sub(shield_absorb);

    if let Some(target) = state.colonies.get_mut(colony.id) {
        target.damage_millis = (target.damage_millis + damage).min(1000);
    }
    ctx.push(
        GameEvent::new(
            ctx.turn,
            EventType::ColonyBombarded,
            format!("colony {} bombarded for {damage} damage", colony.id),
        )
        .system(system_id)
        .colony(colony.id)
        .source(attacker)
        .target(colony.owner),
    );
}

fn colonize_pass(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        let FleetCommand::Colonize { system } = fleet.command else {
            continue;
        };
        if fleet.location != system {
            continue;
        }

        if state.colony_at(system).is_some() {
            if let Some(target) = state.fleets.get_mut(fleet_id) {
                target.command = FleetCommand::Hold;
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::CommandFailed, format!("system {system} was colonized before fleet {fleet_id} arrived"))
                    .house(fleet.house_id)
                    .fleet(fleet_id)
                    .system(system),
            );
            continue;
        }

        let etac = fleet
            .ships
            .iter()
            .sorted()
            .filter_map(|s| state.ships.get(*s))
            .find(|ship| {
                ship.class == ShipClass::Etac
                    && ship.cargo.map(|c| c.kind == CargoKind::Colonists && c.quantity > 0).unwrap_or(false)
            })
            .map(|ship| (ship.id, ship.cargo.map(|c| c.quantity).unwrap_or(0)));

        let Some((etac_id, colonists)) = etac else {
            if let Some(target) = state.fleets.get_mut(fleet_id) {
                target.command = FleetCommand::Hold;
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::CommandFailed, format!("fleet {fleet_id} lost its colonists before landing"))
                    .house(fleet.house_id)
                    .fleet(fleet_id)
                    .system(system),
            );
            continue;
        };

        let colony_id = ops::found_colony(state, system, fleet.house_id, colonists)?;
        // the ETAC is broken up for the initial settlement
        ops::destroy_ship(state, etac_id)?;
        if let Some(target) = state.fleets.get_mut(fleet_id) {
            target.command = FleetCommand::Hold;
        }
        ctx.push(
            GameEvent::new(
                ctx.turn,
                EventType::ColonyFounded,
                format!("colony {colony_id} founded at system {system} with {colonists} population units"),
            )
            .house(fleet.house_id)
            .fleet(fleet_id)
            .system(system)
            .colony(colony_id),
        );
    }
    Ok(())
}

/// Fleet-command reconnaissance: scouting and starbase hacking by fleets
/// standing at their target system.
fn scout_pass(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        let house_id = fleet.house_id;
        match fleet.command {
            FleetCommand::ScoutSystem { system } | FleetCommand::View { system } if fleet.location == system => {
                visibility::record_system_report(state, house_id, system, ctx.turn);
                finish_command(state, fleet_id);
            }
            FleetCommand::ScoutColony { system } if fleet.location == system => {
                visibility::record_system_report(state, house_id, system, ctx.turn);
                visibility::record_colony_report(state, house_id, system, ctx.turn);
                finish_command(state, fleet_id);
            }
            FleetCommand::HackStarbase { system } if fleet.location == system => {
                let Some(owner) = state.colony_at(system).map(|c| c.owner) else {
                    finish_command(state, fleet_id);
                    continue;
                };
                let mut rng = TurnRng::new(&state.game_id, ctx.turn, "espionage", &format!("hack-{fleet_id}"));
                let cic = state
                    .houses
                    .get(owner)
                    .map(|h| h.tech.level(TechField::Cic) as i64)
                    .unwrap_or(1);
                let eli = state
                    .houses
                    .get(house_id)
                    .map(|h| h.tech.level(TechField::Eli) as i64)
                    .unwrap_or(1);
                let chance = ctx.config.espionage.base_success_millis + eli * 100 - cic * ctx.config.espionage.cic_defense_millis_per_level;
                if rng.chance(chance) {
                    visibility::record_starbase_report(state, house_id, system, ctx.turn);
                    ctx.push(
                        GameEvent::new(ctx.turn, EventType::EspionageSuccess, format!("fleet {fleet_id} pulled starbase schematics at {system}"))
                            .system(system)
                            .source(house_id)
                            .target(owner)
                            .outcome(true),
                    );
                } else {
                    ctx.push(
                        GameEvent::new(ctx.turn, EventType::EspionageFailed, format!("fleet {fleet_id} failed to breach starbase systems at {system}"))
                            .system(system)
                            .source(house_id)
                            .outcome(false),
                    );
                }
                if rng.chance(ctx.config.espionage.detection_base_millis) {
                    ctx.push(
                        GameEvent::new(ctx.turn, EventType::EspionageDetected, format!("intrusion traced back to house {house_id}"))
                            .system(system)
                            .source(house_id)
                            .target(owner),
                    );
                    if state.relation(house_id, owner).state == DiplomaticState::Neutral {
                        mark_violation(state, ctx, house_id, owner, format!("house {house_id} caught spying on house {owner}"));
                    }
                }
                finish_command(state, fleet_id);
            }
            _ => {}
        }
    }
}

fn finish_command(state: &mut GameState, fleet_id: FleetId) {
    if let Some(fleet) = state.fleets.get_mut(fleet_id) {
        fleet.command = FleetCommand::Hold;
    }
}

/// Budget-driven espionage banked by the Command phase. Rolls against the
/// target's counter-intelligence plus any CIP spending this turn.
fn espionage_pass(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let actions = std::mem::take(&mut ctx.espionage);
    for (house_id, orders) in actions {
        for (index, order) in orders.iter().enumerate() {
            let mut rng = TurnRng::new(
                &state.game_id,
                ctx.turn,
                "espionage",
                &format!("house-{house_id}-action-{index}"),
            );
            let defender = state.colony_at(order.target).map(|c| c.owner);
            let Some(defender) = defender else {
                // empty systems only yield a survey
                visibility::record_system_report(state, house_id, order.target, ctx.turn);
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::EspionageSuccess, format!("survey of uninhabited system {}", order.target))
                        .system(order.target)
                        .source(house_id)
                        .outcome(true),
                );
                continue;
            };

            let cic = state
                .houses
                .get(defender)
                .map(|h| h.tech.level(TechField::Cic) as i64)
                .unwrap_or(1);
            let cip = ctx.cip_budget.get(&defender).copied().unwrap_or(0);
            let chance = ctx.config.espionage.base_success_millis
                + order.budget / 100 * ctx.config.espionage.budget_bonus_millis_per_100
                - cic * ctx.config.espionage.cic_defense_millis_per_level
                - cip / 100 * ctx.config.espionage.cip_defense_millis_per_100;

            if rng.chance(chance) {
                match order.kind {
                    EspionageKind::ColonyIntel => {
                        visibility::record_system_report(state, house_id, order.target, ctx.turn);
                        visibility::record_colony_report(state, house_id, order.target, ctx.turn);
                    }
                    EspionageKind::SystemIntel => {
                        visibility::record_system_report(state, house_id, order.target, ctx.turn);
                    }
                    EspionageKind::StarbaseIntel => {
                        visibility::record_starbase_report(state, house_id, order.target, ctx.turn);
                    }
                }
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::EspionageSuccess, format!("{} on system {} succeeded", order.kind, order.target))
                        .system(order.target)
                        .source(house_id)
                        .target(defender)
                        .outcome(true),
                );
            } else {
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::EspionageFailed, format!("{} on system {} failed", order.kind, order.target))
                        .system(order.target)
                        .source(house_id)
                        .outcome(false),
                );
            }

            // attribution is an independent roll
            if rng.chance(ctx.config.espionage.detection_base_millis) {
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::EspionageDetected, format!("operation attributed to house {house_id}"))
                        .system(order.target)
                        .source(house_id)
                        .target(defender),
                );
                if state.relation(house_id, defender).state == DiplomaticState::Neutral {
                    mark_violation(state, ctx, house_id, defender, format!("house {house_id} caught running agents against house {defender}"));
                }
            }
        }
    }
}

fn cleanup_pass(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    // fleet merges for arrived JoinFleet commands
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        let FleetCommand::JoinFleet { fleet: target_id } = fleet.command else {
            continue;
        };
        let Some(target) = state.fleets.get(target_id).cloned() else {
            finish_command(state, fleet_id);
            continue;
        };
        if target.location != fleet.location {
            continue;
        }
        for ship_id in fleet.ships.clone() {
            ops::assign_ship_to_fleet(state, ship_id, target_id)?;
        }
        ops::disband_fleet(state, fleet_id)?;
        ctx.push(
            GameEvent::new(ctx.turn, EventType::FleetDisbanded, format!("fleet {fleet_id} merged into fleet {target_id}"))
                .house(fleet.house_id)
                .fleet(target_id)
                .system(fleet.location),
        );
    }

    // salvage collection
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        let FleetCommand::Salvage { system } = fleet.command else {
            continue;
        };
        if fleet.location != system {
            continue;
        }
        let recovered = state.salvage_fields.remove(&system).unwrap_or(0);
        if recovered > 0 {
            if let Some(house) = state.houses.get_mut(fleet.house_id) {
                house.treasury += recovered;
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::SalvageRecovered, format!("fleet {fleet_id} recovered {recovered} credits of wreckage"))
                    .house(fleet.house_id)
                    .fleet(fleet_id)
                    .system(system),
            );
        }
        finish_command(state, fleet_id);
    }

    // fleets that lost every hull dissolve
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id) else {
            continue;
        };
        if !fleet.ships.is_empty() {
            continue;
        }
        let house_id = fleet.house_id;
        let location = fleet.location;
        ops::disband_fleet(state, fleet_id)?;
        ctx.award(house_id, ctx.config.prestige.fleet_lost);
        ctx.push(
            GameEvent::new(ctx.turn, EventType::FleetDisbanded, format!("fleet {fleet_id} struck from the rolls"))
                .house(house_id)
                .fleet(fleet_id)
                .system(location),
        );
    }

    // blockade states
    let colony_ids: Vec<_> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };
        let defenders_present = state
            .fleets_at(colony.system_id)
            .iter()
            .any(|f| f.house_id == colony.owner && f.status == FleetStatus::Active);
        let hostiles: Vec<HouseId> = state
            .fleets_at(colony.system_id)
            .iter()
            .filter(|f| f.status == FleetStatus::Active && state.are_hostile(f.house_id, colony.owner))
            .map(|f| f.house_id)
            .unique()
            .sorted()
            .collect();

        let now_blockaded = !hostiles.is_empty() && !defenders_present;
        if now_blockaded {
            for house in &hostiles {
                ctx.award(*house, ctx.config.prestige.blockade_maintained);
            }
        }
        if now_blockaded != colony.blockaded {
            let event_type = if now_blockaded { EventType::BlockadeEstablished } else { EventType::BlockadeLifted };
            let verb = if now_blockaded { "under blockade" } else { "blockade lifted" };
            ctx.push(
                GameEvent::new(ctx.turn, event_type, format!("colony {colony_id} {verb}"))
                    .system(colony.system_id)
                    .colony(colony_id)
                    .house(colony.owner),
            );
        }
        if let Some(target) = state.colonies.get_mut(colony_id) {
            target.blockaded = now_blockaded;
            target.blockaded_by = if now_blockaded { hostiles } else { Vec::new() };
            if !now_blockaded {
                target.blockade_turns = 0;
            }
        }
    }

    Ok(())
}
