//! Maintenance phase, the tail of the cycle: construction and repair
//! queues advance, upkeep is paid, income collected, research invested,
//! population grown, diplomacy decayed. Finishes by advancing the turn
//! counter.

use crate::rules::{command, Resolution};
use anyhow::Result;
use ec4x_domain::ops;
use ec4x_domain::{
    BuildItem, ColonyId, EntityId, EventType, FacilityKind, FleetStatus, GameEvent, GameState, HouseId, HouseStatus,
    NeoriaKind, RepairJob, ShipState, ShipStats, TechField,
};
use itertools::Itertools;
use std::collections::BTreeMap;

pub fn run(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    advance_colony_construction(state, ctx)?;
    advance_dock_jobs(state);
    advance_repairs(state, ctx)?;
    pay_upkeep(state, ctx)?;
    collect_income(state, ctx)?;
    advance_research(state, ctx);
    grow_population(state, ctx);
    decay_diplomacy(state, ctx);
    reactivate_fleets(state, ctx);
    blockade_pressure(state);

    state.turn += 1;
    Ok(())
}

fn advance_colony_construction(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let colony_ids: Vec<ColonyId> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };
        let Some(mut project) = colony.under_construction.clone() else {
            continue;
        };
        project.turns_remaining = project.turns_remaining.saturating_sub(1);

        if project.turns_remaining > 0 {
            if let Some(target) = state.colonies.get_mut(colony_id) {
                target.under_construction = Some(project);
            }
            continue;
        }

        commission_project(state, ctx, colony_id, &project)?;
        // the next queued project is promoted and waits for the next
        // maintenance pass
        if let Some(target) = state.colonies.get_mut(colony_id) {
            target.under_construction = if target.construction_queue.is_empty() {
                None
            } else {
                Some(target.construction_queue.remove(0))
            };
        }
    }
    Ok(())
}

/// Planetary-defense projects enter service the moment they complete, so
/// they can defend on the very next turn.
fn commission_project(
    state: &mut GameState,
    ctx: &mut Resolution<'_>,
    colony_id: ColonyId,
    project: &ec4x_domain::ConstructionProject,
) -> Result<()> {
    let Some(colony) = state.colonies.get(colony_id).cloned() else {
        return Ok(());
    };
    let owner = colony.owner;
    let system_id = colony.system_id;

    ctx.push(
        GameEvent::new(ctx.turn, EventType::BuildCompleted, format!("colony {colony_id} completed {:?} x{}", project.item, project.quantity))
            .house(owner)
            .colony(colony_id)
            .system(system_id),
    );

    match project.item {
        BuildItem::Ship(class) => {
            let spec = ctx.config.ship(class)?.clone();
            let wep_level = state.houses.get(owner).map(|h| h.tech.level(TechField::Wep)).unwrap_or(1);
            let mut squadron_for_colony = colony.fighter_squadron_ids.first().copied();
            for _ in 0..project.quantity {
                let ship_id = ops::spawn_ship(
                    state,
                    owner,
                    class,
                    ShipStats {
                        attack: spec.attack,
                        defense: spec.defense,
                        wep_level,
                    },
                    None,
                )?;
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::ShipCommissioned, format!("{class} {ship_id} commissioned"))
                        .house(owner)
                        .system(system_id),
                );
                if class.is_fighter() {
                    let squadron_id = match squadron_for_colony {
                        Some(existing) => existing,
                        None => {
                            let fresh = ops::spawn_squadron(state, owner, colony_id)?;
                            squadron_for_colony = Some(fresh);
                            fresh
                        }
                    };
                    if let Some(squadron) = state.squadrons.get_mut(squadron_id) {
                        squadron.fighters.push(ship_id);
                    }
                    if let Some(ship) = state.ships.get_mut(ship_id) {
                        ship.squadron_id = Some(squadron_id);
                    }
                } else {
                    command::berth_commissioned_ship(state, ctx, owner, system_id, ship_id)?;
                }
            }
        }
        BuildItem::Facility(kind) => {
            for _ in 0..project.quantity {
                match kind {
                    FacilityKind::Spaceport => {
                        ops::spawn_neoria(state, owner, colony_id, NeoriaKind::Spaceport)?;
                    }
                    FacilityKind::Shipyard => {
                        ops::spawn_neoria(state, owner, colony_id, NeoriaKind::Shipyard)?;
                    }
                    FacilityKind::Drydock => {
                        ops::spawn_neoria(state, owner, colony_id, NeoriaKind::Drydock)?;
                    }
                    FacilityKind::Starbase => {
                        ops::spawn_kastra(state, owner, colony_id, 1)?;
                    }
                    FacilityKind::PlanetaryShield => {
                        if let Some(target) = state.colonies.get_mut(colony_id) {
                            target.planetary_shield_level = target.planetary_shield_level.saturating_add(1);
                        }
                    }
                }
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::FacilityCommissioned, format!("{kind} x{} in service", project.quantity))
                    .house(owner)
                    .colony(colony_id)
                    .system(system_id),
            );
        }
        BuildItem::Ground(class) => {
            let spec = ctx.config.ground_unit(class)?.clone();
            for _ in 0..project.quantity {
                ops::spawn_ground_unit(state, owner, colony_id, class, spec.strength)?;
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::GroundUnitMustered, format!("{class} x{} mustered", project.quantity))
                    .house(owner)
                    .colony(colony_id)
                    .system(system_id),
            );
        }
        BuildItem::Industrial => {
            if let Some(target) = state.colonies.get_mut(colony_id) {
                target.industrial.units += project.quantity;
            }
        }
        BuildItem::Infrastructure => {
            if let Some(target) = state.colonies.get_mut(colony_id) {
                target.infrastructure += project.quantity;
            }
        }
    }
    Ok(())
}

fn advance_dock_jobs(state: &mut GameState) {
    let neoria_ids: Vec<_> = state.neoria.ids().collect();
    for neoria_id in neoria_ids {
        if let Some(facility) = state.neoria.get_mut(neoria_id) {
            for job in &mut facility.docks {
                job.turns_remaining = job.turns_remaining.saturating_sub(1);
            }
        }
    }
}

fn advance_repairs(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let colony_ids: Vec<ColonyId> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };

        // auto-repair drafts crippled hulls on station into the queue
        if colony.auto_repair {
            let queued: Vec<_> = colony.repair_queue.iter().map(|job| job.ship_id).collect();
            let crippled: Vec<_> = state
                .fleet_index
                .by_system
                .get(colony.system_id)
                .iter()
                .filter_map(|f| state.fleets.get(*f))
                .filter(|fleet| fleet.house_id == colony.owner)
                .flat_map(|fleet| fleet.ships.iter().copied())
                .sorted()
                .filter(|ship_id| {
                    !queued.contains(ship_id)
                        && state
                            .ships
                            .get(*ship_id)
                            .map(|s| s.state == ShipState::Crippled)
                            .unwrap_or(false)
                })
                .collect();
            if !crippled.is_empty() {
                let jobs: Vec<RepairJob> = crippled
                    .iter()
                    .map(|ship_id| RepairJob {
                        ship_id: *ship_id,
                        points_accumulated: 0,
                        points_required: state_ship_defense(state, *ship_id),
                    })
                    .collect();
                if let Some(target) = state.colonies.get_mut(colony_id) {
                    target.repair_queue.extend(jobs);
                }
            }
        }

        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };
        let mut points: u32 = colony
            .neoria_ids
            .iter()
            .filter_map(|n| state.neoria.get(*n))
            .filter(|facility| facility.kind == NeoriaKind::Drydock)
            .map(|facility| {
                ctx.config
                    .facility(FacilityKind::Drydock)
                    .map(|spec| spec.repair_points * facility.level as u32)
                    .unwrap_or(0)
            })
            .sum();
        if points == 0 || colony.repair_queue.is_empty() {
            continue;
        }

        let mut queue = colony.repair_queue.clone();
        let mut completed = Vec::new();
        for job in &mut queue {
            if points == 0 {
                break;
            }
            let spend = points.min(job.points_required - job.points_accumulated);
            job.points_accumulated += spend;
            points -= spend;
            if job.points_accumulated >= job.points_required {
                completed.push(job.ship_id);
            }
        }
        queue.retain(|job| !completed.contains(&job.ship_id));

        for ship_id in completed {
            if let Some(ship) = state.ships.get_mut(ship_id) {
                if ship.state == ShipState::Crippled {
                    ship.state = ShipState::Undamaged;
                }
            }
            ctx.push(
                GameEvent::new(ctx.turn, EventType::RepairCompleted, format!("ship {ship_id} repaired"))
                    .house(colony.owner)
                    .colony(colony_id)
                    .system(colony.system_id),
            );
        }
        if let Some(target) = state.colonies.get_mut(colony_id) {
            target.repair_queue = queue;
        }
    }
    Ok(())
}

fn state_ship_defense(state: &GameState, ship_id: ec4x_domain::ShipId) -> u32 {
    state.ships.get(ship_id).map(|s| s.stats.defense.max(1)).unwrap_or(1)
}

fn pay_upkeep(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let config = ctx.config;
    let economy = &config.economy;
    for house_id in state.active_houses() {
        let mut upkeep: i64 = 0;

        for ship_id in state.ship_index.by_house.get(house_id).iter().sorted() {
            let Some(ship) = state.ships.get(*ship_id) else {
                continue;
            };
            let Ok(spec) = ctx.config.ship(ship.class) else {
                continue;
            };
            let status_millis = if ship.state == ShipState::Crippled {
                economy.crippled_upkeep_millis
            } else if ship.fleet_id.is_unassigned() {
                economy.reserve_upkeep_millis
            } else {
                match state.fleets.get(ship.fleet_id).map(|f| f.status) {
                    Some(FleetStatus::Active) | None => 1000,
                    Some(FleetStatus::Reserve) => economy.reserve_upkeep_millis,
                    Some(FleetStatus::Mothballed) => economy.mothball_upkeep_millis,
                }
            };
            upkeep += spec.upkeep * status_millis / 1000;
        }

        for facility in state.neoria.iter().filter(|n| n.house_id == house_id) {
            let kind = match facility.kind {
                NeoriaKind::Spaceport => FacilityKind::Spaceport,
                NeoriaKind::Shipyard => FacilityKind::Shipyard,
                NeoriaKind::Drydock => FacilityKind::Drydock,
            };
            if let Ok(spec) = ctx.config.facility(kind) {
                upkeep += spec.upkeep * facility.level as i64;
            }
        }
        for base in state.kastra.iter().filter(|k| k.house_id == house_id && k.state != ShipState::Destroyed) {
            if let Ok(spec) = ctx.config.facility(FacilityKind::Starbase) {
                upkeep += spec.upkeep * base.level as i64;
            }
        }
        for unit in state.ground_units.iter().filter(|g| g.house_id == house_id) {
            if let Ok(spec) = ctx.config.ground_unit(unit.class) {
                upkeep += spec.upkeep;
            }
        }

        let Some(house) = state.houses.get_mut(house_id) else {
            continue;
        };
        house.treasury -= upkeep;

        if house.treasury < 0 {
            let shortfall = -house.treasury;
            house.consecutive_shortfall_turns += 1;
            let shortfall_turns = house.consecutive_shortfall_turns;
            let collapse = shortfall_turns >= economy.shortfall_collapse_turns && house.status == HouseStatus::Active;
            if collapse {
                house.status = HouseStatus::DefensiveCollapse;
            }
            ctx.push(
                GameEvent::new(
                    ctx.turn,
                    EventType::UpkeepShortfall,
                    format!("house {house_id} short {shortfall} credits ({shortfall_turns} turns running)"),
                )
                .house(house_id),
            );
            if collapse {
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::HouseStatusChanged, format!("house {house_id} enters defensive collapse"))
                        .house(house_id),
                );
            }

            // unpaid upkeep comes out of the colonies' fabric
            let owned: Vec<ColonyId> = state.colonies.iter().filter(|c| c.owner == house_id).map(|c| c.id).collect();
            if !owned.is_empty() {
                let per_colony = (economy.shortfall_damage_millis * shortfall / 100 / owned.len() as i64).max(1) as u32;
                for colony_id in owned {
                    if let Some(colony) = state.colonies.get_mut(colony_id) {
                        colony.damage_millis = (colony.damage_millis + per_colony).min(1000);
                    }
                }
            }
        } else {
            house.consecutive_shortfall_turns = 0;
        }
    }
    Ok(())
}

fn collect_income(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let config = ctx.config;
    let economy = &config.economy;
    let mut income_by_house: BTreeMap<HouseId, i64> = BTreeMap::new();

    for colony in state.colonies.iter() {
        let Some(house) = state.houses.get(colony.owner) else {
            continue;
        };
        if !house.is_playing() {
            continue;
        }
        let Some(system) = state.systems.get(colony.system_id) else {
            continue;
        };

        let base = economy.planet_base.get(&system.planet_class).copied().unwrap_or(0);
        let resource_millis = economy
            .resource_multiplier_millis
            .get(&system.resource_rating)
            .copied()
            .unwrap_or(1000);
        let el_level = house.tech.level(TechField::El) as i64;

        let mut gross = base * colony.population_units as i64 * resource_millis / 1000;
        gross += colony.industrial.units as i64 * economy.industrial_output_per_unit;
        gross = gross * (1000 + (el_level - 1) * 100) / 1000;
        gross = gross * (1000 - colony.damage_millis.min(1000) as i64) / 1000;

        let mut net = gross * colony.tax_rate.min(100) as i64 / 100;
        if colony.blockaded {
            net = net * economy.blockade_factor_millis / 1000;
        }
        *income_by_house.entry(colony.owner).or_insert(0) += net;
    }

    for (house_id, income) in income_by_house {
        if let Some(house) = state.houses.get_mut(house_id) {
            house.treasury += income;
        }
        ctx.push(
            GameEvent::new(ctx.turn, EventType::IncomeCollected, format!("house {house_id} collected {income} credits"))
                .house(house_id),
        );
    }
    Ok(())
}

fn advance_research(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let config = ctx.config;
    let research = &config.research;
    let allocations = std::mem::take(&mut ctx.research);
    for (house_id, allocation) in allocations {
        let Some(house) = state.houses.get_mut(house_id) else {
            continue;
        };
        let mut advances: Vec<(TechField, u8)> = Vec::new();
        let mut invest = |tree: &mut ec4x_domain::TechTree, field: TechField, points: i64| {
            if points <= 0 {
                return;
            }
            let gained = tree.invest(field, points, |level| research.threshold_for(level), research.max_level);
            if gained > 0 {
                advances.push((field, gained));
            }
        };

        invest(&mut house.tech, TechField::El, allocation.economic);
        invest(&mut house.tech, TechField::Sl, allocation.science);
        for (field, points) in &allocation.technology {
            invest(&mut house.tech, *field, *points);
        }

        for (field, gained) in advances {
            let new_level = house.tech.level(field);
            for _ in 0..gained {
                ctx.events.push(
                    GameEvent::new(ctx.turn, EventType::ResearchAdvanced, format!("house {house_id} advances {field} to {new_level}"))
                        .house(house_id),
                );
            }
        }
    }
}

fn grow_population(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let config = ctx.config;
    let population = &config.population;
    let colony_ids: Vec<ColonyId> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };
        let Some(house) = state.houses.get(colony.owner) else {
            continue;
        };
        let Some(system) = state.systems.get(colony.system_id) else {
            continue;
        };

        let policy_millis = match house.tax_policy {
            ec4x_domain::TaxPolicy::Low => 10,
            ec4x_domain::TaxPolicy::Standard => 0,
            ec4x_domain::TaxPolicy::High => -10,
        };
        let has_starbase = colony.kastra_ids.iter().any(|k| {
            state
                .kastra
                .get(*k)
                .map(|base| base.state != ShipState::Destroyed)
                .unwrap_or(false)
        });

        let mut growth_millis = population.base_growth_millis + policy_millis + house.morale_millis as i64 / 10
            - colony.tax_rate as i64 * population.tax_penalty_millis;
        if has_starbase {
            growth_millis += population.starbase_bonus_millis;
        }

        let cap_units = population.max_population.get(&system.planet_class).copied().unwrap_or(u32::MAX);
        let old_units = colony.population_units;
        let mut souls = colony.souls as i64;
        souls += souls * growth_millis / 1000;
        let souls = souls.max(0) as u64;
        let souls = souls.min(cap_units as u64 * 1_000_000);
        let new_units = (souls / 1_000_000) as u32;

        if let Some(target) = state.colonies.get_mut(colony_id) {
            target.souls = souls;
            target.population_units = new_units;
        }

        if new_units > old_units {
            ctx.push(
                GameEvent::new(
                    ctx.turn,
                    EventType::PopulationGrowth,
                    format!("colony {colony_id} grows to {new_units} population units"),
                )
                .house(colony.owner)
                .colony(colony_id)
                .system(colony.system_id),
            );
            // milestone prestige every 50 units
            if new_units / 50 > old_units / 50 {
                ctx.award(colony.owner, ctx.config.prestige.population_milestone);
            }
        }
    }
}

fn decay_diplomacy(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let decay = ctx.config.diplomacy.violation_decay_turns;
    if decay == 0 || ctx.turn % decay != 0 {
        return;
    }
    for relation in state.relations.values_mut() {
        relation.violations = relation.violations.saturating_sub(1);
    }
}

fn reactivate_fleets(state: &mut GameState, ctx: &mut Resolution<'_>) {
    let fleet_ids: Vec<_> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get_mut(fleet_id) else {
            continue;
        };
        if fleet.reactivation_turns == 0 {
            continue;
        }
        fleet.reactivation_turns -= 1;
        if fleet.reactivation_turns == 0 {
            fleet.status = FleetStatus::Active;
            let house_id = fleet.house_id;
            ctx.push(
                GameEvent::new(ctx.turn, EventType::FleetStatusChanged, format!("fleet {fleet_id} back in active service"))
                    .house(house_id)
                    .fleet(fleet_id),
            );
        }
    }
}

fn blockade_pressure(state: &mut GameState) {
    let colony_ids: Vec<ColonyId> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        if let Some(colony) = state.colonies.get_mut(colony_id) {
            if colony.blockaded {
                colony.blockade_turns += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_setup::test_fixtures::*;
    use ec4x_domain::{ops, ShipClass, SystemId};

    #[test]
    fn drydocks_repair_crippled_hulls_on_station() {
        let config = test_config();
        let mut state = line_map_state(&["Alpha"]);
        let house = add_house(&mut state, "Atreides");
        let colony = ops::found_colony(&mut state, SystemId(1), house, 30).unwrap();
        ops::spawn_neoria(&mut state, house, colony, NeoriaKind::Drydock).unwrap();

        let fleet = add_fleet(&mut state, &config, house, SystemId(1), ShipClass::Corvette, 1);
        let ship = state.fleets.get(fleet).unwrap().ships[0];
        state.ships.get_mut(ship).unwrap().state = ShipState::Crippled;

        let mut ctx = Resolution::new(&config, 3);
        // first pass drafts the hull into the queue and spends points on it
        advance_repairs(&mut state, &mut ctx).unwrap();

        // corvette defense 3 < 10 drydock points, so one pass suffices
        assert_eq!(state.ships.get(ship).unwrap().state, ShipState::Undamaged);
        assert!(ctx.events.iter().any(|e| e.event_type == EventType::RepairCompleted));
        assert!(state.colonies.get(colony).unwrap().repair_queue.is_empty());
    }

    #[test]
    fn sustained_shortfall_damages_colonies_and_collapses_the_house() {
        let config = test_config();
        let mut state = line_map_state(&["Alpha"]);
        let house = add_house(&mut state, "Atreides");
        let colony = ops::found_colony(&mut state, SystemId(1), house, 30).unwrap();
        // a dreadnought the treasury cannot sustain
        add_fleet(&mut state, &config, house, SystemId(1), ShipClass::Dreadnought, 3);
        state.houses.get_mut(house).unwrap().treasury = 0;

        for turn in 1..=config.economy.shortfall_collapse_turns {
            let mut ctx = Resolution::new(&config, turn);
            pay_upkeep(&mut state, &mut ctx).unwrap();
            assert!(ctx.events.iter().any(|e| e.event_type == EventType::UpkeepShortfall));
        }

        let house_after = state.houses.get(house).unwrap();
        assert!(house_after.treasury < 0);
        assert_eq!(house_after.status, HouseStatus::DefensiveCollapse);
        assert!(state.colonies.get(colony).unwrap().damage_millis > 0);
    }
}
