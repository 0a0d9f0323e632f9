//! Fog of war: the pure projection from the full game state to what one
//! house is entitled to see. Views are built by deliberate inclusion -
//! a field is only copied when the computed visibility level grants it -
//! so nothing at a lower level can leak by omission of a redaction.

use ec4x_domain::{
    ColonyReport, ForeignColonySighting, GameConfig, GameState, HouseId, IntelligenceDatabase, PlayerState, ShipState,
    SystemId, SystemView, VisibilityLevel,
};
use std::collections::BTreeMap;

/// Computes the visibility level of every system for a house.
pub fn visibility_map(state: &GameState, config: &GameConfig, house_id: HouseId) -> BTreeMap<SystemId, VisibilityLevel> {
    let mut levels: BTreeMap<SystemId, VisibilityLevel> = state
        .systems
        .ids()
        .map(|id| (id, VisibilityLevel::None))
        .collect();

    let mut raise = |levels: &mut BTreeMap<SystemId, VisibilityLevel>, system: SystemId, level: VisibilityLevel| {
        if let Some(slot) = levels.get_mut(&system) {
            if *slot < level {
                *slot = level;
            }
        }
    };

    // own colonies
    for colony in state.colonies.iter().filter(|c| c.owner == house_id) {
        raise(&mut levels, colony.system_id, VisibilityLevel::Owned);
    }
    // systems an own fleet occupies
    for fleet in state.fleets.iter().filter(|f| f.house_id == house_id) {
        raise(&mut levels, fleet.location, VisibilityLevel::Occupied);
    }
    // fresh reconnaissance
    if let Some(intel) = state.intel.get(&house_id) {
        for (system_id, report) in &intel.system_reports {
            if state.turn.saturating_sub(report.gathered_turn) <= config.espionage.intel_stale_turns {
                raise(&mut levels, *system_id, VisibilityLevel::Scouted);
            }
        }
    }
    // one lane out from anything visible
    let visible: Vec<SystemId> = levels
        .iter()
        .filter(|(_, level)| **level >= VisibilityLevel::Scouted)
        .map(|(id, _)| *id)
        .collect();
    for system_id in visible {
        for (neighbor, _) in state.starmap.neighbors(system_id) {
            raise(&mut levels, *neighbor, VisibilityLevel::Adjacent);
        }
    }

    levels
}

fn foreign_colony_sighting(state: &GameState, system_id: SystemId, viewer: HouseId) -> Option<ForeignColonySighting> {
    let colony = state.colony_at(system_id)?;
    if colony.owner == viewer {
        return None;
    }
    let mut strength = 0u32;
    for unit_id in &colony.ground_unit_ids {
        if let Some(unit) = state.ground_units.get(*unit_id) {
            strength += unit.strength;
        }
    }
    for kastra_id in &colony.kastra_ids {
        if let Some(base) = state.kastra.get(*kastra_id) {
            if base.state != ShipState::Destroyed {
                strength += base.level as u32 * 50;
            }
        }
    }
    Some(ForeignColonySighting {
        owner: colony.owner,
        // coarse bucket, never exact numbers
        approximate_strength: (strength / 25) * 25,
        blockaded: colony.blockaded,
    })
}

/// Derives one house's `PlayerState` snapshot for the just-resolved turn.
pub fn derive_player_state(state: &GameState, config: &GameConfig, house_id: HouseId) -> anyhow::Result<PlayerState> {
    let levels = visibility_map(state, config, house_id);
    let intel = state.intel.get(&house_id).cloned().unwrap_or_default();

    let mut systems = Vec::with_capacity(state.systems.len());
    for system in state.systems.iter() {
        let level = levels.get(&system.id).copied().unwrap_or(VisibilityLevel::None);
        let mut view = SystemView::hidden(system.id);
        view.visibility = level;

        match level {
            VisibilityLevel::None => {}
            VisibilityLevel::Adjacent => {
                view.name = Some(system.name.clone());
                view.coords = Some(system.coords);
            }
            VisibilityLevel::Scouted => {
                view.name = Some(system.name.clone());
                view.coords = Some(system.coords);
                view.planet_class = Some(system.planet_class);
                view.resource_rating = Some(system.resource_rating);
                // scouted systems show the last report, not live data
                view.colony_report = intel.colony_reports.get(&system.id).cloned();
                view.starbase_report = intel.starbase_reports.get(&system.id).cloned();
            }
            VisibilityLevel::Occupied | VisibilityLevel::Owned => {
                view.name = Some(system.name.clone());
                view.coords = Some(system.coords);
                view.planet_class = Some(system.planet_class);
                view.resource_rating = Some(system.resource_rating);
                view.foreign_colony = foreign_colony_sighting(state, system.id, house_id);
                view.colony_report = intel.colony_reports.get(&system.id).cloned();
                view.starbase_report = intel.starbase_reports.get(&system.id).cloned();
            }
        }
        systems.push(view);
    }

    let house = state
        .houses
        .get(house_id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("deriving player state for unknown house {house_id}"))?;

    let mut relations = BTreeMap::new();
    for other in state.houses.iter() {
        if other.id != house_id && other.is_playing() {
            relations.insert(other.id, state.relation(house_id, other.id));
        }
    }

    let events = state
        .last_turn_events
        .iter()
        .filter(|event| {
            event.concerns(house_id)
                || event
                    .system_id
                    .map(|s| levels.get(&s).copied().unwrap_or(VisibilityLevel::None) >= VisibilityLevel::Occupied)
                    .unwrap_or(false)
        })
        .cloned()
        .collect();

    Ok(PlayerState {
        game_id: state.game_id.clone(),
        turn: state.turn,
        phase: state.phase,
        house,
        own_colonies: state.colonies.iter().filter(|c| c.owner == house_id).cloned().collect(),
        own_fleets: state.fleets.iter().filter(|f| f.house_id == house_id).cloned().collect(),
        own_ships: state.ships.iter().filter(|s| s.house_id == house_id).cloned().collect(),
        own_squadrons: state.squadrons.iter().filter(|s| s.house_id == house_id).cloned().collect(),
        own_ground_units: state.ground_units.iter().filter(|g| g.house_id == house_id).cloned().collect(),
        own_neoria: state.neoria.iter().filter(|n| n.house_id == house_id).cloned().collect(),
        own_kastra: state.kastra.iter().filter(|k| k.house_id == house_id).cloned().collect(),
        systems,
        relations,
        events,
        intel,
    })
}

/// Records a fresh colony observation into a house's intelligence
/// database, overwriting any older report for the system.
pub fn record_colony_report(state: &mut GameState, viewer: HouseId, system_id: SystemId, turn: u32) -> Option<ColonyReport> {
    let colony = state.colony_at(system_id)?.clone();
    let report = ColonyReport {
        system_id,
        owner: colony.owner,
        population_units: colony.population_units,
        industrial_units: colony.industrial.units,
        infrastructure: colony.infrastructure,
        planetary_shield_level: colony.planetary_shield_level,
        gathered_turn: turn,
    };
    state
        .intel
        .entry(viewer)
        .or_default()
        .colony_reports
        .insert(system_id, report.clone());
    Some(report)
}

pub fn record_system_report(state: &mut GameState, viewer: HouseId, system_id: SystemId, turn: u32) {
    let Some(system) = state.systems.get(system_id).cloned() else {
        return;
    };
    let fleet_count = state.fleet_index.by_system.get(system_id).len() as u32;
    state.intel.entry(viewer).or_default().system_reports.insert(
        system_id,
        ec4x_domain::SystemReport {
            system_id,
            name: system.name,
            coords: system.coords,
            planet_class: system.planet_class,
            resource_rating: system.resource_rating,
            fleet_count,
            gathered_turn: turn,
        },
    );
}

pub fn record_starbase_report(state: &mut GameState, viewer: HouseId, system_id: SystemId, turn: u32) {
    let levels: Vec<u8> = state
        .colony_at(system_id)
        .map(|colony| {
            colony
                .kastra_ids
                .iter()
                .filter_map(|k| state.kastra.get(*k))
                .filter(|base| base.state != ShipState::Destroyed)
                .map(|base| base.level)
                .collect()
        })
        .unwrap_or_default();
    state.intel.entry(viewer).or_default().starbase_reports.insert(
        system_id,
        ec4x_domain::StarbaseReport {
            system_id,
            starbase_levels: levels,
            gathered_turn: turn,
        },
    );
}

/// Leak guard used by tests: a snapshot must not mention hidden systems
/// beyond their id.
pub fn check_no_leaks(view: &PlayerState) -> Result<(), String> {
    for system in &view.systems {
        if system.visibility == VisibilityLevel::None {
            if system.name.is_some()
                || system.coords.is_some()
                || system.planet_class.is_some()
                || system.resource_rating.is_some()
                || system.foreign_colony.is_some()
                || system.colony_report.is_some()
                || system.starbase_report.is_some()
            {
                return Err(format!("system {} leaks data at visibility None", system.id));
            }
        }
        if system.visibility == VisibilityLevel::Adjacent
            && (system.planet_class.is_some() || system.foreign_colony.is_some() || system.colony_report.is_some())
        {
            return Err(format!("system {} leaks data at visibility Adjacent", system.id));
        }
    }
    for colony in &view.own_colonies {
        if colony.owner != view.house.id {
            return Err(format!("snapshot carries foreign colony {}", colony.id));
        }
    }
    for ship in &view.own_ships {
        if ship.house_id != view.house.id {
            return Err(format!("snapshot carries foreign ship {}", ship.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_setup::test_fixtures::*;
    use ec4x_domain::{ops, ShipClass};

    #[test]
    fn visibility_grades_from_owned_to_hidden() {
        let config = test_config();
        // A (colony) - B - C - D: B occupied by fleet, C adjacent, D hidden...
        // with A's neighbor B also adjacent via A.
        let mut state = line_map_state(&["A", "B", "C", "D", "E"]);
        let us = add_house(&mut state, "Atreides");
        ops::found_colony(&mut state, SystemId(1), us, 20).unwrap();
        add_fleet(&mut state, &config, us, SystemId(2), ShipClass::Scout, 1);

        let levels = visibility_map(&state, &config, us);
        assert_eq!(levels[&SystemId(1)], VisibilityLevel::Owned);
        assert_eq!(levels[&SystemId(2)], VisibilityLevel::Occupied);
        assert_eq!(levels[&SystemId(3)], VisibilityLevel::Adjacent);
        assert_eq!(levels[&SystemId(4)], VisibilityLevel::None);
        assert_eq!(levels[&SystemId(5)], VisibilityLevel::None);
    }

    #[test]
    fn stale_report_is_shown_instead_of_live_state() {
        let config = test_config();
        let mut state = line_map_state(&["Home", "Faraway"]);
        let us = add_house(&mut state, "Atreides");
        let them = add_house(&mut state, "Harkonnen");
        ops::found_colony(&mut state, SystemId(1), us, 20).unwrap();
        let theirs = ops::found_colony(&mut state, SystemId(2), them, 40).unwrap();

        // scouted at turn 3 seeing pop 40
        state.turn = 3;
        record_system_report(&mut state, us, SystemId(2), 3);
        record_colony_report(&mut state, us, SystemId(2), 3);

        // they reinforce to 60 while we are blind
        state.colonies.get_mut(theirs).unwrap().population_units = 60;
        state.turn = 5;

        let view = derive_player_state(&state, &config, us).unwrap();
        let faraway = view.systems.iter().find(|s| s.id == SystemId(2)).unwrap();
        assert_eq!(faraway.visibility, VisibilityLevel::Scouted);
        let report = faraway.colony_report.as_ref().unwrap();
        assert_eq!(report.population_units, 40);
        assert_eq!(report.gathered_turn, 3);
        // live population figure appears nowhere in the snapshot
        assert!(view.own_colonies.iter().all(|c| c.owner == us));
        check_no_leaks(&view).unwrap();
    }

    #[test]
    fn hidden_systems_expose_only_their_id() {
        let config = test_config();
        let mut state = line_map_state(&["A", "B", "C", "D"]);
        let us = add_house(&mut state, "Atreides");
        let them = add_house(&mut state, "Harkonnen");
        ops::found_colony(&mut state, SystemId(1), us, 20).unwrap();
        ops::found_colony(&mut state, SystemId(4), them, 99).unwrap();

        let view = derive_player_state(&state, &config, us).unwrap();
        let hidden = view.systems.iter().find(|s| s.id == SystemId(4)).unwrap();
        assert_eq!(hidden.visibility, VisibilityLevel::None);
        assert!(hidden.name.is_none());
        assert!(hidden.foreign_colony.is_none());
        check_no_leaks(&view).unwrap();
    }
}
