//! Lane-graph pathfinding: shortest safe paths for movement and the
//! precomputed fallback routes used by automated retreat.

use ec4x_domain::{ColonyId, FallbackRoute, Fleet, FleetId, GameConfig, GameState, HouseId, LaneClass, SystemId};
use pathfinding::prelude::dijkstra;

fn lane_cost(class: LaneClass) -> u32 {
    match class {
        LaneClass::Major => 1,
        LaneClass::Minor => 2,
    }
}

/// A system is unsafe for a house when a hostile colony sits there.
fn is_safe_for(state: &GameState, house_id: HouseId, system: SystemId) -> bool {
    match state.colony_at(system) {
        Some(colony) => !state.are_hostile(house_id, colony.owner),
        None => true,
    }
}

/// Shortest path by lane cost, ignoring danger. Returns the node sequence
/// including both endpoints.
pub fn shortest_path(state: &GameState, from: SystemId, to: SystemId) -> Option<Vec<SystemId>> {
    dijkstra(
        &from,
        |system| {
            state
                .starmap
                .neighbors(*system)
                .iter()
                .map(|(next, class)| (*next, lane_cost(*class)))
                .collect::<Vec<_>>()
        },
        |system| *system == to,
    )
    .map(|(path, _)| path)
}

/// Shortest path that never enters a system holding a hostile colony
/// (except the destination itself, which missions may target).
pub fn shortest_safe_path(state: &GameState, house_id: HouseId, from: SystemId, to: SystemId) -> Option<Vec<SystemId>> {
    dijkstra(
        &from,
        |system| {
            state
                .starmap
                .neighbors(*system)
                .iter()
                .filter(|(next, _)| *next == to || is_safe_for(state, house_id, *next))
                .map(|(next, class)| (*next, lane_cost(*class)))
                .collect::<Vec<_>>()
        },
        |system| *system == to,
    )
    .map(|(path, _)| path)
}

/// Whether a colony meets the safety bar for retreating fleets: a working
/// starbase, or enough friendly fleets on station.
pub fn is_defensively_adequate(state: &GameState, config: &GameConfig, colony_id: ColonyId) -> bool {
    let Some(colony) = state.colonies.get(colony_id) else {
        return false;
    };
    let has_starbase = colony.kastra_ids.iter().any(|k| {
        state
            .kastra
            .get(*k)
            .map(|base| base.state != ec4x_domain::ShipState::Destroyed)
            .unwrap_or(false)
    });
    if has_starbase {
        return true;
    }
    let guards = state
        .fleet_index
        .by_system
        .get(colony.system_id)
        .iter()
        .filter(|f| state.fleets.get(**f).map(|fl| fl.house_id == colony.owner).unwrap_or(false))
        .count() as u32;
    guards >= config.limits.fallback_guard_fleets
}

/// Nearest defensively adequate owned colony reachable without crossing
/// hostile-colony systems.
pub fn compute_fallback_route(state: &GameState, config: &GameConfig, fleet: &Fleet) -> Option<FallbackRoute> {
    let house_id = fleet.house_id;
    let candidates: Vec<&ec4x_domain::Colony> = state
        .colonies
        .iter()
        .filter(|c| c.owner == house_id && is_defensively_adequate(state, config, c.id))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let result = dijkstra(
        &fleet.location,
        |system| {
            state
                .starmap
                .neighbors(*system)
                .iter()
                .filter(|(next, _)| is_safe_for(state, house_id, *next))
                .map(|(next, class)| (*next, lane_cost(*class)))
                .collect::<Vec<_>>()
        },
        |system| candidates.iter().any(|c| c.system_id == *system),
    );

    result.and_then(|(path, _)| {
        let destination = *path.last()?;
        let target_colony = candidates.iter().find(|c| c.system_id == destination)?.id;
        Some(FallbackRoute {
            target_colony,
            path,
            computed_turn: state.turn,
        })
    })
}

/// Refreshes expired or missing fallback routes for every fleet. Routes are
/// recomputed in fleet-id order so the pass is deterministic.
pub fn refresh_fallback_routes(state: &mut GameState, config: &GameConfig) {
    let fleet_ids: Vec<FleetId> = state.fleets.ids().collect();
    for fleet_id in fleet_ids {
        let Some(fleet) = state.fleets.get(fleet_id).cloned() else {
            continue;
        };
        let expired = fleet
            .fallback_route
            .as_ref()
            .map(|route| state.turn.saturating_sub(route.computed_turn) >= config.limits.fallback_route_ttl_turns)
            .unwrap_or(true);
        if !expired {
            continue;
        }
        let route = compute_fallback_route(state, config, &fleet);
        if let Some(fleet) = state.fleets.get_mut(fleet_id) {
            fleet.fallback_route = route;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_setup::test_fixtures::*;
    use ec4x_domain::ops;

    #[test]
    fn safe_path_detours_around_hostile_colonies() {
        // line A - B - C plus detour A - D - C; hostile colony at B
        let mut state = line_map_state(&["A", "B", "C", "D"]);
        state.starmap.add_lane(SystemId(1), SystemId(4), LaneClass::Major);
        state.starmap.add_lane(SystemId(4), SystemId(3), LaneClass::Major);

        let attacker = add_house(&mut state, "Corrino");
        let defender = add_house(&mut state, "Ordos");
        make_enemies(&mut state, attacker, defender);
        ops::found_colony(&mut state, SystemId(2), defender, 10).unwrap();

        let direct = shortest_path(&state, SystemId(1), SystemId(3)).unwrap();
        assert_eq!(direct, vec![SystemId(1), SystemId(2), SystemId(3)]);

        let safe = shortest_safe_path(&state, attacker, SystemId(1), SystemId(3)).unwrap();
        assert_eq!(safe, vec![SystemId(1), SystemId(4), SystemId(3)]);
    }

    #[test]
    fn fallback_route_picks_nearest_defended_colony() {
        let mut state = line_map_state(&["A", "B", "C"]);
        let house = add_house(&mut state, "Atreides");
        let near = ops::found_colony(&mut state, SystemId(2), house, 10).unwrap();
        let far = ops::found_colony(&mut state, SystemId(3), house, 10).unwrap();
        // only the far colony has a starbase
        ops::spawn_kastra(&mut state, house, far, 1).unwrap();

        let config = test_config();
        let fleet_id = ops::spawn_fleet(&mut state, house, SystemId(1), "Raiders".into()).unwrap();
        let fleet = state.fleets.get(fleet_id).unwrap().clone();

        let route = compute_fallback_route(&state, &config, &fleet).unwrap();
        assert_eq!(route.target_colony, far);
        assert_eq!(route.path, vec![SystemId(1), SystemId(2), SystemId(3)]);
        assert!(!is_defensively_adequate(&state, &config, near));
    }
}
