//! New-game bootstrap: generates the starmap, seats the houses on their
//! homeworlds and hands out invite codes. Deterministic for a given game id
//! so re-creating a game from the same parameters is reproducible.

use crate::rules::rng::TurnRng;
use anyhow::{bail, Result};
use ec4x_domain::ops;
use ec4x_domain::{
    Colony, GameConfig, GameId, GamePhase, GameState, HexCoord, House, HouseId, HouseStatus, LaneClass, PlanetClass,
    ResourceRating, ShipStats, System, SystemId, TaxPolicy, TechTree,
};
use strum::IntoEnumIterator;

const INVITE_WORDS: &[&str] = &[
    "amber", "basalt", "cedar", "delta", "ember", "falcon", "garnet", "harbor", "indigo", "juniper", "krypton",
    "lumen", "meridian", "nimbus", "onyx", "pylon", "quartz", "rose", "summit", "tango", "umbra", "vortex", "willow",
    "xenon", "yarrow", "zephyr", "oak", "iron", "coral", "slate",
];

pub struct GameSetup {
    pub game_id: GameId,
    pub name: String,
    pub description: String,
    pub house_names: Vec<String>,
    /// Rings of systems around the hub.
    pub rings: u32,
}

/// Creates a fresh game: hub-centered hex map, one homeworld colony per
/// house on the outer ring, starting treasury and facilities.
pub fn bootstrap_game(config: &GameConfig, setup: GameSetup) -> Result<GameState> {
    if setup.house_names.is_empty() {
        bail!("a game needs at least one house");
    }

    let mut state = GameState::new(setup.game_id.clone(), setup.name, setup.description);
    state.phase = GamePhase::Command;
    let mut rng = TurnRng::new(&setup.game_id, 0, "setup", "starmap");

    generate_starmap(&mut state, setup.rings, &mut rng)?;

    // homeworld candidates: outer-ring systems, spread evenly
    let outer: Vec<SystemId> = state
        .systems
        .iter()
        .filter(|s| s.ring == setup.rings)
        .map(|s| s.id)
        .collect();
    if outer.len() < setup.house_names.len() {
        bail!(
            "map with {} outer systems cannot seat {} houses",
            outer.len(),
            setup.house_names.len()
        );
    }
    let stride = outer.len() / setup.house_names.len();

    let mut used_invites = std::collections::BTreeSet::new();
    for (seat, name) in setup.house_names.iter().enumerate() {
        let house_id = state.ids.next_house_id();
        let mut invite_code = invite_code_for(&mut rng);
        while !used_invites.insert(invite_code.clone()) {
            invite_code = invite_code_for(&mut rng);
        }
        state.houses.add(
            house_id,
            House {
                id: house_id,
                name: name.clone(),
                display_color: format!("#{:06x}", (seat as u32 + 1) * 0x1f3557 % 0xffffff),
                treasury: 500,
                prestige: 0,
                status: HouseStatus::Active,
                tech: TechTree::default(),
                tax_policy: TaxPolicy::Standard,
                nostr_pubkey: String::new(),
                invite_code,
                consecutive_shortfall_turns: 0,
                negative_prestige_turns: 0,
                turns_without_orders: 0,
                planet_breaker_count: 0,
                morale_millis: 0,
                prestige_victory_progress: 0,
                eliminated_turn: None,
            },
        )?;

        let home_system = outer[seat * stride];
        // homeworlds are always worth holding
        if let Some(system) = state.systems.get(home_system).cloned() {
            let mut upgraded = system;
            upgraded.planet_class = PlanetClass::Benign;
            upgraded.resource_rating = ResourceRating::Abundant;
            state.systems.update(home_system, upgraded)?;
        }

        let colony_id = ops::found_colony(&mut state, home_system, house_id, 50)?;
        if let Some(colony) = state.colonies.get(colony_id).cloned() {
            let mut colony: Colony = colony;
            colony.industrial.units = 20;
            colony.industrial.investment_cost = config.economy.industrial_investment_base;
            colony.infrastructure = 10;
            state.colonies.update(colony_id, colony)?;
        }
        ops::spawn_neoria(&mut state, house_id, colony_id, ec4x_domain::NeoriaKind::Spaceport)?;
        ops::spawn_neoria(&mut state, house_id, colony_id, ec4x_domain::NeoriaKind::Shipyard)?;
    }

    Ok(state)
}

fn generate_starmap(state: &mut GameState, rings: u32, rng: &mut TurnRng) -> Result<()> {
    let planet_classes: Vec<PlanetClass> = PlanetClass::iter().collect();
    let resource_ratings: Vec<ResourceRating> = ResourceRating::iter().collect();

    let mut coords = vec![HexCoord::new(0, 0)];
    for q in -(rings as i32)..=(rings as i32) {
        for r in -(rings as i32)..=(rings as i32) {
            let coord = HexCoord::new(q, r);
            if coord == HexCoord::new(0, 0) {
                continue;
            }
            if coord.distance_to(&HexCoord::new(0, 0)) <= rings {
                coords.push(coord);
            }
        }
    }

    let mut by_coord = std::collections::BTreeMap::new();
    for coord in coords {
        let id = state.ids.next_system_id();
        let ring = coord.distance_to(&HexCoord::new(0, 0));
        let name = if ring == 0 {
            "Hub".to_string()
        } else {
            format!("System {}", id)
        };
        state.systems.add(
            id,
            System {
                id,
                name,
                coords: coord,
                ring,
                planet_class: planet_classes[rng.index(planet_classes.len())],
                resource_rating: resource_ratings[rng.index(resource_ratings.len())],
            },
        )?;
        by_coord.insert(coord, id);
        if ring == 0 {
            state.starmap.hub = id;
        }
    }

    // connect each hex to its three "forward" neighbors so every adjacency
    // gets exactly one lane
    for (coord, id) in &by_coord {
        for (dq, dr) in [(1, 0), (0, 1), (-1, 1)] {
            let neighbor = HexCoord::new(coord.q + dq, coord.r + dr);
            if let Some(other) = by_coord.get(&neighbor) {
                let class = if rng.chance(700) { LaneClass::Major } else { LaneClass::Minor };
                state.starmap.add_lane(*id, *other, class);
            }
        }
    }
    Ok(())
}

fn invite_code_for(rng: &mut TurnRng) -> String {
    let a = INVITE_WORDS[rng.index(INVITE_WORDS.len())];
    let b = INVITE_WORDS[rng.index(INVITE_WORDS.len())];
    let c = INVITE_WORDS[rng.index(INVITE_WORDS.len())];
    format!("{a}-{b}-{c}")
}

/// Shared builders for unit and integration tests.
pub mod test_fixtures {
    use super::*;
    use ec4x_domain::config::BUILTIN_CONFIG;
    use ec4x_domain::{
        DiplomaticRelation, DiplomaticState, Fleet, FleetId, ShipClass, ShipId,
    };

    pub fn test_config() -> GameConfig {
        BUILTIN_CONFIG.clone()
    }

    /// Systems named in order, connected in a line by major lanes.
    pub fn line_map_state(names: &[&str]) -> GameState {
        let mut state = GameState::new(GameId("test-game".into()), "Test Game".into(), String::new());
        let mut previous: Option<SystemId> = None;
        for (idx, name) in names.iter().enumerate() {
            let id = state.ids.next_system_id();
            state
                .systems
                .add(
                    id,
                    System {
                        id,
                        name: (*name).into(),
                        coords: HexCoord::new(idx as i32, 0),
                        ring: idx as u32,
                        planet_class: PlanetClass::Benign,
                        resource_rating: ResourceRating::Abundant,
                    },
                )
                .unwrap();
            if let Some(previous) = previous {
                state.starmap.add_lane(previous, id, LaneClass::Major);
            } else {
                state.starmap.hub = id;
            }
            previous = Some(id);
        }
        state
    }

    pub fn add_house(state: &mut GameState, name: &str) -> HouseId {
        let id = state.ids.next_house_id();
        state
            .houses
            .add(
                id,
                House {
                    id,
                    name: name.into(),
                    display_color: "#888888".into(),
                    treasury: 500,
                    prestige: 0,
                    status: HouseStatus::Active,
                    tech: TechTree::default(),
                    tax_policy: TaxPolicy::Standard,
                    nostr_pubkey: String::new(),
                    invite_code: format!("{}-code", name.to_lowercase()),
                    consecutive_shortfall_turns: 0,
                    negative_prestige_turns: 0,
                    turns_without_orders: 0,
                    planet_breaker_count: 0,
                    morale_millis: 0,
                    prestige_victory_progress: 0,
                    eliminated_turn: None,
                },
            )
            .unwrap();
        id
    }

    pub fn make_enemies(state: &mut GameState, a: HouseId, b: HouseId) {
        state.set_relation(
            a,
            b,
            DiplomaticRelation {
                state: DiplomaticState::Enemy,
                since_turn: state.turn,
                violations: 0,
            },
        );
    }

    /// Fleet of `count` ships of one class, stats straight from the
    /// balance tables.
    pub fn add_fleet(state: &mut GameState, config: &GameConfig, house: HouseId, at: SystemId, class: ShipClass, count: usize) -> FleetId {
        let fleet_id = ops::spawn_fleet(state, house, at, format!("{} fleet {}", class, house)).unwrap();
        for _ in 0..count {
            let ship_id = add_ship(state, config, house, class);
            ops::assign_ship_to_fleet(state, ship_id, fleet_id).unwrap();
        }
        fleet_id
    }

    pub fn add_ship(state: &mut GameState, config: &GameConfig, house: HouseId, class: ShipClass) -> ShipId {
        let spec = config.ship(class).unwrap();
        ops::spawn_ship(
            state,
            house,
            class,
            ShipStats {
                attack: spec.attack,
                defense: spec.defense,
                wep_level: 1,
            },
            None,
        )
        .unwrap()
    }

    pub fn fleet(state: &GameState, id: FleetId) -> &Fleet {
        state.fleets.get(id).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_seats_every_house_with_a_homeworld() {
        let config = test_fixtures::test_config();
        let state = bootstrap_game(
            &config,
            GameSetup {
                game_id: GameId("boot".into()),
                name: "Bootstrap".into(),
                description: String::new(),
                house_names: vec!["Atreides".into(), "Harkonnen".into(), "Ordos".into()],
                rings: 3,
            },
        )
        .unwrap();

        assert_eq!(state.houses.len(), 3);
        assert_eq!(state.colonies.len(), 3);
        assert_eq!(state.neoria.len(), 6);
        assert!(state.systems.len() > 30);
        assert!(state.validate().is_empty());
        for house in state.houses.iter() {
            assert!(!house.invite_code.is_empty());
            assert_eq!(house.treasury, 500);
        }
    }

    #[test]
    fn bootstrap_is_deterministic_per_game_id() {
        let config = test_fixtures::test_config();
        let make = || {
            bootstrap_game(
                &config,
                GameSetup {
                    game_id: GameId("boot".into()),
                    name: "Bootstrap".into(),
                    description: String::new(),
                    house_names: vec!["A".into(), "B".into()],
                    rings: 2,
                },
            )
            .unwrap()
        };
        assert_eq!(make(), make());
    }
}
