//! Entity-ops layer: the only place cross-index mutations are allowed.
//! Every function here either updates the primary store and all affected
//! secondary indexes together, or fails without touching anything.

use crate::ids::*;
use crate::model::*;
use crate::state::GameState;
use anyhow::{anyhow, bail, Result};

pub fn spawn_ship(
    state: &mut GameState,
    house_id: HouseId,
    class: ShipClass,
    stats: ShipStats,
    cargo: Option<Cargo>,
) -> Result<ShipId> {
    let id = state.ids.next_ship_id();
    let ship = Ship {
        id,
        house_id,
        fleet_id: FleetId(UNASSIGNED),
        class,
        stats,
        state: ShipState::Undamaged,
        cargo,
        assigned_to_carrier: None,
        embarked_fighters: Vec::new(),
        squadron_id: None,
    };
    state.ships.add(id, ship)?;
    state.ship_index.by_house.insert(house_id, id);
    Ok(id)
}

/// Removes a ship and every index entry that referenced it. Embarked
/// fighters go down with their carrier.
pub fn destroy_ship(state: &mut GameState, ship_id: ShipId) -> Result<()> {
    let ship = state
        .ships
        .get(ship_id)
        .cloned()
        .ok_or_else(|| anyhow!("destroy_ship: ship {} not found", ship_id))?;

    for fighter_id in ship.embarked_fighters.clone() {
        destroy_ship(state, fighter_id)?;
    }

    if !ship.fleet_id.is_unassigned() {
        if let Some(fleet) = state.fleets.get_mut(ship.fleet_id) {
            fleet.ships.retain(|s| *s != ship_id);
        }
        state.ship_index.by_fleet.remove(ship.fleet_id, ship_id);
    }
    if let Some(carrier_id) = ship.assigned_to_carrier {
        if let Some(carrier) = state.ships.get_mut(carrier_id) {
            carrier.embarked_fighters.retain(|s| *s != ship_id);
        }
        state.ship_index.by_carrier.remove(carrier_id, ship_id);
    }
    if let Some(squadron_id) = ship.squadron_id {
        if let Some(squadron) = state.squadrons.get_mut(squadron_id) {
            squadron.fighters.retain(|s| *s != ship_id);
        }
    }
    state.ship_index.by_house.remove(ship.house_id, ship_id);
    state.ships.remove(ship_id)?;
    Ok(())
}

pub fn spawn_fleet(state: &mut GameState, house_id: HouseId, location: SystemId, name: String) -> Result<FleetId> {
    if !state.systems.contains(location) {
        bail!("spawn_fleet: system {} does not exist", location);
    }
    let id = state.ids.next_fleet_id();
    let fleet = Fleet {
        id,
        house_id,
        location,
        ships: Vec::new(),
        status: FleetStatus::Active,
        command: FleetCommand::Hold,
        roe: 5,
        name,
        retreat_policy: RetreatPolicy::Conservative,
        fallback_route: None,
        reactivation_turns: 0,
    };
    state.fleets.add(id, fleet)?;
    state.fleet_index.by_system.insert(location, id);
    state.fleet_index.by_house.insert(house_id, id);
    Ok(id)
}

/// Drops the fleet; its ships become unassigned but stay in the world.
pub fn disband_fleet(state: &mut GameState, fleet_id: FleetId) -> Result<Vec<ShipId>> {
    let fleet = state
        .fleets
        .get(fleet_id)
        .cloned()
        .ok_or_else(|| anyhow!("disband_fleet: fleet {} not found", fleet_id))?;

    for ship_id in &fleet.ships {
        if let Some(ship) = state.ships.get_mut(*ship_id) {
            ship.fleet_id = FleetId(UNASSIGNED);
        }
        state.ship_index.by_fleet.remove(fleet_id, *ship_id);
    }
    state.fleet_index.by_system.remove(fleet.location, fleet_id);
    state.fleet_index.by_house.remove(fleet.house_id, fleet_id);
    state.fleets.remove(fleet_id)?;
    Ok(fleet.ships)
}

pub fn assign_ship_to_fleet(state: &mut GameState, ship_id: ShipId, fleet_id: FleetId) -> Result<()> {
    let (ship_house, previous_fleet) = {
        let ship = state
            .ships
            .get(ship_id)
            .ok_or_else(|| anyhow!("assign_ship_to_fleet: ship {} not found", ship_id))?;
        (ship.house_id, ship.fleet_id)
    };
    let fleet_house = state
        .fleets
        .get(fleet_id)
        .map(|f| f.house_id)
        .ok_or_else(|| anyhow!("assign_ship_to_fleet: fleet {} not found", fleet_id))?;
    if ship_house != fleet_house {
        bail!("assign_ship_to_fleet: ship {} and fleet {} belong to different houses", ship_id, fleet_id);
    }

    if !previous_fleet.is_unassigned() {
        if let Some(previous) = state.fleets.get_mut(previous_fleet) {
            previous.ships.retain(|s| *s != ship_id);
        }
        state.ship_index.by_fleet.remove(previous_fleet, ship_id);
    }

    state
        .fleets
        .get_mut(fleet_id)
        .expect("fleet checked above")
        .ships
        .push(ship_id);
    state.ships.get_mut(ship_id).expect("ship checked above").fleet_id = fleet_id;
    state.ship_index.by_fleet.insert(fleet_id, ship_id);
    Ok(())
}

pub fn move_fleet(state: &mut GameState, fleet_id: FleetId, to: SystemId) -> Result<()> {
    if !state.systems.contains(to) {
        bail!("move_fleet: system {} does not exist", to);
    }
    let from = state
        .fleets
        .get(fleet_id)
        .map(|f| f.location)
        .ok_or_else(|| anyhow!("move_fleet: fleet {} not found", fleet_id))?;
    state.fleet_index.by_system.remove(from, fleet_id);
    state.fleet_index.by_system.insert(to, fleet_id);
    state.fleets.get_mut(fleet_id).expect("fleet checked above").location = to;
    Ok(())
}

pub fn embark_fighter(state: &mut GameState, fighter_id: ShipId, carrier_id: ShipId) -> Result<()> {
    let fighter = state
        .ships
        .get(fighter_id)
        .cloned()
        .ok_or_else(|| anyhow!("embark_fighter: fighter {} not found", fighter_id))?;
    if !fighter.class.is_fighter() {
        bail!("embark_fighter: ship {} is a {}, not a fighter", fighter_id, fighter.class);
    }
    if !state.ships.contains(carrier_id) {
        bail!("embark_fighter: carrier {} not found", carrier_id);
    }

    if let Some(squadron_id) = fighter.squadron_id {
        if let Some(squadron) = state.squadrons.get_mut(squadron_id) {
            squadron.fighters.retain(|s| *s != fighter_id);
        }
    }
    {
        let fighter = state.ships.get_mut(fighter_id).expect("fighter checked above");
        fighter.assigned_to_carrier = Some(carrier_id);
        fighter.squadron_id = None;
    }
    state
        .ships
        .get_mut(carrier_id)
        .expect("carrier checked above")
        .embarked_fighters
        .push(fighter_id);
    state.ship_index.by_carrier.insert(carrier_id, fighter_id);
    Ok(())
}

pub fn disembark_fighter(state: &mut GameState, fighter_id: ShipId, squadron_id: SquadronId) -> Result<()> {
    let carrier_id = state
        .ships
        .get(fighter_id)
        .and_then(|s| s.assigned_to_carrier)
        .ok_or_else(|| anyhow!("disembark_fighter: fighter {} is not embarked", fighter_id))?;
    if !state.squadrons.contains(squadron_id) {
        bail!("disembark_fighter: squadron {} not found", squadron_id);
    }

    if let Some(carrier) = state.ships.get_mut(carrier_id) {
        carrier.embarked_fighters.retain(|s| *s != fighter_id);
    }
    state.ship_index.by_carrier.remove(carrier_id, fighter_id);
    {
        let fighter = state.ships.get_mut(fighter_id).expect("fighter checked above");
        fighter.assigned_to_carrier = None;
        fighter.squadron_id = Some(squadron_id);
    }
    state
        .squadrons
        .get_mut(squadron_id)
        .expect("squadron checked above")
        .fighters
        .push(fighter_id);
    Ok(())
}

pub fn spawn_squadron(state: &mut GameState, house_id: HouseId, colony_id: ColonyId) -> Result<SquadronId> {
    if !state.colonies.contains(colony_id) {
        bail!("spawn_squadron: colony {} not found", colony_id);
    }
    let id = state.ids.next_squadron_id();
    state.squadrons.add(
        id,
        Squadron {
            id,
            house_id,
            colony_id,
            fighters: Vec::new(),
        },
    )?;
    state.facility_index.squadrons_by_colony.insert(colony_id, id);
    state
        .colonies
        .get_mut(colony_id)
        .expect("colony checked above")
        .fighter_squadron_ids
        .push(id);
    Ok(id)
}

pub fn found_colony(state: &mut GameState, system_id: SystemId, owner: HouseId, population_units: u32) -> Result<ColonyId> {
    if !state.systems.contains(system_id) {
        bail!("found_colony: system {} does not exist", system_id);
    }
    if state.colony_index.by_system.contains_key(&system_id) {
        bail!("found_colony: system {} already colonized", system_id);
    }
    let id = state.ids.next_colony_id();
    let colony = Colony {
        id,
        system_id,
        owner,
        population_units,
        souls: population_units as u64 * 1_000_000,
        industrial: Industrial { units: 0, investment_cost: 0 },
        infrastructure: 0,
        tax_rate: 20,
        damage_millis: 0,
        blockaded: false,
        blockaded_by: Vec::new(),
        blockade_turns: 0,
        auto_repair: true,
        auto_loading_enabled: true,
        auto_reload_etacs: false,
        planetary_shield_level: 0,
        under_construction: None,
        construction_queue: Vec::new(),
        repair_queue: Vec::new(),
        capacity_violation: CapacityViolation::default(),
        neoria_ids: Vec::new(),
        kastra_ids: Vec::new(),
        ground_unit_ids: Vec::new(),
        fighter_squadron_ids: Vec::new(),
    };
    state.colonies.add(id, colony)?;
    state.colony_index.by_system.insert(system_id, id);
    Ok(id)
}

/// Ground conquest: ownership flips; facilities, squadrons and surviving
/// ground units change hands with the colony.
pub fn transfer_colony(state: &mut GameState, colony_id: ColonyId, new_owner: HouseId) -> Result<HouseId> {
    let colony = state
        .colonies
        .get(colony_id)
        .cloned()
        .ok_or_else(|| anyhow!("transfer_colony: colony {} not found", colony_id))?;
    let previous_owner = colony.owner;

    state.colonies.get_mut(colony_id).expect("colony checked above").owner = new_owner;
    for neoria_id in &colony.neoria_ids {
        if let Some(facility) = state.neoria.get_mut(*neoria_id) {
            facility.house_id = new_owner;
        }
    }
    for kastra_id in &colony.kastra_ids {
        if let Some(base) = state.kastra.get_mut(*kastra_id) {
            base.house_id = new_owner;
        }
    }
    for unit_id in &colony.ground_unit_ids {
        if let Some(unit) = state.ground_units.get_mut(*unit_id) {
            unit.house_id = new_owner;
        }
    }
    // colony fighters transfer with their squadrons
    for squadron_id in &colony.fighter_squadron_ids {
        let fighters = state
            .squadrons
            .get_mut(*squadron_id)
            .map(|s| {
                s.house_id = new_owner;
                s.fighters.clone()
            })
            .unwrap_or_default();
        for fighter_id in fighters {
            if let Some(ship) = state.ships.get_mut(fighter_id) {
                state.ship_index.by_house.remove(ship.house_id, fighter_id);
                ship.house_id = new_owner;
                state.ship_index.by_house.insert(new_owner, fighter_id);
            }
        }
    }
    Ok(previous_owner)
}

pub fn spawn_ground_unit(state: &mut GameState, house_id: HouseId, colony_id: ColonyId, class: GroundUnitClass, strength: u32) -> Result<GroundUnitId> {
    if !state.colonies.contains(colony_id) {
        bail!("spawn_ground_unit: colony {} not found", colony_id);
    }
    let id = state.ids.next_ground_unit_id();
    state.ground_units.add(
        id,
        GroundUnit {
            id,
            house_id,
            colony_id,
            class,
            strength,
        },
    )?;
    state.facility_index.ground_units_by_colony.insert(colony_id, id);
    state
        .colonies
        .get_mut(colony_id)
        .expect("colony checked above")
        .ground_unit_ids
        .push(id);
    Ok(id)
}

pub fn destroy_ground_unit(state: &mut GameState, unit_id: GroundUnitId) -> Result<()> {
    let unit = state
        .ground_units
        .get(unit_id)
        .cloned()
        .ok_or_else(|| anyhow!("destroy_ground_unit: unit {} not found", unit_id))?;
    if let Some(colony) = state.colonies.get_mut(unit.colony_id) {
        colony.ground_unit_ids.retain(|u| *u != unit_id);
    }
    state.facility_index.ground_units_by_colony.remove(unit.colony_id, unit_id);
    state.ground_units.remove(unit_id)?;
    Ok(())
}

pub fn spawn_neoria(state: &mut GameState, house_id: HouseId, colony_id: ColonyId, kind: NeoriaKind) -> Result<NeoriaId> {
    if !state.colonies.contains(colony_id) {
        bail!("spawn_neoria: colony {} not found", colony_id);
    }
    let id = state.ids.next_neoria_id();
    state.neoria.add(
        id,
        Neoria {
            id,
            colony_id,
            house_id,
            kind,
            level: 1,
            docks: Vec::new(),
        },
    )?;
    state.facility_index.neoria_by_colony.insert(colony_id, id);
    state
        .colonies
        .get_mut(colony_id)
        .expect("colony checked above")
        .neoria_ids
        .push(id);
    Ok(id)
}

pub fn destroy_neoria(state: &mut GameState, neoria_id: NeoriaId) -> Result<()> {
    let facility = state
        .neoria
        .get(neoria_id)
        .cloned()
        .ok_or_else(|| anyhow!("destroy_neoria: facility {} not found", neoria_id))?;
    if let Some(colony) = state.colonies.get_mut(facility.colony_id) {
        colony.neoria_ids.retain(|n| *n != neoria_id);
    }
    state.facility_index.neoria_by_colony.remove(facility.colony_id, neoria_id);
    state.neoria.remove(neoria_id)?;
    Ok(())
}

pub fn spawn_kastra(state: &mut GameState, house_id: HouseId, colony_id: ColonyId, level: u8) -> Result<KastraId> {
    if !state.colonies.contains(colony_id) {
        bail!("spawn_kastra: colony {} not found", colony_id);
    }
    let id = state.ids.next_kastra_id();
    state.kastra.add(
        id,
        Kastra {
            id,
            colony_id,
            house_id,
            level,
            state: ShipState::Undamaged,
        },
    )?;
    state.facility_index.kastra_by_colony.insert(colony_id, id);
    state
        .colonies
        .get_mut(colony_id)
        .expect("colony checked above")
        .kastra_ids
        .push(id);
    Ok(id)
}

pub fn destroy_kastra(state: &mut GameState, kastra_id: KastraId) -> Result<()> {
    let base = state
        .kastra
        .get(kastra_id)
        .cloned()
        .ok_or_else(|| anyhow!("destroy_kastra: starbase {} not found", kastra_id))?;
    if let Some(colony) = state.colonies.get_mut(base.colony_id) {
        colony.kastra_ids.retain(|k| *k != kastra_id);
    }
    state.facility_index.kastra_by_colony.remove(base.colony_id, kastra_id);
    state.kastra.remove(kastra_id)?;
    Ok(())
}

/// Marks the house eliminated and removes its diplomacy rows.
/// Remaining assets are left on the map as derelicts for other houses to
/// capture or salvage.
pub fn eliminate_house(state: &mut GameState, house_id: HouseId, turn: u32) -> Result<()> {
    let house = state
        .houses
        .get_mut(house_id)
        .ok_or_else(|| anyhow!("eliminate_house: house {} not found", house_id))?;
    house.status = HouseStatus::Eliminated;
    house.eliminated_turn = Some(turn);
    state.relations.retain(|(a, b), _| *a != house_id && *b != house_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::starmap::HexCoord;

    fn two_system_state() -> GameState {
        let mut state = GameState::new(GameId("test".into()), "test".into(), String::new());
        for (name, q) in [("Alpha", 0), ("Beta", 1)] {
            let id = state.ids.next_system_id();
            state
                .systems
                .add(
                    id,
                    System {
                        id,
                        name: name.into(),
                        coords: HexCoord::new(q, 0),
                        ring: q as u32,
                        planet_class: PlanetClass::Benign,
                        resource_rating: ResourceRating::Abundant,
                    },
                )
                .unwrap();
        }
        state
    }

    fn stats() -> ShipStats {
        ShipStats {
            attack: 4,
            defense: 4,
            wep_level: 1,
        }
    }

    #[test]
    fn fleet_ship_membership_stays_symmetric() {
        let mut state = two_system_state();
        let house = HouseId(1);
        let fleet = spawn_fleet(&mut state, house, SystemId(1), "1st Fleet".into()).unwrap();
        let ship = spawn_ship(&mut state, house, ShipClass::Destroyer, stats(), None).unwrap();

        assign_ship_to_fleet(&mut state, ship, fleet).unwrap();
        assert_eq!(state.fleets.get(fleet).unwrap().ships, vec![ship]);
        assert_eq!(state.ships.get(ship).unwrap().fleet_id, fleet);
        assert_eq!(state.ship_index.by_fleet.get(fleet), &[ship]);

        destroy_ship(&mut state, ship).unwrap();
        assert!(state.fleets.get(fleet).unwrap().ships.is_empty());
        assert!(state.ship_index.by_fleet.get(fleet).is_empty());
        assert!(state.ship_index.by_house.get(house).is_empty());
    }

    #[test]
    fn carrier_loss_takes_embarked_fighters_down() {
        let mut state = two_system_state();
        let house = HouseId(1);
        let carrier = spawn_ship(&mut state, house, ShipClass::Carrier, stats(), None).unwrap();
        let fighter = spawn_ship(&mut state, house, ShipClass::Fighter, stats(), None).unwrap();

        embark_fighter(&mut state, fighter, carrier).unwrap();
        assert_eq!(state.ship_index.by_carrier.get(carrier), &[fighter]);

        destroy_ship(&mut state, carrier).unwrap();
        assert!(!state.ships.contains(fighter));
        assert!(state.ship_index.by_carrier.get(carrier).is_empty());
    }

    #[test]
    fn second_colony_on_same_system_is_rejected() {
        let mut state = two_system_state();
        found_colony(&mut state, SystemId(1), HouseId(1), 10).unwrap();
        let result = found_colony(&mut state, SystemId(1), HouseId(2), 10);
        assert!(result.is_err());
        assert_eq!(state.colonies.len(), 1);
    }

    #[test]
    fn move_fleet_reindexes_location() {
        let mut state = two_system_state();
        let fleet = spawn_fleet(&mut state, HouseId(1), SystemId(1), "Scouts".into()).unwrap();

        move_fleet(&mut state, fleet, SystemId(2)).unwrap();
        assert!(state.fleet_index.by_system.get(SystemId(1)).is_empty());
        assert_eq!(state.fleet_index.by_system.get(SystemId(2)), &[fleet]);
        assert!(state.validate().is_empty());
    }

    #[test]
    fn elimination_clears_diplomacy_rows() {
        let mut state = two_system_state();
        for name in ["Atreides", "Harkonnen"] {
            let id = state.ids.next_house_id();
            state
                .houses
                .add(
                    id,
                    House {
                        id,
                        name: name.into(),
                        display_color: "#ffffff".into(),
                        treasury: 0,
                        prestige: 0,
                        status: HouseStatus::Active,
                        tech: Default::default(),
                        tax_policy: TaxPolicy::Standard,
                        nostr_pubkey: String::new(),
                        invite_code: String::new(),
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
        }
        state.set_relation(
            HouseId(1),
            HouseId(2),
            DiplomaticRelation {
                state: DiplomaticState::Enemy,
                since_turn: 3,
                violations: 1,
            },
        );

        eliminate_house(&mut state, HouseId(2), 9).unwrap();
        assert!(state.relations.is_empty());
        assert!(state.validate().is_empty());
    }
}
