use crate::events::GameEvent;
use crate::ids::*;
use crate::intel::IntelligenceDatabase;
use crate::model::*;
use crate::starmap::Starmap;
use crate::store::{EntityStore, MultiIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const STATE_BLOB_VERSION: u8 = 1;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct FleetIndexes {
    pub by_system: MultiIndex<SystemId, FleetId>,
    pub by_house: MultiIndex<HouseId, FleetId>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct ShipIndexes {
    pub by_fleet: MultiIndex<FleetId, ShipId>,
    /// Embarked fighters keyed by carrier.
    pub by_carrier: MultiIndex<ShipId, ShipId>,
    pub by_house: MultiIndex<HouseId, ShipId>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct ColonyIndexes {
    /// At most one colony per system.
    pub by_system: BTreeMap<SystemId, ColonyId>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct FacilityIndexes {
    pub neoria_by_colony: MultiIndex<ColonyId, NeoriaId>,
    pub kastra_by_colony: MultiIndex<ColonyId, KastraId>,
    pub squadrons_by_colony: MultiIndex<ColonyId, SquadronId>,
    pub ground_units_by_colony: MultiIndex<ColonyId, GroundUnitId>,
}

/// Root aggregate for one game. Mutated only inside the turn resolver and
/// the entity-ops layer; everything else treats it as an opaque value
/// between turns.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GameState {
    pub game_id: GameId,
    pub name: String,
    pub description: String,
    pub turn: u32,
    pub phase: GamePhase,
    pub turn_deadline: Option<DateTime<Utc>>,

    pub starmap: Starmap,

    pub houses: EntityStore<HouseId, House>,
    pub systems: EntityStore<SystemId, System>,
    pub colonies: EntityStore<ColonyId, Colony>,
    pub fleets: EntityStore<FleetId, Fleet>,
    pub ships: EntityStore<ShipId, Ship>,
    pub squadrons: EntityStore<SquadronId, Squadron>,
    pub ground_units: EntityStore<GroundUnitId, GroundUnit>,
    pub neoria: EntityStore<NeoriaId, Neoria>,
    pub kastra: EntityStore<KastraId, Kastra>,

    pub colony_index: ColonyIndexes,
    pub fleet_index: FleetIndexes,
    pub ship_index: ShipIndexes,
    pub facility_index: FacilityIndexes,

    /// Wreck value left by destroyed ships, per system, until a fleet
    /// with a Salvage command collects it.
    pub salvage_fields: BTreeMap<SystemId, i64>,

    /// Keyed by normalized (low, high) house pair.
    pub relations: BTreeMap<(HouseId, HouseId), DiplomaticRelation>,
    pub violation_history: BTreeMap<HouseId, Vec<ViolationRecord>>,

    pub intel: BTreeMap<HouseId, IntelligenceDatabase>,

    /// Events of the most recent resolution; consumed by view derivation
    /// and publishing, then rotated on the next turn.
    pub last_turn_events: Vec<GameEvent>,

    pub ids: IdAllocator,

    /// Where this game's database lives. Runtime-only, never serialized.
    #[serde(skip)]
    pub db_path: Option<PathBuf>,
}

impl GameState {
    pub fn new(game_id: GameId, name: String, description: String) -> Self {
        Self {
            game_id,
            name,
            description,
            turn: 1,
            phase: GamePhase::Command,
            turn_deadline: None,
            starmap: Starmap::default(),
            houses: EntityStore::default(),
            systems: EntityStore::default(),
            colonies: EntityStore::default(),
            fleets: EntityStore::default(),
            ships: EntityStore::default(),
            squadrons: EntityStore::default(),
            ground_units: EntityStore::default(),
            neoria: EntityStore::default(),
            kastra: EntityStore::default(),
            colony_index: ColonyIndexes::default(),
            fleet_index: FleetIndexes::default(),
            ship_index: ShipIndexes::default(),
            facility_index: FacilityIndexes::default(),
            salvage_fields: BTreeMap::new(),
            relations: BTreeMap::new(),
            violation_history: BTreeMap::new(),
            intel: BTreeMap::new(),
            last_turn_events: Vec::new(),
            ids: IdAllocator::default(),
            db_path: None,
        }
    }

    pub fn relation_key(a: HouseId, b: HouseId) -> (HouseId, HouseId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn relation(&self, a: HouseId, b: HouseId) -> DiplomaticRelation {
        self.relations
            .get(&Self::relation_key(a, b))
            .copied()
            .unwrap_or(DiplomaticRelation {
                state: DiplomaticState::Neutral,
                since_turn: 0,
                violations: 0,
            })
    }

    pub fn set_relation(&mut self, a: HouseId, b: HouseId, relation: DiplomaticRelation) {
        self.relations.insert(Self::relation_key(a, b), relation);
    }

    /// Houses at Hostile or Enemy standing will engage on contact.
    pub fn are_hostile(&self, a: HouseId, b: HouseId) -> bool {
        if a == b {
            return false;
        }
        matches!(
            self.relation(a, b).state,
            DiplomaticState::Hostile | DiplomaticState::Enemy
        )
    }

    pub fn active_houses(&self) -> Vec<HouseId> {
        self.houses
            .iter()
            .filter(|h| h.is_playing())
            .map(|h| h.id)
            .collect()
    }

    pub fn bound_houses(&self) -> Vec<HouseId> {
        self.houses
            .iter()
            .filter(|h| h.is_playing() && h.is_bound())
            .map(|h| h.id)
            .collect()
    }

    pub fn colony_at(&self, system: SystemId) -> Option<&Colony> {
        self.colony_index
            .by_system
            .get(&system)
            .and_then(|id| self.colonies.get(*id))
    }

    pub fn fleets_at(&self, system: SystemId) -> Vec<&Fleet> {
        self.fleet_index
            .by_system
            .get(system)
            .iter()
            .filter_map(|id| self.fleets.get(*id))
            .collect()
    }

    /// Rebuilds every secondary index from the primary stores and reports
    /// each divergence found. An empty result means stores and indexes agree.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (label, result) in [
            ("houses", self.houses.check_coherence()),
            ("systems", self.systems.check_coherence()),
            ("colonies", self.colonies.check_coherence()),
            ("fleets", self.fleets.check_coherence()),
            ("ships", self.ships.check_coherence()),
            ("squadrons", self.squadrons.check_coherence()),
            ("ground_units", self.ground_units.check_coherence()),
            ("neoria", self.neoria.check_coherence()),
            ("kastra", self.kastra.check_coherence()),
        ] {
            if let Err(problem) = result {
                problems.push(format!("{label}: {problem}"));
            }
        }

        // one colony per system, and the index points back correctly
        for (colony_id, colony) in self.colonies.iter_with_ids() {
            match self.colony_index.by_system.get(&colony.system_id) {
                Some(indexed) if *indexed == colony_id => {}
                Some(indexed) => problems.push(format!(
                    "colony {} at system {} shadowed by colony {} in index",
                    colony_id, colony.system_id, indexed
                )),
                None => problems.push(format!("colony {} missing from by_system index", colony_id)),
            }
        }
        for (system_id, colony_id) in &self.colony_index.by_system {
            match self.colonies.get(*colony_id) {
                Some(colony) if colony.system_id == *system_id => {}
                Some(_) => problems.push(format!("colony index entry {} points at wrong system", system_id)),
                None => problems.push(format!("colony index entry {} points at missing colony", system_id)),
            }
        }

        // fleet membership agrees with ship.fleet_id and ownership
        for (fleet_id, fleet) in self.fleets.iter_with_ids() {
            for ship_id in &fleet.ships {
                match self.ships.get(*ship_id) {
                    Some(ship) => {
                        if ship.fleet_id != fleet_id {
                            problems.push(format!("ship {} listed in fleet {} but assigned to {}", ship_id, fleet_id, ship.fleet_id));
                        }
                        if ship.house_id != fleet.house_id {
                            problems.push(format!("ship {} owned by {} inside fleet of house {}", ship_id, ship.house_id, fleet.house_id));
                        }
                    }
                    None => problems.push(format!("fleet {} references missing ship {}", fleet_id, ship_id)),
                }
            }
            let indexed = self.ship_index.by_fleet.get(fleet_id);
            if indexed.len() != fleet.ships.len() || fleet.ships.iter().any(|s| !indexed.contains(s)) {
                problems.push(format!("by_fleet index for fleet {} diverges from fleet.ships", fleet_id));
            }
            if !self.fleet_index.by_system.get(fleet.location).contains(&fleet_id) {
                problems.push(format!("fleet {} not indexed at its location {}", fleet_id, fleet.location));
            }
            if !self.fleet_index.by_house.get(fleet.house_id).contains(&fleet_id) {
                problems.push(format!("fleet {} not indexed under house {}", fleet_id, fleet.house_id));
            }
        }

        // a fleet appears under exactly one system key
        for (system_id, fleet_ids) in self.fleet_index.by_system.iter() {
            for fleet_id in fleet_ids {
                match self.fleets.get(*fleet_id) {
                    Some(fleet) if fleet.location == system_id => {}
                    Some(fleet) => problems.push(format!(
                        "fleet {} indexed at {} but located at {}",
                        fleet_id, system_id, fleet.location
                    )),
                    None => problems.push(format!("by_system index references missing fleet {}", fleet_id)),
                }
            }
        }

        // carrier / fighter links are symmetric
        for (ship_id, ship) in self.ships.iter_with_ids() {
            if let Some(carrier_id) = ship.assigned_to_carrier {
                let carrier_lists = self
                    .ships
                    .get(carrier_id)
                    .map(|c| c.embarked_fighters.contains(&ship_id))
                    .unwrap_or(false);
                let indexed = self.ship_index.by_carrier.get(carrier_id).contains(&ship_id);
                if !carrier_lists || !indexed {
                    problems.push(format!("fighter {} carrier link to {} is one-sided", ship_id, carrier_id));
                }
            }
            // ownership index membership
            if !self.ship_index.by_house.get(ship.house_id).contains(&ship_id) {
                problems.push(format!("ship {} not indexed under house {}", ship_id, ship.house_id));
            }
        }
        for (house_id, ship_ids) in self.ship_index.by_house.iter() {
            for ship_id in ship_ids {
                match self.ships.get(*ship_id) {
                    Some(ship) if ship.house_id == house_id => {}
                    _ => problems.push(format!("by_house index entry ({}, {}) stale", house_id, ship_id)),
                }
            }
        }

        // no diplomacy rows for eliminated houses
        for (a, b) in self.relations.keys() {
            for house_id in [a, b] {
                match self.houses.get(*house_id) {
                    Some(house) if house.is_playing() => {}
                    _ => problems.push(format!("diplomatic relation references inactive house {}", house_id)),
                }
            }
        }

        problems
    }
}
