use crate::events::GameEvent;
use crate::ids::*;
use crate::model::*;
use crate::starmap::HexCoord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;

/// Last successful reconnaissance results per house, keyed by system.
/// Reports stay accessible until overwritten by a fresher one and may be
/// arbitrarily stale.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct IntelligenceDatabase {
    pub colony_reports: BTreeMap<SystemId, ColonyReport>,
    pub system_reports: BTreeMap<SystemId, SystemReport>,
    pub starbase_reports: BTreeMap<SystemId, StarbaseReport>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ColonyReport {
    pub system_id: SystemId,
    pub owner: HouseId,
    pub population_units: u32,
    pub industrial_units: u32,
    pub infrastructure: u32,
    pub planetary_shield_level: u8,
    pub gathered_turn: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SystemReport {
    pub system_id: SystemId,
    pub name: String,
    pub coords: HexCoord,
    pub planet_class: PlanetClass,
    pub resource_rating: ResourceRating,
    pub fleet_count: u32,
    pub gathered_turn: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StarbaseReport {
    pub system_id: SystemId,
    pub starbase_levels: Vec<u8>,
    pub gathered_turn: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum VisibilityLevel {
    None,
    Adjacent,
    Scouted,
    Occupied,
    Owned,
}

/// What one house is entitled to see of one system. Constructed by
/// deliberate inclusion: fields stay `None` unless the visibility level
/// grants them.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SystemView {
    pub id: SystemId,
    pub visibility: VisibilityLevel,
    pub name: Option<String>,
    pub coords: Option<HexCoord>,
    pub planet_class: Option<PlanetClass>,
    pub resource_rating: Option<ResourceRating>,
    /// Owner and rough strength of a foreign colony, granted at Occupied.
    pub foreign_colony: Option<ForeignColonySighting>,
    /// Stale intel carried over from the reconnaissance database.
    pub colony_report: Option<ColonyReport>,
    pub starbase_report: Option<StarbaseReport>,
}

impl SystemView {
    pub fn hidden(id: SystemId) -> Self {
        Self {
            id,
            visibility: VisibilityLevel::None,
            name: None,
            coords: None,
            planet_class: None,
            resource_rating: None,
            foreign_colony: None,
            colony_report: None,
            starbase_report: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ForeignColonySighting {
    pub owner: HouseId,
    /// Coarse defense estimate, not exact unit counts.
    pub approximate_strength: u32,
    pub blockaded: bool,
}

/// Per-player projection of the game state: everything this house owns in
/// full, everything else through the visibility filter. This is the payload
/// of a Turn State event, so nothing outside the filter may appear here.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub game_id: GameId,
    pub turn: u32,
    pub phase: GamePhase,
    pub house: House,
    pub own_colonies: Vec<Colony>,
    pub own_fleets: Vec<Fleet>,
    pub own_ships: Vec<Ship>,
    pub own_squadrons: Vec<Squadron>,
    pub own_ground_units: Vec<GroundUnit>,
    pub own_neoria: Vec<Neoria>,
    pub own_kastra: Vec<Kastra>,
    pub systems: Vec<SystemView>,
    pub relations: BTreeMap<HouseId, DiplomaticRelation>,
    pub events: Vec<GameEvent>,
    pub intel: IntelligenceDatabase,
}
