use crate::ids::*;
use crate::starmap::HexCoord;
use crate::tech::TechTree;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum GamePhase {
    Conflict,
    Command,
    Maintenance,
    Completed,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HouseStatus {
    Active,
    Autopilot,
    DefensiveCollapse,
    Eliminated,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TaxPolicy {
    Low,
    Standard,
    High,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct House {
    pub id: HouseId,
    pub name: String,
    pub display_color: String,
    /// May go negative; sustained shortfall degrades infrastructure and
    /// eventually the house status.
    pub treasury: i64,
    pub prestige: i64,
    pub status: HouseStatus,
    pub tech: TechTree,
    pub tax_policy: TaxPolicy,
    /// Hex-encoded x-only pubkey of the bound player, empty until claimed.
    pub nostr_pubkey: String,
    /// Short mnemonic exchanged out-of-band; authenticates the first slot
    /// claim for this house.
    pub invite_code: String,
    pub consecutive_shortfall_turns: u32,
    pub negative_prestige_turns: u32,
    pub turns_without_orders: u32,
    pub planet_breaker_count: u32,
    pub morale_millis: i32,
    pub prestige_victory_progress: u32,
    pub eliminated_turn: Option<u32>,
}

impl House {
    pub fn is_bound(&self) -> bool {
        !self.nostr_pubkey.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        !matches!(self.status, HouseStatus::Eliminated)
    }
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum PlanetClass {
    Extreme,
    Desolate,
    Harsh,
    Benign,
    Lush,
    Eden,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum ResourceRating {
    VeryPoor,
    Poor,
    Abundant,
    Rich,
    VeryRich,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct System {
    pub id: SystemId,
    pub name: String,
    pub coords: HexCoord,
    /// Cubic distance from the hub.
    pub ring: u32,
    pub planet_class: PlanetClass,
    pub resource_rating: ResourceRating,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Industrial {
    pub units: u32,
    /// Cost of the next industrial unit; grows with each investment.
    pub investment_cost: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityViolation {
    pub excess_fighters: u32,
    pub grace_turns_used: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ConstructionProject {
    pub item: BuildItem,
    pub quantity: u32,
    pub turns_remaining: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairJob {
    pub ship_id: ShipId,
    pub points_accumulated: u32,
    pub points_required: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Colony {
    pub id: ColonyId,
    pub system_id: SystemId,
    pub owner: HouseId,
    pub population_units: u32,
    /// `population_units` scaled by one million, tracked separately so
    /// growth fractions accumulate between whole-unit steps.
    pub souls: u64,
    pub industrial: Industrial,
    pub infrastructure: u32,
    /// Integer percent of gross output collected as tax.
    pub tax_rate: u8,
    /// Accumulated infrastructure damage, fixed-point per-mille (0..=1000).
    pub damage_millis: u32,
    pub blockaded: bool,
    pub blockaded_by: Vec<HouseId>,
    pub blockade_turns: u32,
    pub auto_repair: bool,
    pub auto_loading_enabled: bool,
    pub auto_reload_etacs: bool,
    pub planetary_shield_level: u8,
    pub under_construction: Option<ConstructionProject>,
    pub construction_queue: Vec<ConstructionProject>,
    pub repair_queue: Vec<RepairJob>,
    pub capacity_violation: CapacityViolation,
    pub neoria_ids: Vec<NeoriaId>,
    pub kastra_ids: Vec<KastraId>,
    pub ground_unit_ids: Vec<GroundUnitId>,
    pub fighter_squadron_ids: Vec<SquadronId>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FleetStatus {
    Active,
    Reserve,
    Mothballed,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RetreatPolicy {
    Never,
    MissionsOnly,
    Conservative,
    Aggressive,
}

/// A fleet's current standing order, with validated targets. Set during the
/// Command phase, executed during Conflict.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetCommand {
    Hold,
    Move { to: SystemId },
    SeekHome,
    Patrol,
    GuardStarbase,
    GuardColony,
    Blockade { system: SystemId },
    Bombard { system: SystemId },
    Invade { system: SystemId },
    Blitz { system: SystemId },
    Colonize { system: SystemId },
    ScoutColony { system: SystemId },
    ScoutSystem { system: SystemId },
    HackStarbase { system: SystemId },
    JoinFleet { fleet: FleetId },
    Rendezvous { system: SystemId },
    Salvage { system: SystemId },
    View { system: SystemId },
}

impl FleetCommand {
    /// Destination this command wants the fleet to travel toward, if any.
    pub fn destination(&self) -> Option<SystemId> {
        match self {
            FleetCommand::Move { to } => Some(*to),
            FleetCommand::Blockade { system }
            | FleetCommand::Bombard { system }
            | FleetCommand::Invade { system }
            | FleetCommand::Blitz { system }
            | FleetCommand::Colonize { system }
            | FleetCommand::ScoutColony { system }
            | FleetCommand::ScoutSystem { system }
            | FleetCommand::HackStarbase { system }
            | FleetCommand::Rendezvous { system }
            | FleetCommand::Salvage { system }
            | FleetCommand::View { system } => Some(*system),
            _ => None,
        }
    }

    /// Mission commands may be overridden by auto-retreat only under the
    /// more permissive policies.
    pub fn is_mission(&self) -> bool {
        matches!(
            self,
            FleetCommand::Blockade { .. }
                | FleetCommand::Bombard { .. }
                | FleetCommand::Invade { .. }
                | FleetCommand::Blitz { .. }
                | FleetCommand::Colonize { .. }
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FallbackRoute {
    pub target_colony: ColonyId,
    pub path: Vec<SystemId>,
    pub computed_turn: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Fleet {
    pub id: FleetId,
    pub house_id: HouseId,
    pub location: SystemId,
    pub ships: Vec<ShipId>,
    pub status: FleetStatus,
    pub command: FleetCommand,
    /// Rules of engagement, 0 (avoid everything) to 10 (never retreat).
    pub roe: u8,
    pub name: String,
    pub retreat_policy: RetreatPolicy,
    pub fallback_route: Option<FallbackRoute>,
    /// Turns left until a mothballed fleet finishes reactivation.
    pub reactivation_turns: u32,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum ShipClass {
    Fighter,
    Scout,
    Corvette,
    Frigate,
    Destroyer,
    LightCruiser,
    HeavyCruiser,
    Battlecruiser,
    Battleship,
    Dreadnought,
    Carrier,
    Etac,
    TroopTransport,
    PlanetBreaker,
}

impl ShipClass {
    pub fn is_fighter(&self) -> bool {
        matches!(self, ShipClass::Fighter)
    }

    pub fn is_spacelift(&self) -> bool {
        matches!(self, ShipClass::Etac | ShipClass::TroopTransport)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShipState {
    Undamaged,
    Crippled,
    Destroyed,
}

/// Combat stats frozen at construction time; later tech advances do not
/// retrofit existing hulls.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipStats {
    pub attack: u32,
    pub defense: u32,
    pub wep_level: u8,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum CargoKind {
    Colonists,
    Troops,
    Salvage,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cargo {
    pub kind: CargoKind,
    pub quantity: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Ship {
    pub id: ShipId,
    pub house_id: HouseId,
    /// Zero while unassigned (under construction, or a fighter based at a
    /// colony squadron).
    pub fleet_id: FleetId,
    pub class: ShipClass,
    pub stats: ShipStats,
    pub state: ShipState,
    pub cargo: Option<Cargo>,
    pub assigned_to_carrier: Option<ShipId>,
    pub embarked_fighters: Vec<ShipId>,
    pub squadron_id: Option<SquadronId>,
}

/// Colony-based fighter group. Fighters leave the squadron when auto-loaded
/// onto a carrier and come back when disembarked.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Squadron {
    pub id: SquadronId,
    pub house_id: HouseId,
    pub colony_id: ColonyId,
    pub fighters: Vec<ShipId>,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum GroundUnitClass {
    Marine,
    Army,
    Battery,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GroundUnit {
    pub id: GroundUnitId,
    pub house_id: HouseId,
    pub colony_id: ColonyId,
    pub class: GroundUnitClass,
    pub strength: u32,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum NeoriaKind {
    Spaceport,
    Shipyard,
    Drydock,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DockJob {
    pub ship_class: ShipClass,
    pub turns_remaining: u32,
}

/// Orbital industry: spaceports, shipyards and drydocks. Capital hulls are
/// laid down in shipyard docks; drydocks accumulate repair points.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Neoria {
    pub id: NeoriaId,
    pub colony_id: ColonyId,
    pub house_id: HouseId,
    pub kind: NeoriaKind,
    pub level: u8,
    pub docks: Vec<DockJob>,
}

/// Starbase. Fights in the orbital-assault sub-phase and anchors the
/// defensive rating used by fallback routing.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Kastra {
    pub id: KastraId,
    pub colony_id: ColonyId,
    pub house_id: HouseId,
    pub level: u8,
    pub state: ShipState,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DiplomaticState {
    Neutral,
    Hostile,
    Enemy,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiplomaticRelation {
    pub state: DiplomaticState,
    pub since_turn: u32,
    pub violations: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ViolationRecord {
    pub turn: u32,
    pub against: HouseId,
    pub description: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildItem {
    Ship(ShipClass),
    Facility(FacilityKind),
    Ground(GroundUnitClass),
    Industrial,
    Infrastructure,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum FacilityKind {
    Spaceport,
    Shipyard,
    Drydock,
    Starbase,
    PlanetaryShield,
}
