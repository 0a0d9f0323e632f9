use crate::ids::*;
use crate::model::{BuildItem, DiplomaticState, FleetStatus};
use crate::tech::TechField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// Syntactic fleet order as it arrives off the wire. Target fields are
/// optional here; semantic validation against the game state happens in the
/// Command phase and produces rejection events for bad orders.
#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum FleetOrderKind {
    Hold,
    Move,
    SeekHome,
    Patrol,
    GuardStarbase,
    GuardColony,
    Blockade,
    Bombard,
    Invade,
    Blitz,
    Colonize,
    ScoutColony,
    ScoutSystem,
    HackStarbase,
    JoinFleet,
    Rendezvous,
    Salvage,
    View,
    SetStatus,
}

impl FleetOrderKind {
    pub fn needs_target_system(&self) -> bool {
        matches!(
            self,
            FleetOrderKind::Move
                | FleetOrderKind::Blockade
                | FleetOrderKind::Bombard
                | FleetOrderKind::Invade
                | FleetOrderKind::Blitz
                | FleetOrderKind::Colonize
                | FleetOrderKind::ScoutColony
                | FleetOrderKind::ScoutSystem
                | FleetOrderKind::HackStarbase
                | FleetOrderKind::Rendezvous
                | FleetOrderKind::Salvage
                | FleetOrderKind::View
        )
    }

    pub fn needs_target_fleet(&self) -> bool {
        matches!(self, FleetOrderKind::JoinFleet)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FleetOrder {
    pub fleet_id: FleetId,
    pub kind: FleetOrderKind,
    pub target_system: Option<SystemId>,
    pub target_fleet: Option<FleetId>,
    pub roe: Option<u8>,
    pub priority: u8,
    /// Only for `SetStatus`.
    pub status: Option<FleetStatus>,
}

impl FleetOrder {
    pub fn simple(fleet_id: FleetId, kind: FleetOrderKind) -> Self {
        Self {
            fleet_id,
            kind,
            target_system: None,
            target_fleet: None,
            roe: None,
            priority: 0,
            status: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildOrder {
    pub colony_id: ColonyId,
    pub item: BuildItem,
    pub quantity: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ResearchAllocation {
    pub economic: i64,
    pub science: i64,
    pub technology: BTreeMap<TechField, i64>,
}

impl ResearchAllocation {
    pub fn total_points(&self) -> i64 {
        self.economic + self.science + self.technology.values().sum::<i64>()
    }
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum DiplomaticAction {
    Neutral,
    Hostile,
    Enemy,
}

impl DiplomaticAction {
    pub fn target_state(&self) -> DiplomaticState {
        match self {
            DiplomaticAction::Neutral => DiplomaticState::Neutral,
            DiplomaticAction::Hostile => DiplomaticState::Hostile,
            DiplomaticAction::Enemy => DiplomaticState::Enemy,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DiplomaticOrder {
    pub target: HouseId,
    pub action: DiplomaticAction,
    pub terms: Option<String>,
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum EspionageKind {
    ColonyIntel,
    SystemIntel,
    StarbaseIntel,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EspionageOrder {
    pub kind: EspionageKind,
    pub target: SystemId,
    pub budget: i64,
}

/// Everything one house submits for one turn.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub house_id: HouseId,
    pub turn: u32,
    pub fleet_commands: Vec<FleetOrder>,
    pub build_commands: Vec<BuildOrder>,
    pub research_allocation: ResearchAllocation,
    pub diplomatic_commands: Vec<DiplomaticOrder>,
    pub espionage_actions: Vec<EspionageOrder>,
    pub ebp_investment: i64,
    pub cip_investment: i64,
}

impl CommandPacket {
    /// The packet a house is treated as having submitted when the deadline
    /// passes without orders: everything holds, nothing is spent.
    pub fn empty(house_id: HouseId, turn: u32) -> Self {
        Self {
            house_id,
            turn,
            fleet_commands: Vec::new(),
            build_commands: Vec::new(),
            research_allocation: ResearchAllocation::default(),
            diplomatic_commands: Vec::new(),
            espionage_actions: Vec::new(),
            ebp_investment: 0,
            cip_investment: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fleet_commands.is_empty()
            && self.build_commands.is_empty()
            && self.research_allocation.total_points() == 0
            && self.diplomatic_commands.is_empty()
            && self.espionage_actions.is_empty()
            && self.ebp_investment == 0
            && self.cip_investment == 0
    }
}
