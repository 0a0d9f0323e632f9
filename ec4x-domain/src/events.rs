use crate::ids::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    // maintenance
    BuildStarted,
    BuildCompleted,
    ShipCommissioned,
    FacilityCommissioned,
    GroundUnitMustered,
    RepairCompleted,
    UpkeepShortfall,
    IncomeCollected,
    ResearchAdvanced,
    PopulationGrowth,
    HouseStatusChanged,
    // command
    OrderAccepted,
    OrderRejected,
    CommandFailed,
    FightersLoaded,
    TroopsLoaded,
    CapacityViolation,
    FightersDisbanded,
    FleetStatusChanged,
    FleetDisbanded,
    // conflict
    FleetMoved,
    MovementFailed,
    FleetRetreated,
    SpaceCombat,
    ShipsDestroyed,
    StarbaseDestroyed,
    OrbitalAssault,
    GroundCombat,
    ColonyCaptured,
    InvasionRepelled,
    ColonyFounded,
    ColonyBombarded,
    BlockadeEstablished,
    BlockadeLifted,
    SalvageRecovered,
    EspionageSuccess,
    EspionageFailed,
    EspionageDetected,
    DiplomacyChanged,
    PactViolation,
    PrestigeAwarded,
    PrestigeVictory,
    HouseEliminated,
    GameCompleted,
    // daemon
    SlotClaimed,
    TurnResolved,
}

/// One entry in the per-turn event log. Ids may reference entities removed
/// during the same turn; consumers must not assume the
/// entity still resolves.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GameEvent {
    pub turn: u32,
    pub event_type: EventType,
    pub house_id: Option<HouseId>,
    pub fleet_id: Option<FleetId>,
    pub system_id: Option<SystemId>,
    pub colony_id: Option<ColonyId>,
    pub source_house_id: Option<HouseId>,
    pub target_house_id: Option<HouseId>,
    pub success: Option<bool>,
    pub description: String,
    /// Pre-rendered JSON payload for audit consumers; schema is per event
    /// type and versioned with the daemon.
    pub details: Option<String>,
}

impl GameEvent {
    pub fn new(turn: u32, event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            turn,
            event_type,
            house_id: None,
            fleet_id: None,
            system_id: None,
            colony_id: None,
            source_house_id: None,
            target_house_id: None,
            success: None,
            description: description.into(),
            details: None,
        }
    }

    pub fn house(mut self, house_id: HouseId) -> Self {
        self.house_id = Some(house_id);
        self
    }

    pub fn fleet(mut self, fleet_id: FleetId) -> Self {
        self.fleet_id = Some(fleet_id);
        self
    }

    pub fn system(mut self, system_id: SystemId) -> Self {
        self.system_id = Some(system_id);
        self
    }

    pub fn colony(mut self, colony_id: ColonyId) -> Self {
        self.colony_id = Some(colony_id);
        self
    }

    pub fn source(mut self, house_id: HouseId) -> Self {
        self.source_house_id = Some(house_id);
        self
    }

    pub fn target(mut self, house_id: HouseId) -> Self {
        self.target_house_id = Some(house_id);
        self
    }

    pub fn outcome(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn details_json(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Whether a house is entitled to see this event in its snapshot:
    /// either it concerns the house directly or happened where it can see.
    pub fn concerns(&self, house_id: HouseId) -> bool {
        self.house_id == Some(house_id)
            || self.source_house_id == Some(house_id)
            || self.target_house_id == Some(house_id)
    }
}
