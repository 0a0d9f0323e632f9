use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Raw value reserved for "no entity assigned" in every id namespace.
pub const UNASSIGNED: u32 = 0;

pub trait EntityId: Copy + Eq + Ord + std::hash::Hash + Display {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;

    fn is_unassigned(self) -> bool {
        self.raw() == UNASSIGNED
    }
}

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
        pub struct $name(pub u32);

        impl EntityId for $name {
            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(HouseId);
entity_id!(SystemId);
entity_id!(FleetId);
entity_id!(ShipId);
entity_id!(ColonyId);
entity_id!(SquadronId);
entity_id!(NeoriaId);
entity_id!(KastraId);
entity_id!(GroundUnitId);

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct GameId(pub String);

impl Display for GameId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-namespace id allocation. Ids are never reused, even after
/// the entity they named has been destroyed.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    next_house: u32,
    next_system: u32,
    next_fleet: u32,
    next_ship: u32,
    next_colony: u32,
    next_squadron: u32,
    next_neoria: u32,
    next_kastra: u32,
    next_ground_unit: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next_house: 1,
            next_system: 1,
            next_fleet: 1,
            next_ship: 1,
            next_colony: 1,
            next_squadron: 1,
            next_neoria: 1,
            next_kastra: 1,
            next_ground_unit: 1,
        }
    }
}

macro_rules! allocate {
    ($fn_name:ident, $field:ident, $id:ident) => {
        pub fn $fn_name(&mut self) -> $id {
            let id = $id(self.$field);
            self.$field += 1;
            id
        }
    };
}

impl IdAllocator {
    allocate!(next_house_id, next_house, HouseId);
    allocate!(next_system_id, next_system, SystemId);
    allocate!(next_fleet_id, next_fleet, FleetId);
    allocate!(next_ship_id, next_ship, ShipId);
    allocate!(next_colony_id, next_colony, ColonyId);
    allocate!(next_squadron_id, next_squadron, SquadronId);
    allocate!(next_neoria_id, next_neoria, NeoriaId);
    allocate!(next_kastra_id, next_kastra, KastraId);
    allocate!(next_ground_unit_id, next_ground_unit, GroundUnitId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_restart_at_zero() {
        let mut alloc = IdAllocator::default();
        let first = alloc.next_fleet_id();
        let second = alloc.next_fleet_id();

        assert_eq!(first, FleetId(1));
        assert_eq!(second, FleetId(2));
        assert!(!first.is_unassigned());
        assert!(FleetId(UNASSIGNED).is_unassigned());
    }
}
