use crate::ids::SystemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;

/// Axial hex coordinate. Ring distance from the hub uses the cubic metric.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct HexCoord {
    pub q: i32,
    pub r: i32,
}

impl HexCoord {
    pub fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    pub fn distance_to(&self, other: &HexCoord) -> u32 {
        let dq = (self.q - other.q).abs();
        let dr = (self.r - other.r).abs();
        let ds = ((self.q + self.r) - (other.q + other.r)).abs();
        ((dq + dr + ds) / 2) as u32
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display)]
pub enum LaneClass {
    Major,
    Minor,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLane {
    pub from: SystemId,
    pub to: SystemId,
    pub class: LaneClass,
}

/// The fixed adjacency graph of the game. Systems themselves live in the
/// entity store; the starmap only knows coordinates topology: which systems
/// connect, over what lane class, and which system is the hub.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Starmap {
    pub hub: SystemId,
    lanes: Vec<JumpLane>,
    adjacency: BTreeMap<SystemId, Vec<(SystemId, LaneClass)>>,
}

impl Starmap {
    pub fn new(hub: SystemId) -> Self {
        Self {
            hub,
            lanes: Vec::new(),
            adjacency: BTreeMap::new(),
        }
    }

    /// Lanes are undirected; both traversal directions are registered.
    pub fn add_lane(&mut self, a: SystemId, b: SystemId, class: LaneClass) {
        if self.are_adjacent(a, b) {
            return;
        }
        self.lanes.push(JumpLane { from: a, to: b, class });
        self.adjacency.entry(a).or_default().push((b, class));
        self.adjacency.entry(b).or_default().push((a, class));
    }

    pub fn neighbors(&self, system: SystemId) -> &[(SystemId, LaneClass)] {
        self.adjacency
            .get(&system)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn are_adjacent(&self, a: SystemId, b: SystemId) -> bool {
        self.neighbors(a).iter().any(|(other, _)| *other == b)
    }

    pub fn lanes(&self) -> &[JumpLane] {
        &self.lanes
    }

    pub fn system_count(&self) -> usize {
        self.adjacency.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_distance_is_cubic() {
        let hub = HexCoord::new(0, 0);
        assert_eq!(hub.distance_to(&HexCoord::new(0, 0)), 0);
        assert_eq!(hub.distance_to(&HexCoord::new(1, 0)), 1);
        assert_eq!(hub.distance_to(&HexCoord::new(2, -1)), 2);
        assert_eq!(hub.distance_to(&HexCoord::new(-3, 3)), 3);
    }

    #[test]
    fn lanes_are_undirected_and_deduplicated() {
        let mut map = Starmap::new(SystemId(1));
        map.add_lane(SystemId(1), SystemId(2), LaneClass::Major);
        map.add_lane(SystemId(2), SystemId(1), LaneClass::Minor); // duplicate edge, ignored

        assert_eq!(map.lanes().len(), 1);
        assert!(map.are_adjacent(SystemId(1), SystemId(2)));
        assert!(map.are_adjacent(SystemId(2), SystemId(1)));
        assert_eq!(map.neighbors(SystemId(1)), &[(SystemId(2), LaneClass::Major)]);
    }
}
