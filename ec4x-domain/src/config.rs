//! Gameplay balance tables, loaded from KDL once at daemon start and passed
//! to the rules engine by shared reference. The embedded defaults keep the
//! `resolve` subcommand and the test suite independent of external files.

use crate::kdl_util::*;
use crate::model::{FacilityKind, GroundUnitClass, PlanetClass, ResourceRating, ShipClass};
use anyhow::{anyhow, Context, Result};
use kdl::{KdlDocument, KdlNode};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

lazy_static! {
    /// Parsed form of the embedded `config/balance.kdl`.
    pub static ref BUILTIN_CONFIG: GameConfig =
        GameConfig::from_kdl(include_str!("../config/balance.kdl")).expect("embedded balance tables parse");
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ShipSpec {
    pub class: ShipClass,
    pub attack: u32,
    pub defense: u32,
    pub cost: i64,
    pub upkeep: i64,
    pub build_turns: u32,
    pub cargo: u32,
    pub hangar: u32,
    /// Laid down in a shipyard dock rather than on the colony ground.
    pub dock_required: bool,
    pub cst_required: u8,
    pub fd_required: u8,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FacilitySpec {
    pub kind: FacilityKind,
    pub cost: i64,
    pub upkeep: i64,
    pub build_turns: u32,
    pub repair_points: u32,
    pub attack: u32,
    pub defense: u32,
    pub strength: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GroundSpec {
    pub class: GroundUnitClass,
    pub cost: i64,
    pub upkeep: i64,
    pub build_turns: u32,
    pub strength: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EconomyConfig {
    pub planet_base: BTreeMap<PlanetClass, i64>,
    pub resource_multiplier_millis: BTreeMap<ResourceRating, i64>,
    pub industrial_output_per_unit: i64,
    pub industrial_investment_base: i64,
    pub industrial_investment_growth_millis: i64,
    pub infrastructure_cost: i64,
    pub blockade_factor_millis: i64,
    pub reserve_upkeep_millis: i64,
    pub mothball_upkeep_millis: i64,
    pub crippled_upkeep_millis: i64,
    /// Infrastructure damage applied per 100 credits of unpaid upkeep.
    pub shortfall_damage_millis: i64,
    pub shortfall_collapse_turns: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ResearchConfig {
    pub threshold_base: i64,
    pub threshold_growth_millis: i64,
    pub max_level: u8,
}

impl ResearchConfig {
    /// Points needed to reach `level` from the level below. Grows
    /// geometrically with the configured rate.
    pub fn threshold_for(&self, level: u8) -> i64 {
        let mut threshold = self.threshold_base;
        for _ in 2..level {
            threshold = threshold * (1000 + self.threshold_growth_millis) / 1000;
        }
        threshold.max(1)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CombatConfig {
    pub wep_bonus_millis_per_level: i64,
    pub crit_chance_millis: i64,
    pub crit_multiplier_millis: i64,
    pub eli_detection_millis_per_level: i64,
    pub clk_evasion_millis_per_level: i64,
    pub retreat_threshold_millis_per_roe: i64,
    pub damage_carryover_millis: i64,
    pub salvage_millis: i64,
    pub bombard_damage_millis: i64,
    pub shield_absorb_per_level: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LimitsConfig {
    pub fc_ships_per_fleet_per_level: u32,
    pub sc_base_fleets: u32,
    pub sc_scale_factor_millis: i64,
    pub sc_divisor: u32,
    pub mothball_reactivation_turns: u32,
    pub autopilot_after_missed_turns: u32,
    pub collapse_negative_prestige_turns: u32,
    pub fallback_route_ttl_turns: u32,
    /// Friendly fleets that substitute for a starbase when judging a
    /// colony defensively adequate for fallback routing.
    pub fallback_guard_fleets: u32,
}

impl LimitsConfig {
    pub fn max_ships_per_fleet(&self, fc_level: u8) -> u32 {
        self.fc_ships_per_fleet_per_level * fc_level as u32
    }

    /// Combat-fleet cap: SC level scaled by a logarithmic map-size factor,
    /// `1 + log2(systems_per_player / divisor) * scale`.
    pub fn max_combat_fleets(&self, sc_level: u8, system_count: usize, house_count: usize) -> u32 {
        let per_player = system_count.max(1) as f64 / house_count.max(1) as f64;
        let ratio = per_player / self.sc_divisor.max(1) as f64;
        let scale = self.sc_scale_factor_millis as f64 / 1000.0;
        let factor = if ratio > 1.0 { 1.0 + ratio.log2() * scale } else { 1.0 };
        ((self.sc_base_fleets * sc_level as u32) as f64 * factor).floor() as u32
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CapacityConfig {
    pub fighter_iu_divisor: u32,
    pub fighter_fd_multiplier: u32,
    pub violation_grace_turns: u32,
}

impl CapacityConfig {
    pub fn fighter_capacity(&self, industrial_units: u32, fd_level: u8) -> u32 {
        (industrial_units / self.fighter_iu_divisor.max(1)) * self.fighter_fd_multiplier * fd_level as u32
    }
}

/// Per-source prestige deltas; negative values are penalties.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PrestigeConfig {
    pub tech_advance: i64,
    pub colony_founded: i64,
    pub combat_victory: i64,
    pub ship_destroyed: i64,
    pub fleet_lost: i64,
    pub colony_captured: i64,
    pub colony_lost: i64,
    pub undefended_colony: i64,
    pub pact_violation: i64,
    pub starbase_destroyed: i64,
    pub house_eliminated: i64,
    pub blockade_maintained: i64,
    pub invasion_repelled: i64,
    pub espionage_success: i64,
    pub espionage_exposed: i64,
    pub planet_breaker_used: i64,
    pub population_milestone: i64,
    pub turn_survived: i64,
    pub victory_threshold: i64,
    pub victory_consecutive_turns: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DiplomacyConfig {
    pub violation_decay_turns: u32,
    pub violations_to_enemy: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EspionageConfig {
    pub base_success_millis: i64,
    pub budget_bonus_millis_per_100: i64,
    pub cic_defense_millis_per_level: i64,
    pub detection_base_millis: i64,
    pub cip_defense_millis_per_100: i64,
    /// Reconnaissance reports older than this stop granting Scouted
    /// visibility (the report itself stays in the database).
    pub intel_stale_turns: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PopulationConfig {
    pub base_growth_millis: i64,
    pub tax_penalty_millis: i64,
    pub starbase_bonus_millis: i64,
    pub max_population: BTreeMap<PlanetClass, u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProgressionConfig {
    pub turn_limit: u32,
    pub deadline_hours: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub ships: BTreeMap<ShipClass, ShipSpec>,
    pub facilities: BTreeMap<FacilityKind, FacilitySpec>,
    pub ground: BTreeMap<GroundUnitClass, GroundSpec>,
    pub economy: EconomyConfig,
    pub research: ResearchConfig,
    pub combat: CombatConfig,
    pub limits: LimitsConfig,
    pub capacity: CapacityConfig,
    pub prestige: PrestigeConfig,
    pub diplomacy: DiplomacyConfig,
    pub espionage: EspionageConfig,
    pub population: PopulationConfig,
    pub progression: ProgressionConfig,
}

impl GameConfig {
    pub fn from_kdl(text: &str) -> Result<Self> {
        let doc: KdlDocument = text.parse().map_err(|e: kdl::KdlError| anyhow!("balance tables: {e}"))?;

        Ok(Self {
            ships: parse_ships(require_child(&doc, "ships")?)?,
            facilities: parse_facilities(require_child(&doc, "facilities")?)?,
            ground: parse_ground(require_child(&doc, "ground")?)?,
            economy: parse_economy(require_child(&doc, "economy")?)?,
            research: parse_research(require_child(&doc, "research")?)?,
            combat: parse_combat(require_child(&doc, "combat")?)?,
            limits: parse_limits(require_child(&doc, "limits")?)?,
            capacity: parse_capacity(require_child(&doc, "capacity")?)?,
            prestige: parse_prestige(require_child(&doc, "prestige")?)?,
            diplomacy: parse_diplomacy(require_child(&doc, "diplomacy")?)?,
            espionage: parse_espionage(require_child(&doc, "espionage")?)?,
            population: parse_population(require_child(&doc, "population")?)?,
            progression: parse_progression(require_child(&doc, "progression")?)?,
        })
    }

    pub fn ship(&self, class: ShipClass) -> Result<&ShipSpec> {
        self.ships.get(&class).ok_or_else(|| anyhow!("no spec for ship class {class}"))
    }

    pub fn facility(&self, kind: FacilityKind) -> Result<&FacilitySpec> {
        self.facilities.get(&kind).ok_or_else(|| anyhow!("no spec for facility {kind}"))
    }

    pub fn ground_unit(&self, class: GroundUnitClass) -> Result<&GroundSpec> {
        self.ground.get(&class).ok_or_else(|| anyhow!("no spec for ground unit {class}"))
    }
}

fn section_i64(section: &KdlNode, name: &str) -> Result<i64> {
    let node = children(section)
        .iter()
        .find(|n| n.name().value() == name)
        .ok_or_else(|| anyhow!("section \"{}\" missing \"{name}\"", section.name().value()))?;
    first_arg_i64(node)
}

fn parse_ships(section: &KdlNode) -> Result<BTreeMap<ShipClass, ShipSpec>> {
    let mut ships = BTreeMap::new();
    for node in children(section) {
        if node.name().value() != "ship" {
            return Err(anyhow!("unexpected node \"{}\" in ships", node.name().value()));
        }
        let name = first_arg_str(node)?;
        let class = ShipClass::from_str(name).map_err(|_| anyhow!("unknown ship class \"{name}\""))?;
        let spec = ShipSpec {
            class,
            attack: require_prop_i64(node, "attack")? as u32,
            defense: require_prop_i64(node, "defense")? as u32,
            cost: require_prop_i64(node, "cost")?,
            upkeep: require_prop_i64(node, "upkeep")?,
            build_turns: require_prop_i64(node, "build-turns")? as u32,
            cargo: prop_i64(node, "cargo").unwrap_or(0) as u32,
            hangar: prop_i64(node, "hangar").unwrap_or(0) as u32,
            dock_required: prop_bool(node, "dock").unwrap_or(false),
            cst_required: prop_i64(node, "cst").unwrap_or(1) as u8,
            fd_required: prop_i64(node, "fd").unwrap_or(0) as u8,
        };
        ships.insert(class, spec);
    }
    for class in <ShipClass as strum::IntoEnumIterator>::iter() {
        if !ships.contains_key(&class) {
            return Err(anyhow!("ship class {class} missing from balance tables"));
        }
    }
    Ok(ships)
}

fn parse_facilities(section: &KdlNode) -> Result<BTreeMap<FacilityKind, FacilitySpec>> {
    let mut facilities = BTreeMap::new();
    for node in children(section) {
        let name = first_arg_str(node)?;
        let kind = FacilityKind::from_str(name).map_err(|_| anyhow!("unknown facility \"{name}\""))?;
        facilities.insert(
            kind,
            FacilitySpec {
                kind,
                cost: require_prop_i64(node, "cost")?,
                upkeep: require_prop_i64(node, "upkeep")?,
                build_turns: require_prop_i64(node, "build-turns")? as u32,
                repair_points: prop_i64(node, "repair-points").unwrap_or(0) as u32,
                attack: prop_i64(node, "attack").unwrap_or(0) as u32,
                defense: prop_i64(node, "defense").unwrap_or(0) as u32,
                strength: prop_i64(node, "strength").unwrap_or(0) as u32,
            },
        );
    }
    for kind in <FacilityKind as strum::IntoEnumIterator>::iter() {
        if !facilities.contains_key(&kind) {
            return Err(anyhow!("facility {kind} missing from balance tables"));
        }
    }
    Ok(facilities)
}

fn parse_ground(section: &KdlNode) -> Result<BTreeMap<GroundUnitClass, GroundSpec>> {
    let mut ground = BTreeMap::new();
    for node in children(section) {
        let name = first_arg_str(node)?;
        let class = GroundUnitClass::from_str(name).map_err(|_| anyhow!("unknown ground unit \"{name}\""))?;
        ground.insert(
            class,
            GroundSpec {
                class,
                cost: require_prop_i64(node, "cost")?,
                upkeep: require_prop_i64(node, "upkeep")?,
                build_turns: require_prop_i64(node, "build-turns")? as u32,
                strength: require_prop_i64(node, "strength")? as u32,
            },
        );
    }
    for class in <GroundUnitClass as strum::IntoEnumIterator>::iter() {
        if !ground.contains_key(&class) {
            return Err(anyhow!("ground unit {class} missing from balance tables"));
        }
    }
    Ok(ground)
}

fn parse_economy(section: &KdlNode) -> Result<EconomyConfig> {
    let planet_base_node = children(section)
        .iter()
        .find(|n| n.name().value() == "planet-base")
        .ok_or_else(|| anyhow!("economy missing planet-base"))?;
    let mut planet_base = BTreeMap::new();
    for class in <PlanetClass as strum::IntoEnumIterator>::iter() {
        let value = prop_i64(planet_base_node, &class.to_string())
            .ok_or_else(|| anyhow!("planet-base missing {class}"))?;
        planet_base.insert(class, value);
    }

    let multiplier_node = children(section)
        .iter()
        .find(|n| n.name().value() == "resource-multiplier-millis")
        .ok_or_else(|| anyhow!("economy missing resource-multiplier-millis"))?;
    let mut resource_multiplier_millis = BTreeMap::new();
    for rating in <ResourceRating as strum::IntoEnumIterator>::iter() {
        let value = prop_i64(multiplier_node, &rating.to_string())
            .ok_or_else(|| anyhow!("resource-multiplier-millis missing {rating}"))?;
        resource_multiplier_millis.insert(rating, value);
    }

    Ok(EconomyConfig {
        planet_base,
        resource_multiplier_millis,
        industrial_output_per_unit: section_i64(section, "industrial-output-per-unit")?,
        industrial_investment_base: section_i64(section, "industrial-investment-base")?,
        industrial_investment_growth_millis: section_i64(section, "industrial-investment-growth-millis")?,
        infrastructure_cost: section_i64(section, "infrastructure-cost")?,
        blockade_factor_millis: section_i64(section, "blockade-factor-millis")?,
        reserve_upkeep_millis: section_i64(section, "reserve-upkeep-millis")?,
        mothball_upkeep_millis: section_i64(section, "mothball-upkeep-millis")?,
        crippled_upkeep_millis: section_i64(section, "crippled-upkeep-millis")?,
        shortfall_damage_millis: section_i64(section, "shortfall-damage-millis")?,
        shortfall_collapse_turns: section_i64(section, "shortfall-collapse-turns")? as u32,
    })
}

fn parse_research(section: &KdlNode) -> Result<ResearchConfig> {
    Ok(ResearchConfig {
        threshold_base: section_i64(section, "threshold-base")?,
        threshold_growth_millis: section_i64(section, "threshold-growth-millis")?,
        max_level: section_i64(section, "max-level")? as u8,
    })
}

fn parse_combat(section: &KdlNode) -> Result<CombatConfig> {
    Ok(CombatConfig {
        wep_bonus_millis_per_level: section_i64(section, "wep-bonus-millis-per-level")?,
        crit_chance_millis: section_i64(section, "crit-chance-millis")?,
        crit_multiplier_millis: section_i64(section, "crit-multiplier-millis")?,
        eli_detection_millis_per_level: section_i64(section, "eli-detection-millis-per-level")?,
        clk_evasion_millis_per_level: section_i64(section, "clk-evasion-millis-per-level")?,
        retreat_threshold_millis_per_roe: section_i64(section, "retreat-threshold-millis-per-roe")?,
        damage_carryover_millis: section_i64(section, "damage-carryover-millis")?,
        salvage_millis: section_i64(section, "salvage-millis")?,
        bombard_damage_millis: section_i64(section, "bombard-damage-millis")?,
        shield_absorb_per_level: section_i64(section, "shield-absorb-per-level")? as u32,
    })
}

fn parse_limits(section: &KdlNode) -> Result<LimitsConfig> {
    Ok(LimitsConfig {
        fc_ships_per_fleet_per_level: section_i64(section, "fc-ships-per-fleet-per-level")? as u32,
        sc_base_fleets: section_i64(section, "sc-base-fleets")? as u32,
        sc_scale_factor_millis: section_i64(section, "sc-scale-factor-millis")?,
        sc_divisor: section_i64(section, "sc-divisor")? as u32,
        mothball_reactivation_turns: section_i64(section, "mothball-reactivation-turns")? as u32,
        autopilot_after_missed_turns: section_i64(section, "autopilot-after-missed-turns")? as u32,
        collapse_negative_prestige_turns: section_i64(section, "collapse-negative-prestige-turns")? as u32,
        fallback_route_ttl_turns: section_i64(section, "fallback-route-ttl-turns")? as u32,
        fallback_guard_fleets: section_i64(section, "fallback-guard-fleets")? as u32,
    })
}

fn parse_capacity(section: &KdlNode) -> Result<CapacityConfig> {
    Ok(CapacityConfig {
        fighter_iu_divisor: section_i64(section, "fighter-iu-divisor")? as u32,
        fighter_fd_multiplier: section_i64(section, "fighter-fd-multiplier")? as u32,
        violation_grace_turns: section_i64(section, "violation-grace-turns")? as u32,
    })
}

fn parse_prestige(section: &KdlNode) -> Result<PrestigeConfig> {
    Ok(PrestigeConfig {
        tech_advance: section_i64(section, "tech-advance")?,
        colony_founded: section_i64(section, "colony-founded")?,
        combat_victory: section_i64(section, "combat-victory")?,
        ship_destroyed: section_i64(section, "ship-destroyed")?,
        fleet_lost: section_i64(section, "fleet-lost")?,
        colony_captured: section_i64(section, "colony-captured")?,
        colony_lost: section_i64(section, "colony-lost")?,
        undefended_colony: section_i64(section, "undefended-colony")?,
        pact_violation: section_i64(section, "pact-violation")?,
        starbase_destroyed: section_i64(section, "starbase-destroyed")?,
        house_eliminated: section_i64(section, "house-eliminated")?,
        blockade_maintained: section_i64(section, "blockade-maintained")?,
        invasion_repelled: section_i64(section, "invasion-repelled")?,
        espionage_success: section_i64(section, "espionage-success")?,
        espionage_exposed: section_i64(section, "espionage-exposed")?,
        planet_breaker_used: section_i64(section, "planet-breaker-used")?,
        population_milestone: section_i64(section, "population-milestone")?,
        turn_survived: section_i64(section, "turn-survived")?,
        victory_threshold: section_i64(section, "victory-threshold")?,
        victory_consecutive_turns: section_i64(section, "victory-consecutive-turns")? as u32,
    })
}

fn parse_diplomacy(section: &KdlNode) -> Result<DiplomacyConfig> {
    Ok(DiplomacyConfig {
        violation_decay_turns: section_i64(section, "violation-decay-turns")? as u32,
        violations_to_enemy: section_i64(section, "violations-to-enemy")? as u32,
    })
}

fn parse_espionage(section: &KdlNode) -> Result<EspionageConfig> {
    Ok(EspionageConfig {
        base_success_millis: section_i64(section, "base-success-millis")?,
        budget_bonus_millis_per_100: section_i64(section, "budget-bonus-millis-per-100")?,
        cic_defense_millis_per_level: section_i64(section, "cic-defense-millis-per-level")?,
        detection_base_millis: section_i64(section, "detection-base-millis")?,
        cip_defense_millis_per_100: section_i64(section, "cip-defense-millis-per-100")?,
        intel_stale_turns: section_i64(section, "intel-stale-turns")? as u32,
    })
}

fn parse_population(section: &KdlNode) -> Result<PopulationConfig> {
    let max_node = children(section)
        .iter()
        .find(|n| n.name().value() == "max-population")
        .ok_or_else(|| anyhow!("population missing max-population"))?;
    let mut max_population = BTreeMap::new();
    for class in <PlanetClass as strum::IntoEnumIterator>::iter() {
        let value = prop_i64(max_node, &class.to_string())
            .ok_or_else(|| anyhow!("max-population missing {class}"))?;
        max_population.insert(class, value as u32);
    }
    Ok(PopulationConfig {
        base_growth_millis: section_i64(section, "base-growth-millis")?,
        tax_penalty_millis: section_i64(section, "tax-penalty-millis")?,
        starbase_bonus_millis: section_i64(section, "starbase-bonus-millis")?,
        max_population,
    })
}

fn parse_progression(section: &KdlNode) -> Result<ProgressionConfig> {
    Ok(ProgressionConfig {
        turn_limit: section_i64(section, "turn-limit")? as u32,
        deadline_hours: section_i64(section, "deadline-hours")?,
    })
}

/// Loads balance tables from a file, or the embedded defaults when no path
/// is given.
pub fn load_game_config(path: Option<&std::path::Path>) -> Result<GameConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading balance tables from {}", path.display()))?;
            GameConfig::from_kdl(&text)
        }
        None => Ok(BUILTIN_CONFIG.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_parse_and_cover_every_class() {
        let config = &*BUILTIN_CONFIG;
        assert_eq!(config.ships.len(), 14);
        assert!(config.ship(ShipClass::Scout).is_ok());
        assert!(config.facility(FacilityKind::Starbase).is_ok());
        assert!(config.ground_unit(GroundUnitClass::Marine).is_ok());
        assert_eq!(config.prestige.victory_consecutive_turns, 3);
    }

    #[test]
    fn research_thresholds_grow_geometrically() {
        let research = ResearchConfig {
            threshold_base: 100,
            threshold_growth_millis: 400,
            max_level: 10,
        };
        assert_eq!(research.threshold_for(2), 100);
        assert_eq!(research.threshold_for(3), 140);
        assert_eq!(research.threshold_for(4), 196);
    }

    #[test]
    fn fleet_caps_scale_with_tech_and_map() {
        let limits = LimitsConfig {
            fc_ships_per_fleet_per_level: 5,
            sc_base_fleets: 3,
            sc_scale_factor_millis: 500,
            sc_divisor: 4,
            mothball_reactivation_turns: 2,
            autopilot_after_missed_turns: 3,
            collapse_negative_prestige_turns: 5,
            fallback_route_ttl_turns: 5,
            fallback_guard_fleets: 2,
        };
        assert_eq!(limits.max_ships_per_fleet(2), 10);
        // 32 systems over 2 houses = 16 per player; 16/4 = 4, log2 = 2
        assert_eq!(limits.max_combat_fleets(1, 32, 2), 6);
        // small maps never shrink the base allowance
        assert_eq!(limits.max_combat_fleets(1, 4, 4), 3);
    }

    #[test]
    fn missing_section_is_a_startup_error() {
        let result = GameConfig::from_kdl("ships { }");
        assert!(result.is_err());
    }
}
