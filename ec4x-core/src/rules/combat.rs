//! Combat resolution at a single system: space engagement, orbital assault
//! against starbases, and ground combat for invasions. All randomness comes
//! from the per-system `TurnRng` handed in by the conflict phase; ships are
//! always processed in id order so damage distribution is deterministic.

use crate::rules::rng::TurnRng;
use ec4x_domain::ops;
use ec4x_domain::{
    CargoKind, EventType, FleetCommand, GameConfig, GameEvent, GameState, GroundUnitClass, HouseId, RetreatPolicy,
    Ship, ShipId, ShipState, SystemId,
};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{event, Level};

/// Outcome of one pairwise engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementOutcome {
    AttackerHolds,
    DefenderHolds,
    MutualAttrition,
    AttackerRetreated,
    DefenderRetreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceCombatResult {
    pub outcome: EngagementOutcome,
    /// Enemy hulls destroyed by each side, for prestige accounting.
    pub attacker_kills: u32,
    pub defender_kills: u32,
}

pub struct SystemBattle {
    pub system_id: SystemId,
    pub attacker: HouseId,
    pub defender: HouseId,
}

/// Finds every hostile house pairing with fleets present at the system.
/// Pairs are ordered (aggressor first) when exactly one side has a mission
/// command targeting the system; otherwise by house id.
pub fn hostile_pairs_at(state: &GameState, system_id: SystemId) -> Vec<SystemBattle> {
    let houses_present: Vec<HouseId> = state
        .fleets_at(system_id)
        .iter()
        .filter(|f| f.status == ec4x_domain::FleetStatus::Active && !f.ships.is_empty())
        .map(|f| f.house_id)
        .unique()
        .sorted()
        .collect();

    let mut battles = Vec::new();
    for pair in houses_present.iter().combinations(2) {
        let (a, b) = (*pair[0], *pair[1]);
        if !state.are_hostile(a, b) {
            continue;
        }
        let aggressive = |house: HouseId| {
            state
                .fleets_at(system_id)
                .iter()
                .filter(|f| f.house_id == house)
                .any(|f| f.command.is_mission() && f.command.destination() == Some(system_id))
        };
        let (attacker, defender) = match (aggressive(a), aggressive(b)) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            _ => (a, b),
        };
        battles.push(SystemBattle {
            system_id,
            attacker,
            defender,
        });
    }
    battles
}

struct SideStrength {
    effective_attack: f64,
    hull_total: f64,
    ships: Vec<ShipId>,
}

fn side_strength(state: &GameState, config: &GameConfig, system_id: SystemId, house: HouseId, enemy: HouseId) -> SideStrength {
    let house_tech = state.houses.get(house).map(|h| h.tech.clone()).unwrap_or_default();
    let enemy_tech = state.houses.get(enemy).map(|h| h.tech.clone()).unwrap_or_default();
    let morale = state.houses.get(house).map(|h| h.morale_millis).unwrap_or(0);

    // detection: our electronic intelligence against their cloaking
    let eli = house_tech.level(ec4x_domain::TechField::Eli) as i64;
    let clk = enemy_tech.level(ec4x_domain::TechField::Clk) as i64;
    let detection_millis = 1000 + eli * config.combat.eli_detection_millis_per_level
        - clk * config.combat.clk_evasion_millis_per_level;
    let detection = (detection_millis.max(200) as f64) / 1000.0;

    let mut effective_attack = 0.0;
    let mut hull_total = 0.0;
    let mut ships = Vec::new();
    for fleet in state.fleets_at(system_id) {
        if fleet.house_id != house || fleet.status != ec4x_domain::FleetStatus::Active {
            continue;
        }
        for ship_id in fleet.ships.iter().sorted() {
            let Some(ship) = state.ships.get(*ship_id) else {
                continue;
            };
            if ship.state == ShipState::Destroyed {
                continue;
            }
            let cripple_factor = if ship.state == ShipState::Crippled { 0.5 } else { 1.0 };
            let wep_bonus = 1.0
                + ship.stats.wep_level as f64 * config.combat.wep_bonus_millis_per_level as f64 / 1000.0;
            let morale_bonus = 1.0 + morale as f64 / 1000.0;
            effective_attack += ship.stats.attack as f64 * cripple_factor * wep_bonus * morale_bonus * detection;
            hull_total += ship.stats.defense as f64 * cripple_factor;
            ships.push(*ship_id);
            // embarked fighters strike with their carrier
            for fighter_id in ship.embarked_fighters.iter().sorted() {
                if let Some(fighter) = state.ships.get(*fighter_id) {
                    if fighter.state != ShipState::Destroyed {
                        effective_attack += fighter.stats.attack as f64 * wep_bonus * morale_bonus * detection;
                    }
                }
            }
        }
    }
    SideStrength {
        effective_attack,
        hull_total,
        ships,
    }
}

/// Highest ROE among a house's fleets on station; retreat policy of the
/// most conservative fleet governs whether retreat is even allowed.
fn side_doctrine(state: &GameState, system_id: SystemId, house: HouseId) -> (u8, bool) {
    let fleets: Vec<_> = state
        .fleets_at(system_id)
        .into_iter()
        .filter(|f| f.house_id == house)
        .collect();
    let roe = fleets.iter().map(|f| f.roe).max().unwrap_or(5);
    let may_retreat = fleets.iter().any(|f| match f.retreat_policy {
        RetreatPolicy::Never => false,
        RetreatPolicy::MissionsOnly => !f.command.is_mission(),
        RetreatPolicy::Conservative | RetreatPolicy::Aggressive => true,
    });
    (roe, may_retreat)
}

/// Resolves the space sub-phase for one hostile pairing. Mutates ship
/// states, removes destroyed hulls, and emits combat events.
pub fn resolve_space_combat(
    state: &mut GameState,
    config: &GameConfig,
    battle: &SystemBattle,
    rng: &mut TurnRng,
    events: &mut Vec<GameEvent>,
    turn: u32,
) -> SpaceCombatResult {
    let attacker_side = side_strength(state, config, battle.system_id, battle.attacker, battle.defender);
    let defender_side = side_strength(state, config, battle.system_id, battle.defender, battle.attacker);

    let result = |outcome, attacker_kills, defender_kills| SpaceCombatResult {
        outcome,
        attacker_kills,
        defender_kills,
    };

    if attacker_side.ships.is_empty() || defender_side.ships.is_empty() {
        return result(EngagementOutcome::MutualAttrition, 0, 0);
    }

    // retreat checks against the weaker side's ROE
    let (attacker_roe, attacker_may_retreat) = side_doctrine(state, battle.system_id, battle.attacker);
    let (defender_roe, defender_may_retreat) = side_doctrine(state, battle.system_id, battle.defender);
    let threshold = |roe: u8| (10 - roe.min(10)) as f64 * config.combat.retreat_threshold_millis_per_roe as f64 / 1000.0;

    let attacker_ratio = attacker_side.effective_attack / defender_side.effective_attack.max(1.0);
    let defender_ratio = defender_side.effective_attack / attacker_side.effective_attack.max(1.0);

    if attacker_may_retreat && attacker_ratio < threshold(attacker_roe) {
        order_retreat(state, battle.system_id, battle.attacker, events, turn);
        return result(EngagementOutcome::AttackerRetreated, 0, 0);
    }
    if defender_may_retreat && defender_ratio < threshold(defender_roe) {
        order_retreat(state, battle.system_id, battle.defender, events, turn);
        return result(EngagementOutcome::DefenderRetreated, 0, 0);
    }

    // damage exchange, attacker context first for the rng stream
    let attacker_crit = rng.chance(config.combat.crit_chance_millis);
    let defender_crit = rng.chance(config.combat.crit_chance_millis);
    let crit = config.combat.crit_multiplier_millis as f64 / 1000.0;
    let damage_to_defender = attacker_side.effective_attack * if attacker_crit { crit } else { 1.0 };
    let damage_to_attacker = defender_side.effective_attack * if defender_crit { crit } else { 1.0 };

    events.push(
        GameEvent::new(
            turn,
            EventType::SpaceCombat,
            format!(
                "space combat at system {}: {} vs {}",
                battle.system_id, battle.attacker, battle.defender
            ),
        )
        .system(battle.system_id)
        .source(battle.attacker)
        .target(battle.defender)
        .details_json(format!(
            "{{\"attackerStrength\":{:.1},\"defenderStrength\":{:.1},\"attackerCrit\":{},\"defenderCrit\":{}}}",
            attacker_side.effective_attack, defender_side.effective_attack, attacker_crit, defender_crit
        )),
    );

    let attacker_kills = distribute_damage(state, config, battle.system_id, &defender_side.ships, damage_to_defender, battle.defender, events, turn);
    let defender_kills = distribute_damage(state, config, battle.system_id, &attacker_side.ships, damage_to_attacker, battle.attacker, events, turn);

    let attacker_alive = side_has_ships(state, battle.system_id, battle.attacker);
    let defender_alive = side_has_ships(state, battle.system_id, battle.defender);
    let outcome = match (attacker_alive, defender_alive) {
        (true, false) => EngagementOutcome::AttackerHolds,
        (false, true) => EngagementOutcome::DefenderHolds,
        _ => {
            // hulls on both sides: the weaker hull pool withdraws next turn
            if attacker_side.hull_total >= defender_side.hull_total {
                EngagementOutcome::AttackerHolds
            } else {
                EngagementOutcome::DefenderHolds
            }
        }
    };
    result(outcome, attacker_kills, defender_kills)
}

fn side_has_ships(state: &GameState, system_id: SystemId, house: HouseId) -> bool {
    state
        .fleets_at(system_id)
        .iter()
        .any(|f| f.house_id == house && !f.ships.is_empty())
}

fn order_retreat(state: &mut GameState, system_id: SystemId, house: HouseId, events: &mut Vec<GameEvent>, turn: u32) {
    let fleet_ids: Vec<_> = state
        .fleet_index
        .by_system
        .get(system_id)
        .iter()
        .copied()
        .filter(|f| state.fleets.get(*f).map(|fl| fl.house_id == house).unwrap_or(false))
        .collect();
    for fleet_id in fleet_ids {
        if let Some(fleet) = state.fleets.get_mut(fleet_id) {
            fleet.command = FleetCommand::SeekHome;
        }
        events.push(
            GameEvent::new(turn, EventType::FleetRetreated, format!("fleet {} breaks off and retreats", fleet_id))
                .house(house)
                .fleet(fleet_id)
                .system(system_id),
        );
    }
}

/// Walks the target ships in id order, knocking each down through
/// Crippled to Destroyed as the damage pool allows. Destroyed hulls are
/// removed; their salvage value is deposited as a wreck field at the
/// system. Returns the number of hulls destroyed.
fn distribute_damage(
    state: &mut GameState,
    config: &GameConfig,
    system_id: SystemId,
    target_ships: &[ShipId],
    mut damage: f64,
    owner: HouseId,
    events: &mut Vec<GameEvent>,
    turn: u32,
) -> u32 {
    let mut destroyed: Vec<(ShipId, String, i64)> = Vec::new();

    for ship_id in target_ships.iter().sorted() {
        if damage <= 0.0 {
            break;
        }
        let Some(ship) = state.ships.get(*ship_id).cloned() else {
            continue;
        };
        let cripple_threshold = ship.stats.defense as f64 * config.combat.damage_carryover_millis as f64 / 1000.0;
        let kill_threshold = ship.stats.defense as f64;

        match ship.state {
            ShipState::Undamaged if damage >= kill_threshold => {
                damage -= kill_threshold;
                record_destruction(config, &ship, &mut destroyed);
            }
            ShipState::Undamaged if damage >= cripple_threshold => {
                damage -= cripple_threshold;
                if let Some(target) = state.ships.get_mut(*ship_id) {
                    target.state = ShipState::Crippled;
                }
            }
            ShipState::Crippled if damage >= cripple_threshold => {
                damage -= cripple_threshold;
                record_destruction(config, &ship, &mut destroyed);
            }
            _ => {
                // remaining damage too weak to hurt this hull; spend it
                damage = 0.0;
            }
        }
    }

    if destroyed.is_empty() {
        return 0;
    }

    let total_salvage: i64 = destroyed.iter().map(|(_, _, v)| v).sum();
    let names = destroyed.iter().map(|(id, class, _)| format!("{class} {id}")).join(", ");
    for (ship_id, _, _) in &destroyed {
        if let Err(error) = ops::destroy_ship(state, *ship_id) {
            event!(Level::WARN, "destroying ship {}: {:#}", ship_id, error);
        }
    }
    *state.salvage_fields.entry(system_id).or_insert(0) += total_salvage;
    events.push(
        GameEvent::new(turn, EventType::ShipsDestroyed, format!("destroyed: {names}"))
            .house(owner)
            .system(system_id)
            .details_json(format!("{{\"salvage\":{total_salvage},\"count\":{}}}", destroyed.len())),
    );
    destroyed.len() as u32
}

fn record_destruction(config: &GameConfig, ship: &Ship, destroyed: &mut Vec<(ShipId, String, i64)>) {
    let salvage = config
        .ships
        .get(&ship.class)
        .map(|spec| spec.cost * config.combat.salvage_millis / 1000)
        .unwrap_or(0);
    destroyed.push((ship.id, ship.class.to_string(), salvage));
}

/// Orbital assault: runs only when the attacker holds the orbit. Starbases
/// fight back; survivors repel the assault.
pub fn resolve_orbital_assault(
    state: &mut GameState,
    config: &GameConfig,
    battle: &SystemBattle,
    rng: &mut TurnRng,
    events: &mut Vec<GameEvent>,
    turn: u32,
) -> bool {
    let Some(colony) = state.colony_at(battle.system_id).cloned() else {
        return true;
    };
    if colony.owner != battle.defender {
        return true;
    }

    let bases: Vec<_> = colony
        .kastra_ids
        .iter()
        .filter_map(|k| state.kastra.get(*k).cloned())
        .filter(|base| base.state != ShipState::Destroyed)
        .collect();
    if bases.is_empty() {
        return true;
    }

    let attacker_side = side_strength(state, config, battle.system_id, battle.attacker, battle.defender);
    let spec = match config.facility(ec4x_domain::FacilityKind::Starbase) {
        Ok(spec) => spec.clone(),
        Err(_) => return true,
    };

    let mut base_attack = 0.0;
    let mut base_defense = 0.0;
    for base in &bases {
        base_attack += (spec.attack * base.level as u32) as f64;
        base_defense += (spec.defense * base.level as u32) as f64;
    }
    if rng.chance(config.combat.crit_chance_millis) {
        base_attack *= config.combat.crit_multiplier_millis as f64 / 1000.0;
    }

    events.push(
        GameEvent::new(
            turn,
            EventType::OrbitalAssault,
            format!("orbital assault on system {}", battle.system_id),
        )
        .system(battle.system_id)
        .source(battle.attacker)
        .target(battle.defender),
    );

    distribute_damage(state, config, battle.system_id, &attacker_side.ships, base_attack, battle.attacker, events, turn);

    if attacker_side.effective_attack >= base_defense {
        for base in bases {
            if let Err(error) = ops::destroy_kastra(state, base.id) {
                event!(Level::WARN, "destroying starbase {}: {:#}", base.id, error);
            }
            events.push(
                GameEvent::new(turn, EventType::StarbaseDestroyed, format!("starbase {} destroyed", base.id))
                    .system(battle.system_id)
                    .house(battle.defender)
                    .source(battle.attacker),
            );
        }
        true
    } else {
        false
    }
}

/// Ground combat for Invade/Blitz. Success transfers the colony with
/// bombardment damage; failure costs the attacker most of the landed
/// troops.
pub fn resolve_ground_combat(
    state: &mut GameState,
    config: &GameConfig,
    battle: &SystemBattle,
    rng: &mut TurnRng,
    events: &mut Vec<GameEvent>,
    turn: u32,
) {
    let Some(colony) = state.colony_at(battle.system_id).cloned() else {
        return;
    };
    if colony.owner != battle.defender {
        return;
    }

    // landed marines: troops cargo across the attacker's ships on station
    let mut troop_ships: Vec<ShipId> = Vec::new();
    let mut marine_strength = 0u32;
    let marine_spec_strength = config
        .ground_unit(GroundUnitClass::Marine)
        .map(|spec| spec.strength)
        .unwrap_or(10);
    for fleet in state.fleets_at(battle.system_id) {
        if fleet.house_id != battle.attacker {
            continue;
        }
        for ship_id in fleet.ships.iter().sorted() {
            if let Some(ship) = state.ships.get(*ship_id) {
                if let Some(cargo) = ship.cargo {
                    if cargo.kind == CargoKind::Troops && cargo.quantity > 0 {
                        troop_ships.push(*ship_id);
                        marine_strength += cargo.quantity * marine_spec_strength;
                    }
                }
            }
        }
    }
    if marine_strength == 0 {
        return;
    }

    let mut defense = 0u32;
    for unit_id in &colony.ground_unit_ids {
        if let Some(unit) = state.ground_units.get(*unit_id) {
            defense += unit.strength;
        }
    }
    defense += colony.planetary_shield_level as u32 * config.combat.shield_absorb_per_level;

    // fortune favors whoever rolls better on the ground
    let attack_roll = 800 + rng.roll_millis() / 2;
    let defense_roll = 800 + rng.roll_millis() / 2;
    let attack_score = marine_strength as i64 * attack_roll;
    let defense_score = defense as i64 * defense_roll;

    events.push(
        GameEvent::new(
            turn,
            EventType::GroundCombat,
            format!("ground combat on system {}", battle.system_id),
        )
        .system(battle.system_id)
        .colony(colony.id)
        .source(battle.attacker)
        .target(battle.defender)
        .outcome(attack_score > defense_score),
    );

    if attack_score > defense_score {
        // defending ground forces are wiped out in the landing
        for unit_id in colony.ground_unit_ids.clone() {
            let _ = ops::destroy_ground_unit(state, unit_id);
        }
        let previous_owner = match ops::transfer_colony(state, colony.id, battle.attacker) {
            Ok(owner) => owner,
            Err(error) => {
                event!(Level::WARN, "transferring colony {}: {:#}", colony.id, error);
                return;
            }
        };
        // bombardment scarring from the assault
        if let Some(target) = state.colonies.get_mut(colony.id) {
            target.damage_millis = (target.damage_millis + config.combat.bombard_damage_millis as u32).min(1000);
            target.blockaded = false;
            target.blockaded_by.clear();
            target.blockade_turns = 0;
        }
        // marines stay planetside as an occupation garrison
        for ship_id in &troop_ships {
            if let Some(ship) = state.ships.get(*ship_id).cloned() {
                if let Some(cargo) = ship.cargo {
                    let _ = ops::spawn_ground_unit(state, battle.attacker, colony.id, GroundUnitClass::Marine, cargo.quantity * marine_spec_strength);
                }
                if let Some(target) = state.ships.get_mut(*ship_id) {
                    target.cargo = None;
                }
            }
        }
        events.push(
            GameEvent::new(turn, EventType::ColonyCaptured, format!("colony {} captured", colony.id))
                .system(battle.system_id)
                .colony(colony.id)
                .source(battle.attacker)
                .target(previous_owner),
        );
    } else {
        // repulsed: the landing force is lost
        for ship_id in &troop_ships {
            if let Some(target) = state.ships.get_mut(*ship_id) {
                target.cargo = None;
            }
        }
        events.push(
            GameEvent::new(turn, EventType::InvasionRepelled, format!("invasion of colony {} repelled", colony.id))
                .system(battle.system_id)
                .colony(colony.id)
                .source(battle.attacker)
                .target(battle.defender),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_setup::test_fixtures::*;
    use ec4x_domain::{GameId, ShipClass};

    #[test]
    fn outnumbered_side_loses_hulls() {
        let config = test_config();
        let mut state = line_map_state(&["Kaitain"]);
        let strong = add_house(&mut state, "Corrino");
        let weak = add_house(&mut state, "Moritani");
        make_enemies(&mut state, strong, weak);

        add_fleet(&mut state, &config, strong, ec4x_domain::SystemId(1), ShipClass::HeavyCruiser, 4);
        add_fleet(&mut state, &config, weak, ec4x_domain::SystemId(1), ShipClass::Corvette, 1);
        // pin both sides in place so the engagement always happens
        for id in state.fleets.ids().collect::<Vec<_>>() {
            state.fleets.get_mut(id).unwrap().retreat_policy = RetreatPolicy::Never;
        }

        let battles = hostile_pairs_at(&state, ec4x_domain::SystemId(1));
        assert_eq!(battles.len(), 1);

        let mut rng = TurnRng::new(&GameId("test-game".into()), 1, "conflict", "system-1");
        let mut events = Vec::new();
        let result = resolve_space_combat(&mut state, &config, &battles[0], &mut rng, &mut events, 1);

        assert_eq!(result.outcome, EngagementOutcome::AttackerHolds);
        assert!(result.attacker_kills > 0);
        assert!(events.iter().any(|e| e.event_type == EventType::ShipsDestroyed));
        // wrecks pile up where the hulls died
        assert!(state.salvage_fields.get(&ec4x_domain::SystemId(1)).copied().unwrap_or(0) > 0);
        assert!(state.validate().is_empty());
    }

    #[test]
    fn hopeless_side_retreats_when_doctrine_allows() {
        let config = test_config();
        let mut state = line_map_state(&["Kaitain"]);
        let strong = add_house(&mut state, "Corrino");
        let weak = add_house(&mut state, "Moritani");
        make_enemies(&mut state, strong, weak);

        add_fleet(&mut state, &config, strong, ec4x_domain::SystemId(1), ShipClass::Battleship, 5);
        let weak_fleet = add_fleet(&mut state, &config, weak, ec4x_domain::SystemId(1), ShipClass::Scout, 1);
        state.fleets.get_mut(weak_fleet).unwrap().roe = 2;

        let battles = hostile_pairs_at(&state, ec4x_domain::SystemId(1));
        let mut rng = TurnRng::new(&GameId("test-game".into()), 1, "conflict", "system-1");
        let mut events = Vec::new();
        let result = resolve_space_combat(&mut state, &config, &battles[0], &mut rng, &mut events, 1);

        // weak side survives by fleeing; no hulls lost
        assert!(matches!(
            result.outcome,
            EngagementOutcome::AttackerRetreated | EngagementOutcome::DefenderRetreated
        ));
        assert_eq!(fleet(&state, weak_fleet).command, FleetCommand::SeekHome);
        assert!(events.iter().all(|e| e.event_type != EventType::ShipsDestroyed));
    }
}
