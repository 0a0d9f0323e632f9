//! End-to-end resolver scenarios: literal order sheets through
//! `resolve_turn`, checked against the expected state and event stream.

use ec4x_core::game_setup::test_fixtures::*;
use ec4x_core::resolve_turn;
use ec4x_core::rules::visibility;
use ec4x_domain::ops;
use ec4x_domain::orders::parse_orders;
use ec4x_domain::{
    CommandPacket, EventType, FleetCommand, GamePhase, GameState, HouseId, HouseStatus, ShipClass, SystemId,
};
use std::collections::BTreeMap;

fn packets_for(packet: CommandPacket) -> BTreeMap<HouseId, CommandPacket> {
    BTreeMap::from([(packet.house_id, packet)])
}

fn solo_state() -> (GameState, HouseId) {
    let mut state = line_map_state(&["Caladan", "Giedi Prime"]);
    let house = add_house(&mut state, "Atreides");
    ops::found_colony(&mut state, SystemId(1), house, 50).unwrap();
    (state, house)
}

#[test]
fn single_house_solo_turn_builds_a_scout() {
    let config = test_config();
    let (state, house) = solo_state();

    let packet = parse_orders("orders turn=1 house=1 { build 1 { ship \"scout\" quantity=1 } }").unwrap();
    let outcome = resolve_turn(state, &packets_for(packet), &config).unwrap();

    assert_eq!(outcome.state.turn, 2);

    let scouts: Vec<_> = outcome
        .state
        .ships
        .iter()
        .filter(|s| s.class == ShipClass::Scout && s.house_id == house)
        .collect();
    assert_eq!(scouts.len(), 1);

    // treasury moved by exactly build cost, upkeep and income
    let scout_spec = config.ship(ShipClass::Scout).unwrap();
    let colony = outcome.state.colonies.iter().next().unwrap();
    let base = config.economy.planet_base[&ec4x_domain::PlanetClass::Benign];
    let gross = base * colony.population_units as i64; // abundant multiplier is 1000 millis
    let income = gross * colony.tax_rate as i64 / 100;
    let expected = 500 - scout_spec.cost - scout_spec.upkeep + income;
    assert_eq!(outcome.state.houses.get(house).unwrap().treasury, expected);

    for expected_type in [EventType::BuildStarted, EventType::BuildCompleted, EventType::ShipCommissioned] {
        assert!(
            outcome.events.iter().any(|e| e.event_type == expected_type),
            "missing {expected_type} event"
        );
    }
}

#[test]
fn fleet_moves_one_lane_to_an_empty_system() {
    let config = test_config();
    let mut state = line_map_state(&["Alpha", "Beta"]);
    let house = add_house(&mut state, "Atreides");
    ops::found_colony(&mut state, SystemId(1), house, 30).unwrap();
    let fleet = add_fleet(&mut state, &config, house, SystemId(1), ShipClass::Destroyer, 2);

    let packet = parse_orders(&format!("orders turn=1 house=1 {{ fleet {fleet} {{ move to=2 roe=5 }} }}")).unwrap();
    let outcome = resolve_turn(state, &packets_for(packet), &config).unwrap();

    assert_eq!(outcome.state.turn, 2);
    let moved = outcome.state.fleets.get(fleet).unwrap();
    assert_eq!(moved.location, SystemId(2));
    assert_eq!(moved.roe, 5);
    assert!(outcome
        .events
        .iter()
        .any(|e| e.event_type == EventType::FleetMoved && e.fleet_id == Some(fleet)));
}

#[test]
fn combat_resolution_is_bit_identical_across_reruns() {
    let config = test_config();
    let mut state = line_map_state(&["Arrakis", "Beta"]);
    state.turn = 5;
    let attacker = add_house(&mut state, "Atreides");
    let defender = add_house(&mut state, "Harkonnen");
    make_enemies(&mut state, attacker, defender);
    ops::found_colony(&mut state, SystemId(1), attacker, 30).unwrap();
    ops::found_colony(&mut state, SystemId(2), defender, 30).unwrap();

    let f1 = add_fleet(&mut state, &config, attacker, SystemId(2), ShipClass::LightCruiser, 3);
    let f2 = add_fleet(&mut state, &config, defender, SystemId(2), ShipClass::LightCruiser, 2);

    let mut packets = BTreeMap::new();
    packets.insert(
        attacker,
        parse_orders(&format!("orders turn=5 house=1 {{ fleet {f1} {{ patrol roe=10 }} }}")).unwrap(),
    );
    packets.insert(
        defender,
        parse_orders(&format!("orders turn=5 house=2 {{ fleet {f2} {{ patrol roe=10 }} }}")).unwrap(),
    );

    let first = resolve_turn(state.clone(), &packets, &config).unwrap();
    let second = resolve_turn(state, &packets, &config).unwrap();

    // same inputs, bit-identical outputs
    assert_eq!(first.state, second.state);
    assert_eq!(first.events, second.events);

    assert!(first.events.iter().any(|e| e.event_type == EventType::SpaceCombat));
    assert!(first.events.iter().any(|e| e.event_type == EventType::ShipsDestroyed));
}

#[test]
fn serialized_state_round_trips_after_a_real_turn() {
    let config = test_config();
    let (state, _) = solo_state();
    let packet = parse_orders("orders turn=1 house=1 { build 1 { ship \"scout\" quantity=1 } }").unwrap();
    let outcome = resolve_turn(state, &packets_for(packet), &config).unwrap();

    let blob = ec4x_store::encode_state(&outcome.state).unwrap();
    let mut decoded = ec4x_store::decode_state(&blob).unwrap();
    decoded.db_path = outcome.state.db_path.clone();
    assert_eq!(decoded, outcome.state);
}

#[test]
fn last_house_standing_wins_by_elimination() {
    let config = test_config();
    let mut state = line_map_state(&["Alpha", "Beta"]);
    let survivor = add_house(&mut state, "Atreides");
    let doomed = add_house(&mut state, "Moritani");
    make_enemies(&mut state, survivor, doomed);
    ops::found_colony(&mut state, SystemId(1), survivor, 30).unwrap();
    // the doomed house owns nothing at all

    let outcome = resolve_turn(state, &BTreeMap::new(), &config).unwrap();

    assert_eq!(outcome.state.houses.get(doomed).unwrap().status, HouseStatus::Eliminated);
    assert_eq!(outcome.state.phase, GamePhase::Completed);
    assert!(outcome.events.iter().any(|e| e.event_type == EventType::HouseEliminated));
    assert!(outcome
        .events
        .iter()
        .any(|e| e.event_type == EventType::GameCompleted && e.house_id == Some(survivor)));
}

#[test]
fn fleet_creation_stops_at_the_strategic_command_cap() {
    let config = test_config();
    let mut state = line_map_state(&["Alpha", "Beta"]);
    let house = add_house(&mut state, "Atreides");
    let colony = ops::found_colony(&mut state, SystemId(1), house, 40).unwrap();

    // exhaust the fleet allowance away from the homeworld
    let cap = config.limits.max_combat_fleets(1, state.systems.len(), 1);
    for _ in 0..cap {
        add_fleet(&mut state, &config, house, SystemId(2), ShipClass::Corvette, 1);
    }
    let fleets_before = state.fleets.len();

    // a corvette finishing on the ground has no fleet to berth into
    state.colonies.get_mut(colony).unwrap().under_construction = Some(ec4x_domain::ConstructionProject {
        item: ec4x_domain::BuildItem::Ship(ShipClass::Corvette),
        quantity: 1,
        turns_remaining: 1,
    });

    let outcome = resolve_turn(state, &BTreeMap::new(), &config).unwrap();

    assert_eq!(outcome.state.fleets.len(), fleets_before);
    assert!(outcome.events.iter().any(|e| e.event_type == EventType::CapacityViolation));
    // the hull exists, held in reserve
    assert!(outcome
        .state
        .ships
        .iter()
        .any(|s| s.class == ShipClass::Corvette && s.fleet_id.0 == 0));
}

#[test]
fn colonize_on_an_occupied_system_is_rejected() {
    let config = test_config();
    let mut state = line_map_state(&["Alpha", "Beta"]);
    let us = add_house(&mut state, "Atreides");
    let them = add_house(&mut state, "Harkonnen");
    ops::found_colony(&mut state, SystemId(1), us, 30).unwrap();
    let theirs = ops::found_colony(&mut state, SystemId(2), them, 20).unwrap();

    let fleet = ops::spawn_fleet(&mut state, us, SystemId(1), "Settlers".into()).unwrap();
    let etac = add_ship(&mut state, &config, us, ShipClass::Etac);
    state.ships.get_mut(etac).unwrap().cargo = Some(ec4x_domain::Cargo {
        kind: ec4x_domain::CargoKind::Colonists,
        quantity: 10,
    });
    ops::assign_ship_to_fleet(&mut state, etac, fleet).unwrap();

    let packet = parse_orders(&format!("orders turn=1 house=1 {{ fleet {fleet} {{ colonize to=2 }} }}")).unwrap();
    let outcome = resolve_turn(state, &packets_for(packet), &config).unwrap();

    assert!(outcome.events.iter().any(|e| e.event_type == EventType::OrderRejected));
    // previous colony untouched, no new colony
    assert_eq!(outcome.state.colonies.len(), 2);
    assert_eq!(outcome.state.colonies.get(theirs).unwrap().owner, them);
    assert_eq!(outcome.state.fleets.get(fleet).unwrap().command, FleetCommand::Hold);
}

#[test]
fn auto_load_fills_hangars_and_leaves_the_rest() {
    let config = test_config();
    let mut state = line_map_state(&["Alpha"]);
    let house = add_house(&mut state, "Atreides");
    let colony = ops::found_colony(&mut state, SystemId(1), house, 40).unwrap();
    // plenty of industry so capacity is not the limiting factor
    state.colonies.get_mut(colony).unwrap().industrial.units = 200;

    let squadron = ops::spawn_squadron(&mut state, house, colony).unwrap();
    for _ in 0..12 {
        let fighter = add_ship(&mut state, &config, house, ShipClass::Fighter);
        state.ships.get_mut(fighter).unwrap().squadron_id = Some(squadron);
        state.squadrons.get_mut(squadron).unwrap().fighters.push(fighter);
    }

    let fleet = ops::spawn_fleet(&mut state, house, SystemId(1), "Carrier group".into()).unwrap();
    let carrier = add_ship(&mut state, &config, house, ShipClass::Carrier);
    ops::assign_ship_to_fleet(&mut state, carrier, fleet).unwrap();

    let outcome = resolve_turn(state, &BTreeMap::new(), &config).unwrap();

    let carrier_after = outcome.state.ships.get(carrier).unwrap();
    assert_eq!(carrier_after.embarked_fighters.len(), 8);
    let squadron_after = outcome.state.squadrons.get(squadron).unwrap();
    assert_eq!(squadron_after.fighters.len(), 4);
    assert!(outcome.events.iter().any(|e| e.event_type == EventType::FightersLoaded));
    assert!(outcome.state.validate().is_empty());
}

#[test]
fn silent_bound_houses_accumulate_missed_turns() {
    let config = test_config();
    let (mut state, house) = solo_state();
    state.houses.get_mut(house).unwrap().nostr_pubkey = "ab".repeat(32);

    let outcome = resolve_turn(state, &BTreeMap::new(), &config).unwrap();
    assert_eq!(outcome.state.houses.get(house).unwrap().turns_without_orders, 1);

    // enough silent turns flip the house onto autopilot
    let mut state = outcome.state;
    for _ in 0..config.limits.autopilot_after_missed_turns {
        state = resolve_turn(state, &BTreeMap::new(), &config).unwrap().state;
    }
    assert_eq!(state.houses.get(house).unwrap().status, HouseStatus::Autopilot);
}

#[test]
fn scouted_intel_is_stale_not_live() {
    let config = test_config();
    let mut state = line_map_state(&["Home", "Target", "Far"]);
    let us = add_house(&mut state, "Atreides");
    let them = add_house(&mut state, "Harkonnen");
    ops::found_colony(&mut state, SystemId(1), us, 30).unwrap();
    let theirs = ops::found_colony(&mut state, SystemId(2), them, 40).unwrap();

    state.turn = 3;
    visibility::record_system_report(&mut state, us, SystemId(2), 3);
    visibility::record_colony_report(&mut state, us, SystemId(2), 3);

    state.colonies.get_mut(theirs).unwrap().population_units = 60;
    state.turn = 5;

    let view = visibility::derive_player_state(&state, &config, us).unwrap();
    let target = view.systems.iter().find(|s| s.id == SystemId(2)).unwrap();
    let report = target.colony_report.as_ref().unwrap();
    assert_eq!(report.population_units, 40);
    assert_eq!(report.gathered_turn, 3);
    visibility::check_no_leaks(&view).unwrap();
}
