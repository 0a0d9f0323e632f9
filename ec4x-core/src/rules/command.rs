//! Command phase: commission dock-built hulls, auto-load fighters and
//! troops, then validate and apply every submitted order. Invalid orders
//! produce a rejection event and leave the state untouched; capacity
//! limits are enforced at acceptance time.

use crate::rules::Resolution;
use anyhow::Result;
use ec4x_domain::ops;
use ec4x_domain::{
    BuildItem, Cargo, CargoKind, ColonyId, CommandPacket, ConstructionProject, DiplomaticRelation, EventType,
    FleetCommand, FleetId, FleetOrder, FleetOrderKind, FleetStatus, GameEvent, GameState,
    GroundUnitClass, HouseId, HouseStatus, NeoriaKind, ShipClass, ShipId, ShipStats, SystemId, TechField,
};
use itertools::Itertools;
use std::collections::BTreeMap;

pub fn run(state: &mut GameState, packets: &BTreeMap<HouseId, CommandPacket>, ctx: &mut Resolution<'_>) -> Result<()> {
    track_missed_orders(state, packets, ctx);
    commission_dock_ships(state, ctx)?;
    auto_load(state, ctx)?;

    for house_id in state.active_houses() {
        let Some(packet) = packets.get(&house_id) else {
            continue;
        };
        if packet.house_id != house_id || packet.turn != ctx.turn {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, "packet house/turn mismatch").house(house_id),
            );
            continue;
        }
        apply_packet(state, packet, ctx)?;
    }

    enforce_fighter_capacity(state, ctx)?;
    Ok(())
}

fn track_missed_orders(state: &mut GameState, packets: &BTreeMap<HouseId, CommandPacket>, ctx: &mut Resolution<'_>) {
    let autopilot_after = ctx.config.limits.autopilot_after_missed_turns;
    for house_id in state.active_houses() {
        let Some(house) = state.houses.get_mut(house_id) else {
            continue;
        };
        if packets.contains_key(&house_id) {
            house.turns_without_orders = 0;
            if house.status == HouseStatus::Autopilot {
                house.status = HouseStatus::Active;
                ctx.events.push(
                    GameEvent::new(ctx.turn, EventType::HouseStatusChanged, format!("house {house_id} back under player control"))
                        .house(house_id),
                );
            }
        } else if house.is_bound() {
            house.turns_without_orders += 1;
            if house.turns_without_orders >= autopilot_after && house.status == HouseStatus::Active {
                house.status = HouseStatus::Autopilot;
                ctx.events.push(
                    GameEvent::new(
                        ctx.turn,
                        EventType::HouseStatusChanged,
                        format!("house {house_id} on autopilot after {} silent turns", house.turns_without_orders),
                    )
                    .house(house_id),
                );
            }
        }
    }
}

/// Finds or creates a fleet for a freshly commissioned warship. Creation
/// respects the strategic-command fleet cap; when it is exhausted the ship
/// stays unassigned in the reserve pool.
pub(crate) fn berth_commissioned_ship(state: &mut GameState, ctx: &mut Resolution<'_>, house_id: HouseId, system_id: SystemId, ship_id: ShipId) -> Result<()> {
    let fc_level = state.houses.get(house_id).map(|h| h.tech.level(TechField::Fc)).unwrap_or(1);
    let max_ships = ctx.config.limits.max_ships_per_fleet(fc_level);

    let candidate = state
        .fleet_index
        .by_system
        .get(system_id)
        .iter()
        .copied()
        .filter(|f| {
            state
                .fleets
                .get(*f)
                .map(|fleet| fleet.house_id == house_id && (fleet.ships.len() as u32) < max_ships)
                .unwrap_or(false)
        })
        .sorted()
        .next();

    match candidate {
        Some(fleet_id) => ops::assign_ship_to_fleet(state, ship_id, fleet_id)?,
        None => {
            if fleet_creation_allowed(state, ctx, house_id) {
                let fleet_id = ops::spawn_fleet(state, house_id, system_id, String::new())?;
                if let Some(fleet) = state.fleets.get_mut(fleet_id) {
                    fleet.name = format!("Fleet {fleet_id}");
                }
                ops::assign_ship_to_fleet(state, ship_id, fleet_id)?;
            } else {
                ctx.push(
                    GameEvent::new(
                        ctx.turn,
                        EventType::CapacityViolation,
                        format!("no fleet capacity for commissioned ship {ship_id}; held in reserve"),
                    )
                    .house(house_id)
                    .system(system_id),
                );
            }
        }
    }
    Ok(())
}

fn fleet_creation_allowed(state: &GameState, ctx: &Resolution<'_>, house_id: HouseId) -> bool {
    let sc_level = state.houses.get(house_id).map(|h| h.tech.level(TechField::Sc)).unwrap_or(1);
    let cap = ctx.config.limits.max_combat_fleets(sc_level, state.systems.len(), state.active_houses().len().max(1));
    let current = state.fleet_index.by_house.get(house_id).len() as u32;
    current < cap
}

fn commission_dock_ships(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let neoria_ids: Vec<_> = state.neoria.ids().collect();
    for neoria_id in neoria_ids {
        let Some(neoria) = state.neoria.get(neoria_id).cloned() else {
            continue;
        };
        let ready: Vec<ShipClass> = neoria.docks.iter().filter(|job| job.turns_remaining == 0).map(|job| job.ship_class).collect();
        if ready.is_empty() {
            continue;
        }
        if let Some(facility) = state.neoria.get_mut(neoria_id) {
            facility.docks.retain(|job| job.turns_remaining > 0);
        }

        let Some(colony) = state.colonies.get(neoria.colony_id).cloned() else {
            continue;
        };
        for class in ready {
            let Ok(spec) = ctx.config.ship(class) else {
                continue;
            };
            let wep_level = state
                .houses
                .get(colony.owner)
                .map(|h| h.tech.level(TechField::Wep))
                .unwrap_or(1);
            let cargo = if class == ShipClass::Etac && colony.auto_reload_etacs {
                Some(Cargo {
                    kind: CargoKind::Colonists,
                    quantity: spec.cargo,
                })
            } else {
                None
            };
            let stats = ShipStats {
                attack: spec.attack,
                defense: spec.defense,
                wep_level,
            };
            let ship_id = ops::spawn_ship(state, colony.owner, class, stats, cargo)?;
            ctx.push(
                GameEvent::new(ctx.turn, EventType::ShipCommissioned, format!("{class} {ship_id} commissioned"))
                    .house(colony.owner)
                    .system(colony.system_id),
            );
            berth_commissioned_ship(state, ctx, colony.owner, colony.system_id, ship_id)?;
        }
    }
    Ok(())
}

/// Fighters board carriers with hangar space, marines board troop
/// transports, FIFO per colony while auto-loading is enabled.
fn auto_load(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let colony_ids: Vec<ColonyId> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };
        if !colony.auto_loading_enabled {
            continue;
        }

        // carriers on station with free hangar slots, in id order
        let carriers: Vec<(ShipId, u32)> = state
            .fleet_index
            .by_system
            .get(colony.system_id)
            .iter()
            .filter_map(|f| state.fleets.get(*f))
            .filter(|fleet| fleet.house_id == colony.owner)
            .flat_map(|fleet| fleet.ships.iter().copied())
            .sorted()
            .filter_map(|ship_id| {
                let ship = state.ships.get(ship_id)?;
                let hangar = ctx.config.ship(ship.class).ok()?.hangar;
                let free = hangar.saturating_sub(ship.embarked_fighters.len() as u32);
                (free > 0).then_some((ship_id, free))
            })
            .collect();

        let mut waiting: Vec<ShipId> = colony
            .fighter_squadron_ids
            .iter()
            .filter_map(|s| state.squadrons.get(*s))
            .flat_map(|squadron| squadron.fighters.iter().copied())
            .collect();

        let mut loaded = 0u32;
        for (carrier_id, free) in carriers {
            for _ in 0..free {
                let Some(fighter_id) = waiting.first().copied() else {
                    break;
                };
                waiting.remove(0);
                ops::embark_fighter(state, fighter_id, carrier_id)?;
                loaded += 1;
            }
        }
        if loaded > 0 {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::FightersLoaded, format!("{loaded} fighters loaded onto carriers"))
                    .house(colony.owner)
                    .system(colony.system_id)
                    .colony(colony_id),
            );
        }

        // marines fill troop transports the same way
        let transports: Vec<(ShipId, u32)> = state
            .fleet_index
            .by_system
            .get(colony.system_id)
            .iter()
            .filter_map(|f| state.fleets.get(*f))
            .filter(|fleet| fleet.house_id == colony.owner)
            .flat_map(|fleet| fleet.ships.iter().copied())
            .sorted()
            .filter_map(|ship_id| {
                let ship = state.ships.get(ship_id)?;
                if ship.class != ShipClass::TroopTransport {
                    return None;
                }
                let capacity = ctx.config.ship(ship.class).ok()?.cargo;
                let used = ship.cargo.map(|c| c.quantity).unwrap_or(0);
                (capacity > used).then_some((ship_id, capacity - used))
            })
            .collect();

        let mut marines: Vec<_> = colony
            .ground_unit_ids
            .iter()
            .filter(|g| {
                state
                    .ground_units
                    .get(**g)
                    .map(|unit| unit.class == GroundUnitClass::Marine)
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        let mut embarked = 0u32;
        for (transport_id, free) in transports {
            let take = (free as usize).min(marines.len());
            if take == 0 {
                continue;
            }
            for unit_id in marines.drain(..take) {
                ops::destroy_ground_unit(state, unit_id)?;
                embarked += 1;
            }
            if let Some(ship) = state.ships.get_mut(transport_id) {
                let quantity = ship.cargo.map(|c| c.quantity).unwrap_or(0) + take as u32;
                ship.cargo = Some(Cargo {
                    kind: CargoKind::Troops,
                    quantity,
                });
            }
        }
        if embarked > 0 {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::TroopsLoaded, format!("{embarked} marine units embarked"))
                    .house(colony.owner)
                    .system(colony.system_id)
                    .colony(colony_id),
            );
        }
    }
    Ok(())
}

fn apply_packet(state: &mut GameState, packet: &CommandPacket, ctx: &mut Resolution<'_>) -> Result<()> {
    let house_id = packet.house_id;

    let ordered: Vec<&FleetOrder> = packet
        .fleet_commands
        .iter()
        .sorted_by_key(|order| std::cmp::Reverse(order.priority))
        .collect();
    for order in ordered {
        match validate_fleet_order(state, house_id, order, ctx) {
            Ok(command) => {
                apply_fleet_order(state, order, command, ctx)?;
            }
            Err(reason) => {
                ctx.push(
                    GameEvent::new(ctx.turn, EventType::OrderRejected, format!("fleet {}: {reason}", order.fleet_id))
                        .house(house_id)
                        .fleet(order.fleet_id),
                );
            }
        }
    }

    for order in &packet.build_commands {
        if let Err(reason) = apply_build_order(state, house_id, order, ctx) {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, format!("build at colony {}: {reason}", order.colony_id))
                    .house(house_id)
                    .colony(order.colony_id),
            );
        }
    }

    apply_research_and_investments(state, packet, ctx);
    apply_diplomacy(state, packet, ctx);
    apply_espionage(state, packet, ctx);

    Ok(())
}

/// Checks ownership, status, tech gates, targets and composition; returns
/// the validated state-side command on success, a reason string otherwise.
fn validate_fleet_order(
    state: &GameState,
    house_id: HouseId,
    order: &FleetOrder,
    ctx: &Resolution<'_>,
) -> std::result::Result<Option<FleetCommand>, String> {
    let fleet = state.fleets.get(order.fleet_id).ok_or("no such fleet")?;
    if fleet.house_id != house_id {
        return Err("fleet belongs to another house".into());
    }
    if fleet.status == FleetStatus::Mothballed && order.kind != FleetOrderKind::SetStatus {
        return Err("fleet is mothballed".into());
    }
    if fleet.status == FleetStatus::Reserve
        && !matches!(
            order.kind,
            FleetOrderKind::Hold | FleetOrderKind::GuardColony | FleetOrderKind::GuardStarbase | FleetOrderKind::SetStatus
        )
    {
        return Err("reserve fleets only hold or guard".into());
    }

    if order.kind.needs_target_system() && order.target_system.is_none() {
        return Err("missing target system".into());
    }
    if let Some(system) = order.target_system {
        if !state.systems.contains(system) {
            return Err(format!("system {system} does not exist"));
        }
    }
    // guarded above for every kind that reads it
    let target_system = order.target_system.unwrap_or_default();

    let tech = state.houses.get(house_id).map(|h| h.tech.clone()).unwrap_or_default();

    let has_cargo = |kind: CargoKind| {
        fleet.ships.iter().any(|s| {
            state
                .ships
                .get(*s)
                .and_then(|ship| ship.cargo)
                .map(|cargo| cargo.kind == kind && cargo.quantity > 0)
                .unwrap_or(false)
        })
    };

    let command = match order.kind {
        FleetOrderKind::Hold => Some(FleetCommand::Hold),
        FleetOrderKind::Move => Some(FleetCommand::Move { to: target_system }),
        FleetOrderKind::SeekHome => Some(FleetCommand::SeekHome),
        FleetOrderKind::Patrol => Some(FleetCommand::Patrol),
        FleetOrderKind::GuardStarbase => {
            let colony = state.colony_at(fleet.location).ok_or("no colony to guard here")?;
            if colony.kastra_ids.is_empty() {
                return Err("no starbase at this colony".into());
            }
            Some(FleetCommand::GuardStarbase)
        }
        FleetOrderKind::GuardColony => {
            let colony = state.colony_at(fleet.location).ok_or("no colony to guard here")?;
            if colony.owner != house_id {
                return Err("colony belongs to another house".into());
            }
            Some(FleetCommand::GuardColony)
        }
        FleetOrderKind::Blockade => Some(FleetCommand::Blockade { system: target_system }),
        FleetOrderKind::Bombard => Some(FleetCommand::Bombard { system: target_system }),
        FleetOrderKind::Invade | FleetOrderKind::Blitz => {
            if !has_cargo(CargoKind::Troops) {
                return Err("invasion needs embarked marines".into());
            }
            let system = target_system;
            if order.kind == FleetOrderKind::Invade {
                Some(FleetCommand::Invade { system })
            } else {
                Some(FleetCommand::Blitz { system })
            }
        }
        FleetOrderKind::Colonize => {
            if !has_cargo(CargoKind::Colonists) {
                return Err("colonization needs an ETAC with colonists".into());
            }
            let system = target_system;
            if state.colony_at(system).is_some() {
                return Err(format!("system {system} is already colonized"));
            }
            Some(FleetCommand::Colonize { system })
        }
        FleetOrderKind::ScoutColony => Some(FleetCommand::ScoutColony { system: target_system }),
        FleetOrderKind::ScoutSystem => Some(FleetCommand::ScoutSystem { system: target_system }),
        FleetOrderKind::HackStarbase => {
            if tech.level(TechField::Eli) < 2 {
                return Err("starbase hacking needs electronic intelligence 2".into());
            }
            Some(FleetCommand::HackStarbase { system: target_system })
        }
        FleetOrderKind::JoinFleet => {
            let target_id = order.target_fleet.ok_or("join needs a target fleet")?;
            let target = state.fleets.get(target_id).ok_or("target fleet does not exist")?;
            if target.house_id != house_id {
                return Err("cannot join a foreign fleet".into());
            }
            let fc_level = tech.level(TechField::Fc);
            let merged = target.ships.len() + fleet.ships.len();
            if merged as u32 > ctx.config.limits.max_ships_per_fleet(fc_level) {
                return Err("merged fleet would exceed fleet command capacity".into());
            }
            Some(FleetCommand::JoinFleet { fleet: target_id })
        }
        FleetOrderKind::Rendezvous => Some(FleetCommand::Rendezvous { system: target_system }),
        FleetOrderKind::Salvage => Some(FleetCommand::Salvage { system: target_system }),
        FleetOrderKind::View => Some(FleetCommand::View { system: target_system }),
        FleetOrderKind::SetStatus => None,
    };
    Ok(command)
}

fn apply_fleet_order(state: &mut GameState, order: &FleetOrder, command: Option<FleetCommand>, ctx: &mut Resolution<'_>) -> Result<()> {
    let house_id = state.fleets.get(order.fleet_id).map(|f| f.house_id);
    if order.kind == FleetOrderKind::SetStatus {
        let Some(target_status) = order.status else {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, "set_status without a status")
                    .fleet(order.fleet_id),
            );
            return Ok(());
        };
        set_fleet_status(state, order.fleet_id, target_status, ctx);
        return Ok(());
    }

    if let Some(fleet) = state.fleets.get_mut(order.fleet_id) {
        if let Some(command) = command {
            fleet.command = command;
        }
        if let Some(roe) = order.roe {
            fleet.roe = roe.min(10);
        }
        let description = format!("fleet {} ordered to {}", order.fleet_id, order.kind);
        let mut event = GameEvent::new(ctx.turn, EventType::OrderAccepted, description).fleet(order.fleet_id);
        if let Some(house_id) = house_id {
            event = event.house(house_id);
        }
        if let Some(system) = order.target_system {
            event = event.system(system);
        }
        ctx.push(event);
    }
    Ok(())
}

fn set_fleet_status(state: &mut GameState, fleet_id: FleetId, target: FleetStatus, ctx: &mut Resolution<'_>) {
    let reactivation = ctx.config.limits.mothball_reactivation_turns;
    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return;
    };
    let previous = fleet.status;
    match (previous, target) {
        (FleetStatus::Mothballed, FleetStatus::Active | FleetStatus::Reserve) => {
            // crews have to be mustered back aboard first
            fleet.reactivation_turns = reactivation;
            fleet.command = FleetCommand::Hold;
        }
        (_, FleetStatus::Mothballed) => {
            fleet.status = FleetStatus::Mothballed;
            fleet.command = FleetCommand::Hold;
            fleet.reactivation_turns = 0;
        }
        (_, status) => {
            fleet.status = status;
        }
    }
    let house_id = fleet.house_id;
    ctx.push(
        GameEvent::new(
            ctx.turn,
            EventType::FleetStatusChanged,
            format!("fleet {fleet_id} status {previous} -> {target}"),
        )
        .house(house_id)
        .fleet(fleet_id),
    );
}

fn apply_build_order(
    state: &mut GameState,
    house_id: HouseId,
    order: &ec4x_domain::BuildOrder,
    ctx: &mut Resolution<'_>,
) -> std::result::Result<(), String> {
    let colony = state.colonies.get(order.colony_id).ok_or("no such colony")?.clone();
    if colony.owner != house_id {
        return Err("colony belongs to another house".into());
    }
    if order.quantity == 0 {
        return Err("quantity must be positive".into());
    }
    let tech = state.houses.get(house_id).map(|h| h.tech.clone()).unwrap_or_default();
    let treasury = state.houses.get(house_id).map(|h| h.treasury).unwrap_or(0);

    let (total_cost, build_turns, docked_class): (i64, u32, Option<ShipClass>) = match order.item {
        BuildItem::Ship(class) => {
            let spec = ctx.config.ship(class).map_err(|e| e.to_string())?;
            if tech.level(TechField::Cst) < spec.cst_required {
                return Err(format!("{class} needs construction {}", spec.cst_required));
            }
            if spec.fd_required > 0 && tech.level(TechField::Fd) < spec.fd_required {
                return Err(format!("{class} needs fighter doctrine {}", spec.fd_required));
            }
            (
                spec.cost * order.quantity as i64,
                spec.build_turns,
                spec.dock_required.then_some(class),
            )
        }
        BuildItem::Facility(kind) => {
            let spec = ctx.config.facility(kind).map_err(|e| e.to_string())?;
            (spec.cost * order.quantity as i64, spec.build_turns, None)
        }
        BuildItem::Ground(class) => {
            let spec = ctx.config.ground_unit(class).map_err(|e| e.to_string())?;
            (spec.cost * order.quantity as i64, spec.build_turns, None)
        }
        BuildItem::Industrial => {
            let unit_cost = colony.industrial.investment_cost.max(ctx.config.economy.industrial_investment_base);
            (unit_cost * order.quantity as i64, 1, None)
        }
        BuildItem::Infrastructure => (ctx.config.economy.infrastructure_cost * order.quantity as i64, 1, None),
    };

    if treasury < total_cost {
        return Err(format!("insufficient treasury ({treasury} < {total_cost})"));
    }

    if let Some(class) = docked_class {
        // capital hulls are laid down in shipyard docks; the whole order
        // must fit or nothing is laid down
        let shipyards: Vec<_> = colony
            .neoria_ids
            .iter()
            .filter(|n| {
                state
                    .neoria
                    .get(**n)
                    .map(|f| f.kind == NeoriaKind::Shipyard)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        let free_docks: usize = shipyards
            .iter()
            .filter_map(|n| state.neoria.get(*n))
            .map(|f| (f.level as usize * 2).saturating_sub(f.docks.len()))
            .sum();
        if (order.quantity as usize) > free_docks {
            return Err(format!("only {free_docks} free shipyard docks for {} {class}", order.quantity));
        }
        let mut remaining = order.quantity;
        for neoria_id in shipyards {
            let Some(facility) = state.neoria.get_mut(neoria_id) else {
                continue;
            };
            let capacity = facility.level as usize * 2;
            while remaining > 0 && facility.docks.len() < capacity {
                facility.docks.push(ec4x_domain::DockJob {
                    ship_class: class,
                    turns_remaining: build_turns,
                });
                remaining -= 1;
            }
        }
    } else {
        let project = ConstructionProject {
            item: order.item,
            quantity: order.quantity,
            turns_remaining: build_turns,
        };
        let Some(target) = state.colonies.get_mut(order.colony_id) else {
            return Err("no such colony".into());
        };
        if target.under_construction.is_none() {
            target.under_construction = Some(project);
        } else {
            target.construction_queue.push(project);
        }
    }

    if let Some(house) = state.houses.get_mut(house_id) {
        house.treasury -= total_cost;
    }
    if order.item == BuildItem::Industrial {
        // each unit bought makes the next one dearer
        if let Some(target) = state.colonies.get_mut(order.colony_id) {
            let growth = ctx.config.economy.industrial_investment_growth_millis;
            let mut cost = target.industrial.investment_cost.max(ctx.config.economy.industrial_investment_base);
            for _ in 0..order.quantity {
                cost = cost * (1000 + growth) / 1000;
            }
            target.industrial.investment_cost = cost;
        }
    }

    ctx.push(
        GameEvent::new(
            ctx.turn,
            EventType::BuildStarted,
            format!("colony {} starts {:?} x{}", order.colony_id, order.item, order.quantity),
        )
        .house(house_id)
        .colony(order.colony_id)
        .system(colony.system_id),
    );
    Ok(())
}

fn apply_research_and_investments(state: &mut GameState, packet: &CommandPacket, ctx: &mut Resolution<'_>) {
    let house_id = packet.house_id;
    let allocation = &packet.research_allocation;
    let wanted = allocation.total_points() + packet.ebp_investment + packet.cip_investment;
    if wanted <= 0 {
        return;
    }
    let treasury = state.houses.get(house_id).map(|h| h.treasury).unwrap_or(0);
    if treasury < wanted {
        ctx.push(
            GameEvent::new(
                ctx.turn,
                EventType::OrderRejected,
                format!("research allocation of {wanted} exceeds treasury {treasury}"),
            )
            .house(house_id),
        );
        return;
    }

    if let Some(house) = state.houses.get_mut(house_id) {
        house.treasury -= wanted;
    }
    let mut banked = allocation.clone();
    // EBP subsidies flow into the economic bucket alongside the regular
    // allocation
    banked.economic += packet.ebp_investment;
    ctx.research.insert(house_id, banked);
    if packet.cip_investment > 0 {
        ctx.cip_budget.insert(house_id, packet.cip_investment);
    }
}

fn apply_diplomacy(state: &mut GameState, packet: &CommandPacket, ctx: &mut Resolution<'_>) {
    let house_id = packet.house_id;
    for order in &packet.diplomatic_commands {
        if order.target == house_id || !state.houses.contains(order.target) {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, "diplomatic order targets an invalid house")
                    .house(house_id),
            );
            continue;
        }
        let current = state.relation(house_id, order.target);
        let wanted = order.action.target_state();

        // de-escalation needs both sides; declarations are unilateral
        let escalating = wanted > current.state;
        if !escalating && wanted != current.state {
            let reciprocal = ctx
                .events
                .iter()
                .any(|e| e.event_type == EventType::DiplomacyChanged && e.house_id == Some(order.target) && e.target_house_id == Some(house_id));
            if !reciprocal {
                ctx.push(
                    GameEvent::new(
                        ctx.turn,
                        EventType::OrderRejected,
                        format!("de-escalation with house {} needs a matching overture", order.target),
                    )
                    .house(house_id),
                );
                continue;
            }
        }

        state.set_relation(
            house_id,
            order.target,
            DiplomaticRelation {
                state: wanted,
                since_turn: ctx.turn,
                violations: current.violations,
            },
        );
        ctx.push(
            GameEvent::new(
                ctx.turn,
                EventType::DiplomacyChanged,
                format!("house {house_id} declares {} toward house {}", order.action, order.target),
            )
            .house(house_id)
            .target(order.target),
        );
    }
}

fn apply_espionage(state: &mut GameState, packet: &CommandPacket, ctx: &mut Resolution<'_>) {
    let house_id = packet.house_id;
    for order in &packet.espionage_actions {
        if order.budget <= 0 {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, "espionage needs a positive budget").house(house_id),
            );
            continue;
        }
        let treasury = state.houses.get(house_id).map(|h| h.treasury).unwrap_or(0);
        if treasury < order.budget {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, "espionage budget exceeds treasury").house(house_id),
            );
            continue;
        }
        if !state.systems.contains(order.target) {
            ctx.push(
                GameEvent::new(ctx.turn, EventType::OrderRejected, "espionage target system does not exist").house(house_id),
            );
            continue;
        }
        if let Some(house) = state.houses.get_mut(house_id) {
            house.treasury -= order.budget;
        }
        ctx.espionage.entry(house_id).or_default().push(order.clone());
    }
}

/// Fighter-capacity enforcement with grace accounting: excess
/// colony-based fighters are disbanded once the grace window is spent.
fn enforce_fighter_capacity(state: &mut GameState, ctx: &mut Resolution<'_>) -> Result<()> {
    let colony_ids: Vec<ColonyId> = state.colonies.ids().collect();
    for colony_id in colony_ids {
        let Some(colony) = state.colonies.get(colony_id).cloned() else {
            continue;
        };
        let fd_level = state
            .houses
            .get(colony.owner)
            .map(|h| h.tech.level(TechField::Fd))
            .unwrap_or(1);
        let capacity = ctx.config.capacity.fighter_capacity(colony.industrial.units, fd_level);

        let based_fighters: Vec<ShipId> = colony
            .fighter_squadron_ids
            .iter()
            .filter_map(|s| state.squadrons.get(*s))
            .flat_map(|squadron| squadron.fighters.iter().copied())
            .collect();
        let excess = (based_fighters.len() as u32).saturating_sub(capacity);

        if excess == 0 {
            if colony.capacity_violation.excess_fighters != 0 {
                if let Some(target) = state.colonies.get_mut(colony_id) {
                    target.capacity_violation = Default::default();
                }
            }
            continue;
        }

        let grace_used = colony.capacity_violation.grace_turns_used + 1;
        if grace_used > ctx.config.capacity.violation_grace_turns {
            // grace exhausted: newest fighters stand down first
            let to_disband: Vec<ShipId> = based_fighters.iter().rev().take(excess as usize).copied().collect();
            for fighter_id in &to_disband {
                ops::destroy_ship(state, *fighter_id)?;
            }
            if let Some(target) = state.colonies.get_mut(colony_id) {
                target.capacity_violation = Default::default();
            }
            ctx.push(
                GameEvent::new(
                    ctx.turn,
                    EventType::FightersDisbanded,
                    format!("{} fighters disbanded over colony capacity {capacity}", to_disband.len()),
                )
                .house(colony.owner)
                .colony(colony_id)
                .system(colony.system_id),
            );
        } else {
            if let Some(target) = state.colonies.get_mut(colony_id) {
                target.capacity_violation.excess_fighters = excess;
                target.capacity_violation.grace_turns_used = grace_used;
            }
            ctx.push(
                GameEvent::new(
                    ctx.turn,
                    EventType::CapacityViolation,
                    format!("{excess} fighters over capacity {capacity}, grace turn {grace_used}"),
                )
                .house(colony.owner)
                .colony(colony_id)
                .system(colony.system_id),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_setup::test_fixtures::*;
    use ec4x_domain::{ops, BuildOrder, SystemId};

    #[test]
    fn builds_are_gated_by_construction_tech() {
        let config = test_config();
        let mut state = line_map_state(&["Alpha"]);
        let house = add_house(&mut state, "Atreides");
        let colony = ops::found_colony(&mut state, SystemId(1), house, 30).unwrap();
        let mut ctx = Resolution::new(&config, 1);

        // destroyers need construction 2; houses start at 1
        let order = BuildOrder {
            colony_id: colony,
            item: BuildItem::Ship(ShipClass::Destroyer),
            quantity: 1,
        };
        let result = apply_build_order(&mut state, house, &order, &mut ctx);
        assert!(result.is_err());
        assert_eq!(state.houses.get(house).unwrap().treasury, 500);
    }

    #[test]
    fn dock_builds_fail_whole_when_capacity_is_short() {
        let config = test_config();
        let mut state = line_map_state(&["Alpha"]);
        let house = add_house(&mut state, "Atreides");
        let colony = ops::found_colony(&mut state, SystemId(1), house, 30).unwrap();
        ops::spawn_neoria(&mut state, house, colony, NeoriaKind::Shipyard).unwrap();
        {
            let house = state.houses.get_mut(house).unwrap();
            house.treasury = 10_000;
            house.tech.invest(TechField::Cst, 10_000, |level| 100 * level as i64, 5);
        }
        let mut ctx = Resolution::new(&config, 1);

        // a level-1 shipyard has two docks; three ETACs cannot fit
        let order = BuildOrder {
            colony_id: colony,
            item: BuildItem::Ship(ShipClass::Etac),
            quantity: 3,
        };
        assert!(apply_build_order(&mut state, house, &order, &mut ctx).is_err());
        let yard = state.neoria.iter().next().unwrap();
        assert!(yard.docks.is_empty());
        assert_eq!(state.houses.get(house).unwrap().treasury, 10_000);

        let order = BuildOrder {
            colony_id: colony,
            item: BuildItem::Ship(ShipClass::Etac),
            quantity: 2,
        };
        apply_build_order(&mut state, house, &order, &mut ctx).unwrap();
        let yard = state.neoria.iter().next().unwrap();
        assert_eq!(yard.docks.len(), 2);
    }

    #[test]
    fn mothballed_fleets_take_time_to_reactivate() {
        let config = test_config();
        let mut state = line_map_state(&["Alpha"]);
        let house = add_house(&mut state, "Atreides");
        let fleet = add_fleet(&mut state, &config, house, SystemId(1), ShipClass::Corvette, 1);
        let mut ctx = Resolution::new(&config, 1);

        set_fleet_status(&mut state, fleet, FleetStatus::Mothballed, &mut ctx);
        assert_eq!(state.fleets.get(fleet).unwrap().status, FleetStatus::Mothballed);

        set_fleet_status(&mut state, fleet, FleetStatus::Active, &mut ctx);
        let target = state.fleets.get(fleet).unwrap();
        // still mothballed, counting down
        assert_eq!(target.status, FleetStatus::Mothballed);
        assert_eq!(target.reactivation_turns, config.limits.mothball_reactivation_turns);
    }
}
