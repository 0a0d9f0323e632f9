//! The order language: KDL text submitted by players, one document per
//! house per turn. Parsing here is purely syntactic (unknown nodes and
//! badly typed arguments are rejected); semantic validation against the
//! game state happens in the Command phase.
//!
//! ```kdl
//! orders turn=4 house=2 {
//!     fleet 12 { move to=5 roe=7 }
//!     fleet 13 { patrol }
//!     build 3 { ship "destroyer" quantity=2 }
//!     research { economic 100; science 50; technology { wep 40 } }
//!     diplomacy { hostile target=1 }
//!     espionage { starbase_intel target=9 budget=200 }
//!     invest ebp=50 cip=25
//! }
//! ```

use crate::commands::*;
use crate::ids::*;
use crate::kdl_util::*;
use crate::model::{BuildItem, FacilityKind, FleetStatus, GroundUnitClass, ShipClass};
use crate::tech::TechField;
use anyhow::{anyhow, bail, Context, Result};
use kdl::{KdlDocument, KdlNode};
use std::fmt::Write as _;
use std::str::FromStr;

pub fn parse_orders(text: &str) -> Result<CommandPacket> {
    let doc: KdlDocument = text.parse().map_err(|e: kdl::KdlError| anyhow!("orders: {e}"))?;
    let root = require_child(&doc, "orders")?;

    let turn = require_prop_i64(root, "turn")? as u32;
    let house_id = HouseId(require_prop_i64(root, "house")? as u32);

    let mut packet = CommandPacket::empty(house_id, turn);

    for node in children(root) {
        match node.name().value() {
            "fleet" => packet.fleet_commands.push(parse_fleet_node(node)?),
            "build" => packet.build_commands.extend(parse_build_node(node)?),
            "research" => packet.research_allocation = parse_research_node(node)?,
            "diplomacy" => packet.diplomatic_commands.extend(parse_diplomacy_node(node)?),
            "espionage" => packet.espionage_actions.extend(parse_espionage_node(node)?),
            "invest" => {
                packet.ebp_investment = prop_i64(node, "ebp").unwrap_or(0);
                packet.cip_investment = prop_i64(node, "cip").unwrap_or(0);
            }
            other => bail!("unknown order node \"{other}\""),
        }
    }

    Ok(packet)
}

fn parse_fleet_node(node: &KdlNode) -> Result<FleetOrder> {
    let fleet_id = FleetId(first_arg_i64(node).context("fleet order needs a fleet id")? as u32);

    // `fleet 13 "patrol"` shorthand, or a single child node carrying the
    // command and its arguments.
    let command_node: &KdlNode;
    let shorthand: Option<String> = args(node).get(1).and_then(|v| v.as_string()).map(|s| s.to_string());
    let nodes = children(node);
    if let Some(word) = shorthand {
        let kind = FleetOrderKind::from_str(&word).map_err(|_| anyhow!("unknown fleet command \"{word}\""))?;
        return Ok(FleetOrder::simple(fleet_id, kind));
    }
    match nodes {
        [single] => command_node = single,
        [] => bail!("fleet {fleet_id} order carries no command"),
        _ => bail!("fleet {fleet_id} order carries more than one command"),
    }

    let word = command_node.name().value();
    let kind = FleetOrderKind::from_str(word).map_err(|_| anyhow!("unknown fleet command \"{word}\""))?;

    let mut order = FleetOrder::simple(fleet_id, kind);
    order.target_system = prop_i64(command_node, "to")
        .or_else(|| prop_i64(command_node, "target"))
        .map(|v| SystemId(v as u32));
    order.target_fleet = prop_i64(command_node, "fleet").map(|v| FleetId(v as u32));
    order.roe = prop_i64(command_node, "roe").map(|v| v as u8);
    order.priority = prop_i64(command_node, "priority").unwrap_or(0) as u8;

    if kind == FleetOrderKind::SetStatus {
        let status = first_arg_str(command_node).context("set_status needs a status word")?;
        order.status = Some(FleetStatus::from_str(status).map_err(|_| anyhow!("unknown fleet status \"{status}\""))?);
    }

    if kind.needs_target_system() && order.target_system.is_none() {
        bail!("fleet command {kind} needs to=<system>");
    }
    if kind.needs_target_fleet() && order.target_fleet.is_none() {
        bail!("fleet command {kind} needs fleet=<id>");
    }

    Ok(order)
}

fn parse_build_node(node: &KdlNode) -> Result<Vec<BuildOrder>> {
    let colony_id = ColonyId(first_arg_i64(node).context("build order needs a colony id")? as u32);
    let mut orders = Vec::new();
    for item_node in children(node) {
        let item = match item_node.name().value() {
            "ship" => {
                let name = first_arg_str(item_node)?;
                BuildItem::Ship(ShipClass::from_str(name).map_err(|_| anyhow!("unknown ship class \"{name}\""))?)
            }
            "facility" => {
                let name = first_arg_str(item_node)?;
                BuildItem::Facility(FacilityKind::from_str(name).map_err(|_| anyhow!("unknown facility \"{name}\""))?)
            }
            "ground" => {
                let name = first_arg_str(item_node)?;
                BuildItem::Ground(GroundUnitClass::from_str(name).map_err(|_| anyhow!("unknown ground unit \"{name}\""))?)
            }
            "industrial" => BuildItem::Industrial,
            "infrastructure" => BuildItem::Infrastructure,
            other => bail!("unknown build item \"{other}\""),
        };
        orders.push(BuildOrder {
            colony_id,
            item,
            quantity: prop_i64(item_node, "quantity").unwrap_or(1) as u32,
        });
    }
    if orders.is_empty() {
        bail!("build order for colony {colony_id} lists nothing to build");
    }
    Ok(orders)
}

fn parse_research_node(node: &KdlNode) -> Result<ResearchAllocation> {
    let mut allocation = ResearchAllocation::default();
    for child_node in children(node) {
        match child_node.name().value() {
            "economic" => allocation.economic = first_arg_i64(child_node)?,
            "science" => allocation.science = first_arg_i64(child_node)?,
            "technology" => {
                for field_node in children(child_node) {
                    let name = field_node.name().value();
                    let field = TechField::from_str(name).map_err(|_| anyhow!("unknown tech field \"{name}\""))?;
                    allocation.technology.insert(field, first_arg_i64(field_node)?);
                }
            }
            other => bail!("unknown research node \"{other}\""),
        }
    }
    Ok(allocation)
}

fn parse_diplomacy_node(node: &KdlNode) -> Result<Vec<DiplomaticOrder>> {
    let mut orders = Vec::new();
    for action_node in children(node) {
        let word = action_node.name().value();
        let action = DiplomaticAction::from_str(word).map_err(|_| anyhow!("unknown diplomatic action \"{word}\""))?;
        orders.push(DiplomaticOrder {
            target: HouseId(require_prop_i64(action_node, "target")? as u32),
            action,
            terms: prop_str(action_node, "terms").map(|s| s.to_string()),
        });
    }
    Ok(orders)
}

fn parse_espionage_node(node: &KdlNode) -> Result<Vec<EspionageOrder>> {
    let mut orders = Vec::new();
    for action_node in children(node) {
        let word = action_node.name().value();
        // hack_starbase is the traditional spelling for a starbase probe
        let kind = match word {
            "hack_starbase" => EspionageKind::StarbaseIntel,
            other => EspionageKind::from_str(other).map_err(|_| anyhow!("unknown espionage action \"{other}\""))?,
        };
        orders.push(EspionageOrder {
            kind,
            target: SystemId(require_prop_i64(action_node, "target")? as u32),
            budget: prop_i64(action_node, "budget").unwrap_or(0),
        });
    }
    Ok(orders)
}

/// Canonical text form of a packet. `parse_orders(unparse_orders(p)) == p`
/// for every packet; used when relaying orders to disk and in tests.
pub fn unparse_orders(packet: &CommandPacket) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "orders turn={} house={} {{", packet.turn, packet.house_id);

    for order in &packet.fleet_commands {
        let _ = write!(out, "    fleet {} {{ {}", order.fleet_id, order.kind);
        if let Some(status) = order.status {
            let _ = write!(out, " \"{}\"", status);
        }
        if let Some(system) = order.target_system {
            let _ = write!(out, " to={}", system);
        }
        if let Some(fleet) = order.target_fleet {
            let _ = write!(out, " fleet={}", fleet);
        }
        if let Some(roe) = order.roe {
            let _ = write!(out, " roe={}", roe);
        }
        if order.priority != 0 {
            let _ = write!(out, " priority={}", order.priority);
        }
        let _ = writeln!(out, " }}");
    }

    let mut build_by_colony: Vec<(ColonyId, Vec<&BuildOrder>)> = Vec::new();
    for order in &packet.build_commands {
        match build_by_colony.iter_mut().find(|(c, _)| *c == order.colony_id) {
            Some((_, bucket)) => bucket.push(order),
            None => build_by_colony.push((order.colony_id, vec![order])),
        }
    }
    for (colony_id, orders) in build_by_colony {
        let _ = writeln!(out, "    build {} {{", colony_id);
        for order in orders {
            let item = match order.item {
                BuildItem::Ship(class) => format!("ship \"{}\"", class),
                BuildItem::Facility(kind) => format!("facility \"{}\"", kind),
                BuildItem::Ground(class) => format!("ground \"{}\"", class),
                BuildItem::Industrial => "industrial".to_string(),
                BuildItem::Infrastructure => "infrastructure".to_string(),
            };
            let _ = writeln!(out, "        {} quantity={}", item, order.quantity);
        }
        let _ = writeln!(out, "    }}");
    }

    let research = &packet.research_allocation;
    if research.total_points() != 0 {
        let _ = writeln!(out, "    research {{");
        if research.economic != 0 {
            let _ = writeln!(out, "        economic {}", research.economic);
        }
        if research.science != 0 {
            let _ = writeln!(out, "        science {}", research.science);
        }
        if !research.technology.is_empty() {
            let _ = writeln!(out, "        technology {{");
            for (field, points) in &research.technology {
                let _ = writeln!(out, "            {} {}", field, points);
            }
            let _ = writeln!(out, "        }}");
        }
        let _ = writeln!(out, "    }}");
    }

    if !packet.diplomatic_commands.is_empty() {
        let _ = writeln!(out, "    diplomacy {{");
        for order in &packet.diplomatic_commands {
            let _ = write!(out, "        {} target={}", order.action, order.target);
            if let Some(terms) = &order.terms {
                let _ = write!(out, " terms=\"{}\"", terms);
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "    }}");
    }

    if !packet.espionage_actions.is_empty() {
        let _ = writeln!(out, "    espionage {{");
        for order in &packet.espionage_actions {
            let _ = writeln!(out, "        {} target={} budget={}", order.kind, order.target, order.budget);
        }
        let _ = writeln!(out, "    }}");
    }

    if packet.ebp_investment != 0 || packet.cip_investment != 0 {
        let _ = writeln!(out, "    invest ebp={} cip={}", packet.ebp_investment, packet.cip_investment);
    }

    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_scenario_order_sheet() {
        let packet = parse_orders(
            r#"
orders turn=4 house=2 {
    fleet 12 { move to=5 roe=7 }
    fleet 13 { patrol }
    build 3 { ship "destroyer" quantity=2 }
    research { economic 100; science 50; technology { wep 40 } }
    espionage { hack_starbase target=9 budget=200 }
}
"#,
        )
        .unwrap();

        assert_eq!(packet.turn, 4);
        assert_eq!(packet.house_id, HouseId(2));
        assert_eq!(packet.fleet_commands.len(), 2);
        assert_eq!(packet.fleet_commands[0].kind, FleetOrderKind::Move);
        assert_eq!(packet.fleet_commands[0].target_system, Some(SystemId(5)));
        assert_eq!(packet.fleet_commands[0].roe, Some(7));
        assert_eq!(packet.fleet_commands[1].kind, FleetOrderKind::Patrol);
        assert_eq!(
            packet.build_commands,
            vec![BuildOrder {
                colony_id: ColonyId(3),
                item: BuildItem::Ship(ShipClass::Destroyer),
                quantity: 2,
            }]
        );
        assert_eq!(packet.research_allocation.economic, 100);
        assert_eq!(packet.research_allocation.technology.get(&TechField::Wep), Some(&40));
        assert_eq!(packet.espionage_actions[0].kind, EspionageKind::StarbaseIntel);
        assert_eq!(packet.espionage_actions[0].budget, 200);
    }

    #[test]
    fn shorthand_fleet_command_is_accepted() {
        let packet = parse_orders("orders turn=1 house=1 { fleet 13 \"patrol\" }").unwrap();
        assert_eq!(packet.fleet_commands[0].kind, FleetOrderKind::Patrol);
    }

    #[test]
    fn unknown_nodes_are_rejected() {
        assert!(parse_orders("orders turn=1 house=1 { teleport 3 }").is_err());
        assert!(parse_orders("orders turn=1 house=1 { fleet 3 { warp to=2 } }").is_err());
        assert!(parse_orders("orders turn=1 house=1 { build 3 { ship \"moon\" } }").is_err());
    }

    #[test]
    fn missing_required_targets_are_rejected() {
        assert!(parse_orders("orders turn=1 house=1 { fleet 3 { move } }").is_err());
        assert!(parse_orders("orders turn=1 house=1 { fleet 3 { join_fleet } }").is_err());
    }

    #[test]
    fn set_status_carries_the_status_word() {
        let packet = parse_orders("orders turn=1 house=1 { fleet 3 { set_status \"reserve\" } }").unwrap();
        assert_eq!(packet.fleet_commands[0].status, Some(FleetStatus::Reserve));
    }

    #[test]
    fn parse_unparse_is_identity() {
        let mut packet = CommandPacket::empty(HouseId(2), 9);
        packet.fleet_commands.push(FleetOrder {
            fleet_id: FleetId(12),
            kind: FleetOrderKind::Move,
            target_system: Some(SystemId(5)),
            target_fleet: None,
            roe: Some(7),
            priority: 2,
            status: None,
        });
        packet.fleet_commands.push(FleetOrder::simple(FleetId(13), FleetOrderKind::SeekHome));
        packet.fleet_commands.push(FleetOrder {
            fleet_id: FleetId(14),
            kind: FleetOrderKind::SetStatus,
            target_system: None,
            target_fleet: None,
            roe: None,
            priority: 0,
            status: Some(FleetStatus::Mothballed),
        });
        packet.build_commands.push(BuildOrder {
            colony_id: ColonyId(3),
            item: BuildItem::Ship(ShipClass::Etac),
            quantity: 1,
        });
        packet.build_commands.push(BuildOrder {
            colony_id: ColonyId(3),
            item: BuildItem::Infrastructure,
            quantity: 4,
        });
        packet.research_allocation.economic = 100;
        packet.research_allocation.technology.insert(TechField::Clk, 25);
        packet.diplomatic_commands.push(DiplomaticOrder {
            target: HouseId(3),
            action: DiplomaticAction::Hostile,
            terms: None,
        });
        packet.espionage_actions.push(EspionageOrder {
            kind: EspionageKind::ColonyIntel,
            target: SystemId(8),
            budget: 150,
        });
        packet.ebp_investment = 50;
        packet.cip_investment = 25;

        let text = unparse_orders(&packet);
        let reparsed = parse_orders(&text).unwrap();
        assert_eq!(reparsed, packet);
    }

    #[test]
    fn empty_packet_round_trips() {
        let packet = CommandPacket::empty(HouseId(4), 11);
        let reparsed = parse_orders(&unparse_orders(&packet)).unwrap();
        assert_eq!(reparsed, packet);
        assert!(reparsed.is_empty());
    }
}
