use crate::db::GameDb;
use anyhow::{Context, Result};
use chrono::Utc;
use ec4x_domain::{
    BuildOrder, CommandPacket, DiplomaticOrder, EspionageOrder, FleetOrder, GameId, HouseId, ResearchAllocation,
};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeMap;

/// One persisted command row: the typed columns carry what the indexes
/// need, `params_json` carries the full order as a versioned sum type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderParams {
    Fleet(FleetOrder),
    Build(BuildOrder),
    Research(ResearchAllocation),
    Diplomacy(DiplomaticOrder),
    Espionage(EspionageOrder),
    Invest { ebp: i64, cip: i64 },
    /// Marker for a deliberately empty submission: the house is counted
    /// as ready even though it ordered nothing.
    Empty {},
}

impl OrderParams {
    fn command_type(&self) -> &'static str {
        match self {
            OrderParams::Fleet(_) => "fleet",
            OrderParams::Build(_) => "build",
            OrderParams::Research(_) => "research",
            OrderParams::Diplomacy(_) => "diplomacy",
            OrderParams::Espionage(_) => "espionage",
            OrderParams::Invest { .. } => "invest",
            OrderParams::Empty {} => "empty",
        }
    }
}

/// Splits a packet into persistable rows.
pub fn explode_packet(packet: &CommandPacket) -> Vec<OrderParams> {
    let mut rows = Vec::new();
    for order in &packet.fleet_commands {
        rows.push(OrderParams::Fleet(order.clone()));
    }
    for order in &packet.build_commands {
        rows.push(OrderParams::Build(order.clone()));
    }
    if packet.research_allocation.total_points() != 0 {
        rows.push(OrderParams::Research(packet.research_allocation.clone()));
    }
    for order in &packet.diplomatic_commands {
        rows.push(OrderParams::Diplomacy(order.clone()));
    }
    for order in &packet.espionage_actions {
        rows.push(OrderParams::Espionage(order.clone()));
    }
    if packet.ebp_investment != 0 || packet.cip_investment != 0 {
        rows.push(OrderParams::Invest {
            ebp: packet.ebp_investment,
            cip: packet.cip_investment,
        });
    }
    if rows.is_empty() {
        rows.push(OrderParams::Empty {});
    }
    rows
}

/// Rebuilds one house's packet from its rows for a turn.
pub fn assemble_packet(house_id: HouseId, turn: u32, rows: Vec<OrderParams>) -> CommandPacket {
    let mut packet = CommandPacket::empty(house_id, turn);
    for row in rows {
        match row {
            OrderParams::Fleet(order) => packet.fleet_commands.push(order),
            OrderParams::Build(order) => packet.build_commands.push(order),
            OrderParams::Research(allocation) => packet.research_allocation = allocation,
            OrderParams::Diplomacy(order) => packet.diplomatic_commands.push(order),
            OrderParams::Espionage(order) => packet.espionage_actions.push(order),
            OrderParams::Invest { ebp, cip } => {
                packet.ebp_investment = ebp;
                packet.cip_investment = cip;
            }
            OrderParams::Empty {} => {}
        }
    }
    packet
}

pub struct CommandBmc;

impl CommandBmc {
    /// Persists one house's packet for a turn. An earlier unprocessed
    /// submission for the same `(turn, house)` is superseded: players may
    /// resubmit until resolution locks the turn.
    pub async fn store_packet(db: &GameDb, game_id: &GameId, packet: &CommandPacket) -> Result<()> {
        let mut tx = db.pool().begin().await?;

        sqlx::query("DELETE FROM commands WHERE game_id = ?1 AND turn = ?2 AND house_id = ?3 AND processed = 0")
            .bind(&game_id.0)
            .bind(packet.turn as i64)
            .bind(packet.house_id.0 as i64)
            .execute(&mut *tx)
            .await?;

        let received_at = Utc::now();
        for row in explode_packet(packet) {
            let (fleet_id, colony_id, target_system_id, target_fleet_id) = match &row {
                OrderParams::Fleet(order) => (
                    Some(order.fleet_id.0 as i64),
                    None,
                    order.target_system.map(|s| s.0 as i64),
                    order.target_fleet.map(|f| f.0 as i64),
                ),
                OrderParams::Build(order) => (None, Some(order.colony_id.0 as i64), None, None),
                OrderParams::Espionage(order) => (None, None, Some(order.target.0 as i64), None),
                _ => (None, None, None, None),
            };
            sqlx::query(
                r#"
INSERT INTO commands (game_id, turn, house_id, command_type, fleet_id, colony_id,
                      target_system_id, target_fleet_id, params_json, processed, received_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
                "#,
            )
            .bind(&game_id.0)
            .bind(packet.turn as i64)
            .bind(packet.house_id.0 as i64)
            .bind(row.command_type())
            .bind(fleet_id)
            .bind(colony_id)
            .bind(target_system_id)
            .bind(target_fleet_id)
            .bind(serde_json::to_string(&row)?)
            .bind(received_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Distinct houses with unprocessed commands for the turn; the daemon
    /// compares this against the bound-player roster for readiness.
    pub async fn houses_with_pending(db: &GameDb, game_id: &GameId, turn: u32) -> Result<Vec<HouseId>> {
        let rows = sqlx::query(
            "SELECT DISTINCT house_id FROM commands WHERE game_id = ?1 AND turn = ?2 AND processed = 0 ORDER BY house_id",
        )
        .bind(&game_id.0)
        .bind(turn as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| HouseId(row.get::<i64, _>("house_id") as u32))
            .collect())
    }

    pub async fn load_pending_packets(db: &GameDb, game_id: &GameId, turn: u32) -> Result<BTreeMap<HouseId, CommandPacket>> {
        let rows = sqlx::query(
            "SELECT house_id, params_json FROM commands WHERE game_id = ?1 AND turn = ?2 AND processed = 0 ORDER BY id",
        )
        .bind(&game_id.0)
        .bind(turn as i64)
        .fetch_all(db.pool())
        .await?;

        let mut by_house: BTreeMap<HouseId, Vec<OrderParams>> = BTreeMap::new();
        for row in rows {
            let house_id = HouseId(row.get::<i64, _>("house_id") as u32);
            let params: OrderParams =
                serde_json::from_str(row.get::<String, _>("params_json").as_str()).context("decoding command params")?;
            by_house.entry(house_id).or_default().push(params);
        }

        Ok(by_house
            .into_iter()
            .map(|(house_id, rows)| (house_id, assemble_packet(house_id, turn, rows)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GameDb;
    use ec4x_domain::{BuildItem, ColonyId, FleetId, FleetOrderKind, ShipClass, SystemId};

    fn sample_packet(house: u32, turn: u32) -> CommandPacket {
        let mut packet = CommandPacket::empty(HouseId(house), turn);
        let mut order = FleetOrder::simple(FleetId(7), FleetOrderKind::Move);
        order.target_system = Some(SystemId(3));
        order.roe = Some(5);
        packet.fleet_commands.push(order);
        packet.build_commands.push(BuildOrder {
            colony_id: ColonyId(1),
            item: BuildItem::Ship(ShipClass::Scout),
            quantity: 1,
        });
        packet.research_allocation.economic = 40;
        packet.ebp_investment = 10;
        packet
    }

    #[test]
    fn explode_assemble_is_identity() {
        let packet = sample_packet(2, 6);
        let rebuilt = assemble_packet(HouseId(2), 6, explode_packet(&packet));
        assert_eq!(rebuilt, packet);
    }

    #[tokio::test]
    async fn stored_packets_are_pending_until_processed() {
        let db = GameDb::open_in_memory().await.unwrap();
        let game_id = GameId("g1".into());

        let packet = sample_packet(2, 6);
        CommandBmc::store_packet(&db, &game_id, &packet).await.unwrap();

        assert_eq!(
            CommandBmc::houses_with_pending(&db, &game_id, 6).await.unwrap(),
            vec![HouseId(2)]
        );
        let loaded = CommandBmc::load_pending_packets(&db, &game_id, 6).await.unwrap();
        assert_eq!(loaded.get(&HouseId(2)), Some(&packet));

        // resubmission supersedes, not duplicates
        CommandBmc::store_packet(&db, &game_id, &packet).await.unwrap();
        assert_eq!(
            CommandBmc::houses_with_pending(&db, &game_id, 6).await.unwrap(),
            vec![HouseId(2)]
        );
    }
}
