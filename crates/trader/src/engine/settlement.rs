use crate::db::TraderDb;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Settle all open trades for a market when it resolves.
/// settle_price: 1.0 = outcome won, 0.0 = outcome lost.
pub async fn settle_market(
    db: &Arc<TraderDb>,
    condition_id: &str,
    settle_price: f64,
) -> Result<usize> {
    let cid = condition_id.to_string();

    let settled_count = db
        .call(move |conn| settle_market_sync(conn, &cid, settle_price))
        .await?;

    info!(
        condition_id = condition_id,
        settle_price = settle_price,
        settled = settled_count,
        "market settled"
    );

    Ok(settled_count)
}

fn settle_market_sync(
    conn: &mut rusqlite::Connection,
    condition_id: &str,
    settle_price: f64,
) -> Result<usize, rusqlite::Error> {
    let now = chrono::Utc::now().to_rfc3339();

    // Get all open trades for this market
    let mut stmt = conn.prepare(
        "SELECT id, side, our_entry_price, our_size_usd FROM trader_trades
         WHERE condition_id = ?1 AND status = 'open'",
    )?;

    let trades: Vec<(i64, String, f64, f64)> = stmt
        .query_map([condition_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut count = 0;
    for (id, side, entry_price, size_usd) in &trades {
        let pnl = match side.as_str() {
            "BUY" => (settle_price - entry_price) * size_usd,
            "SELL" => (entry_price - settle_price) * size_usd,
            _ => 0.0,
        };

        let status = if pnl >= 0.0 {
            "settled_win"
        } else {
            "settled_loss"
        };

        conn.execute(
            "UPDATE trader_trades SET status = ?1, exit_price = ?2, pnl = ?3, settled_at = ?4
             WHERE id = ?5",
            rusqlite::params![status, settle_price, pnl, now, id],
        )?;
        count += 1;
    }

    // Remove settled positions
    conn.execute(
        "DELETE FROM trader_positions WHERE condition_id = ?1",
        [condition_id],
    )?;

    Ok(count)
}
