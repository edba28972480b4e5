//! Audit trail: every attempted mirror, accepted or rejected, is recorded
//! twice — against `trader_trades` so `/api/trades` and `/api/pnl` reflect
//! reality, and appended to a per-wallet CSV under the configured
//! `trade_tracking.output_dir` so an operator can tail a plain file without
//! opening the DB.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::db::TraderDb;
use crate::engine::mirror::ExecutionOutcome;
use crate::types::FillEvent;

pub async fn record(
    db: &Arc<TraderDb>,
    fill: &FillEvent,
    outcome: &ExecutionOutcome,
    csv_output_dir: &str,
) -> Result<()> {
    if let Err(e) = append_csv(csv_output_dir, fill, outcome).await {
        warn!(trade_id = %fill.trade_id, error = %e, "failed to append CSV audit record");
    }

    match outcome {
        ExecutionOutcome::ExecutedBuy { shares, price, mirror_size_usd } => {
            insert_trade(
                db,
                fill,
                *mirror_size_usd,
                *price,
                "open",
                None,
                None,
                Some(*shares),
            )
            .await
        }
        ExecutionOutcome::ExecutedSell { shares, price, proceeds } => {
            insert_trade(db, fill, *proceeds, *price, "open", None, None, Some(*shares)).await
        }
        ExecutionOutcome::Rejected { reason } => {
            warn!(trade_id = %fill.trade_id, reason = %reason, "mirror rejected, no trade row written");
            Ok(())
        }
        ExecutionOutcome::Failed { error } => {
            warn!(trade_id = %fill.trade_id, error = %error, "mirror failed, no trade row written");
            Ok(())
        }
        ExecutionOutcome::Deferred | ExecutionOutcome::Noop => Ok(()),
    }
}

fn outcome_label(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::ExecutedBuy { .. } => "executed_buy",
        ExecutionOutcome::ExecutedSell { .. } => "executed_sell",
        ExecutionOutcome::Rejected { .. } => "rejected",
        ExecutionOutcome::Deferred => "deferred",
        ExecutionOutcome::Noop => "noop",
        ExecutionOutcome::Failed { .. } => "failed",
    }
}

async fn append_csv(output_dir: &str, fill: &FillEvent, outcome: &ExecutionOutcome) -> Result<()> {
    let dir = Path::new(output_dir);
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create CSV output dir: {output_dir}"))?;

    let path = dir.join(format!("{}.csv", fill.leader_wallet));
    let is_new = tokio::fs::metadata(&path).await.is_err();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("failed to open CSV audit file: {}", path.display()))?;

    if is_new {
        file.write_all(b"timestamp,trade_id,market,token_id,side,price,size,notional,outcome\n")
            .await?;
    }

    let line = format!(
        "{},{},{},{},{},{},{},{},{}\n",
        chrono::Utc::now().to_rfc3339(),
        fill.trade_id,
        fill.market,
        fill.token_id,
        fill.side,
        fill.price,
        fill.size,
        fill.notional(),
        outcome_label(outcome),
    );
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_trade(
    db: &Arc<TraderDb>,
    fill: &FillEvent,
    our_size_usd: rust_decimal::Decimal,
    our_entry_price: rust_decimal::Decimal,
    status: &str,
    slippage_applied: Option<rust_decimal::Decimal>,
    fee_applied: Option<rust_decimal::Decimal>,
    _shares: Option<rust_decimal::Decimal>,
) -> Result<()> {
    let leader = fill.leader_wallet.clone();
    let market = fill.market.clone();
    let side = fill.side.to_string();
    let their_price = fill.price.to_string();
    let their_size_usd = fill.notional().to_string();
    let their_hash = fill.trade_id.clone();
    let our_size = our_size_usd.to_string();
    let our_price = our_entry_price.to_string();
    let slippage = slippage_applied.unwrap_or_default().to_string();
    let fee = fee_applied.unwrap_or_default().to_string();
    let status = status.to_string();
    let now = chrono::Utc::now().to_rfc3339();

    db.call(move |conn| {
        conn.execute(
            "INSERT INTO trader_trades
             (proxy_wallet, condition_id, side, their_price, their_size_usd, their_trade_hash,
              our_size_usd, our_entry_price, slippage_applied, fee_applied, sizing_method,
              trading_mode, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'proportional', 'live', ?11, ?12)",
            rusqlite::params![
                leader, market, side, their_price, their_size_usd, their_hash, our_size, our_price,
                slippage, fee, status, now,
            ],
        )?;
        Ok(())
    })
    .await?;

    Ok(())
}
