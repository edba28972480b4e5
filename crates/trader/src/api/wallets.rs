use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;

#[derive(Deserialize)]
pub struct FollowRequest {
    pub proxy_wallet: String,
    pub name: String,
    pub allocated_capital: Decimal,
}

#[derive(Serialize)]
pub struct WalletResponse {
    pub proxy_wallet: String,
    pub name: String,
    pub status: String,
    pub allocated_capital: String,
    pub added_at: String,
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}

fn is_valid_eth_address(addr: &str) -> bool {
    addr.len() == 42 && addr.starts_with("0x") && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

pub async fn follow_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FollowRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<MessageResponse>)> {
    if !is_valid_eth_address(&req.proxy_wallet) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(MessageResponse {
                message: "invalid wallet address: must be 42-char hex string starting with 0x"
                    .to_string(),
            }),
        ));
    }

    if req.allocated_capital <= Decimal::ZERO {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(MessageResponse {
                message: "allocated_capital must be > 0".to_string(),
            }),
        ));
    }

    state
        .engine
        .lock()
        .await
        .follow_wallet(req.proxy_wallet.clone(), req.name, req.allocated_capital)
        .await
        .map_err(|_db_err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse {
                    message: "failed to follow wallet".to_string(),
                }),
            )
        })?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("now following {}", req.proxy_wallet),
        }),
    ))
}

pub async fn unfollow_wallet(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .engine
        .lock()
        .await
        .unfollow_wallet(&addr)
        .await
        .map_err(|_db_err| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(MessageResponse {
        message: format!("unfollowed {addr}"),
    }))
}

pub async fn list_wallets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WalletResponse>>, StatusCode> {
    let wallets = state
        .db
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT proxy_wallet, name, status, allocated_capital, added_at
                 FROM followed_wallets
                 WHERE status != 'removed'
                 ORDER BY added_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(WalletResponse {
                        proxy_wallet: row.get(0)?,
                        name: row.get(1)?,
                        status: row.get(2)?,
                        allocated_capital: row.get(3)?,
                        added_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|_db_err| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(wallets))
}

pub async fn pause_wallet(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<Json<MessageResponse>, StatusCode> {
    state
        .engine
        .lock()
        .await
        .pause_wallet(&addr)
        .await
        .map_err(|_db_err| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(MessageResponse {
        message: format!("paused {addr}"),
    }))
}

pub async fn resume_wallet(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<Json<MessageResponse>, StatusCode> {
    state
        .engine
        .lock()
        .await
        .resume_wallet(&addr)
        .await
        .map_err(|_db_err| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(MessageResponse {
        message: format!("resumed {addr}"),
    }))
}
