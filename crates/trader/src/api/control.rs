use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;

#[derive(Serialize)]
pub struct ControlResponse {
    pub message: String,
}

pub async fn halt(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.engine.lock().await.halt_all();
    Json(ControlResponse {
        message: "all trading halted".to_string(),
    })
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.engine.lock().await.resume_all();
    Json(ControlResponse {
        message: "trading resumed".to_string(),
    })
}

#[derive(Serialize)]
pub struct ExposureResponse {
    pub global_exposure: String,
    pub max_total_exposure: String,
    pub open_positions: usize,
    pub per_leader_exposure: HashMap<String, String>,
    pub is_halted: bool,
}

pub async fn get_exposure(State(state): State<Arc<AppState>>) -> Result<Json<ExposureResponse>, StatusCode> {
    let engine = state.engine.lock().await;
    let is_halted = engine.is_halted();
    drop(engine);

    let global_exposure = state.ledger.global_exposure().await;
    let open_positions = state.ledger.open_position_count().await;
    let per_leader_exposure = state
        .ledger
        .per_leader_exposure()
        .await
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

    Ok(Json(ExposureResponse {
        global_exposure: global_exposure.to_string(),
        max_total_exposure: state.config.max_total_exposure.to_string(),
        open_positions,
        per_leader_exposure,
        is_halted,
    }))
}
