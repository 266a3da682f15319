use std::collections::BTreeMap;

use crate::state::AppState;
use axum::{Json, extract::State};
use market_data_hub::SERVICE_VERSION;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub symbols: BTreeMap<String, &'static str>,
    pub sinks: usize,
    pub topics: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let symbols = state
        .hub
        .sync_states()
        .into_iter()
        .map(|(symbol, sync_state)| (symbol.to_string(), sync_state.as_str()))
        .collect();

    Json(StatusResponse {
        version: SERVICE_VERSION,
        symbols,
        sinks: state.hub.registry().sink_count(),
        topics: state.hub.registry().topic_count(),
    })
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.hub.metrics().export())
}
