use std::net::SocketAddr;

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
};
use market_data_hub::snapshot::SnapshotReply;
use types::errors::QueryError;
use types::ids::Symbol;

/// `GET /v1/orderbook/{symbol}`: the current book of one synchronized symbol.
pub async fn get_orderbook(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(symbol): Path<String>,
) -> Result<Json<SnapshotReply>, AppError> {
    state.rate_limiter.check(peer.ip())?;

    let symbol = Symbol::try_new(&symbol)
        .ok_or_else(|| QueryError::NotFound(symbol.trim().to_ascii_uppercase()))?;
    let reply = state.hub.snapshot(&symbol)?;
    Ok(Json(reply))
}
