use crate::rate_limit::RateLimiter;
use market_data_hub::MarketDataHub;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<MarketDataHub>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(hub: Arc<MarketDataHub>, rate_limit_per_minute: u32) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(RateLimiter::per_minute(rate_limit_per_minute)),
        }
    }
}
