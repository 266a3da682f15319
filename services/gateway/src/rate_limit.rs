use crate::error::AppError;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Instant;

#[derive(Clone)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, capacity: u32, refill_per_sec: f64, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = f64::min(capacity as f64, self.tokens + elapsed * refill_per_sec);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per client IP token bucket. A burst of `capacity` requests, refilled
/// continuously over one minute.
pub struct RateLimiter {
    capacity: u32,
    refill_per_sec: f64,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn per_minute(capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_per_sec: capacity as f64 / 60.0,
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), AppError> {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), AppError> {
        let mut bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| Bucket::full(self.capacity));

        if bucket.allow_request(self.capacity, self.refill_per_sec, now) {
            Ok(())
        } else {
            tracing::warn!(%ip, "Rate limit exceeded");
            Err(AppError::RateLimitExceeded(format!(
                "Too many requests from {ip}, please try again later."
            )))
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}
