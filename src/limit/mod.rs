use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ServiceError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-client submission throttle, consulted before any task is created.
/// Each client identity gets its own fixed quota per minute; windows reset
/// independently per key.
pub struct SubmissionLimiter {
    quota: Quota,
    limiters: Mutex<HashMap<String, Arc<DirectRateLimiter>>>,
}

impl SubmissionLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            quota: Quota::per_minute(per_minute),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Ok when the client still has budget in its window; `Validation`
    /// otherwise. The limiter only ever sees client identities, never tasks.
    pub async fn check(&self, client: &str) -> Result<(), ServiceError> {
        let limiter = {
            let mut limiters = self.limiters.lock().await;
            limiters
                .entry(client.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
                .clone()
        };

        if limiter.check().is_err() {
            debug!("Rate limit exceeded for client {}", client);
            return Err(ServiceError::Validation(format!(
                "rate limit exceeded for {}",
                client
            )));
        }
        Ok(())
    }
}
