//! Launch pacing for probes: a token bucket refilled by a background task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Refill ticks are microsecond-granular, so faster rates are capped here.
pub const MAX_TOKENS_PER_SEC: u32 = 1_000_000;

pub struct RateLimiter {
    sem: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl RateLimiter {
    /// Must be called inside a tokio runtime. `tokens_per_sec` is clamped to
    /// `1..=MAX_TOKENS_PER_SEC`.
    pub fn new(tokens_per_sec: u32) -> Self {
        let per_sec = tokens_per_sec.clamp(1, MAX_TOKENS_PER_SEC);
        let sem = Arc::new(Semaphore::new(0));
        let sem_bg = sem.clone();
        let interval = Duration::from_micros(1_000_000 / u64::from(per_sec));
        // Idle time does not bank more than one second of tokens.
        let burst = per_sec as usize;
        let refill = tokio::spawn(async move {
            let mut t = tokio::time::interval(interval);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                if sem_bg.available_permits() < burst {
                    sem_bg.add_permits(1);
                }
            }
        });
        RateLimiter { sem, refill }
    }

    /// Wait for one token and consume it.
    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill.abort();
    }
}
