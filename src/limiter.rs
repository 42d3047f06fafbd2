use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The limiter acquisition was interrupted by shutdown.
#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Token-bucket limiter shared across worker tasks, with a cool-down mode.
///
/// While cooled down no acquisitions succeed until the resume instant,
/// after which the steady-state rate applies again. Used for Apple's
/// AMP API, which answers 429 when pushed too hard.
pub struct CooldownLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl CooldownLimiter {
    /// One request per `period`, no burst.
    pub fn new(period: Duration) -> Self {
        let quota = Quota::with_period(period)
            .expect("limiter period must be non-zero")
            .allow_burst(NonZeroU32::MIN);

        Self {
            limiter: RateLimiter::direct(quota),
            cooldown_until: Mutex::new(None),
        }
    }

    /// Deny all acquisitions for `duration`, then resume at the steady rate.
    pub fn cool_down(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut guard = self.lock_cooldown();
        // Keep the later deadline if several workers hit 429 at once.
        if guard.map_or(true, |existing| until > existing) {
            *guard = Some(until);
        }
    }

    /// Wait for a token. Blocks on the cool-down deadline as well as on
    /// token availability, and on cancellation.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            let deadline = *self.lock_cooldown();
            match deadline {
                Some(until) if Instant::now() < until => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(until) => {}
                        _ = cancel.cancelled() => return Err(Cancelled),
                    }
                }
                Some(_) => {
                    *self.lock_cooldown() = None;
                }
                None => break,
            }
        }

        tokio::select! {
            _ = self.limiter.until_ready() => Ok(()),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }

    fn lock_cooldown(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
