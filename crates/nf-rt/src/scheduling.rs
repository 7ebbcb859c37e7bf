//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Runtime helpers supporting the simulation scheduler."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

/// Fixed-period async timer for loops that must never overlap themselves.
///
/// The owner awaits [`RateLimiter::tick`], runs one iteration, then awaits again,
/// so an iteration is never started while the previous one is still running.
/// Firings missed while an iteration overran are skipped rather than replayed
/// in a burst.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Like [`RateLimiter::new`] but the first firing happens one full period from now.
    pub fn delayed(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.tick().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_limiter_waits_one_period() {
        let mut limiter = RateLimiter::delayed(Duration::from_secs(5));
        let start = Instant::now();
        limiter.tick().await;
        assert!(Instant::now() - start >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_skips_missed_firings() {
        let period = Duration::from_secs(5);
        let mut limiter = RateLimiter::new(period);
        let start = limiter.tick().await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        // One late firing is delivered for the overrun, then the schedule
        // realigns to the next period boundary instead of bursting.
        limiter.tick().await;
        let next = limiter.tick().await;
        assert_eq!(next - start, Duration::from_secs(15));
    }
}
