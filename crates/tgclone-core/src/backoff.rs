use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Flat pacing policy: a fixed pause after every delivered message, plus
/// whatever the provider asks for when it rate-limits us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Pause after each successful send.
    pub message_delay: Duration,
    /// Extra margin added on top of a provider `retry_after`.
    pub rate_limit_padding: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            message_delay: Duration::from_secs(1),
            rate_limit_padding: Duration::ZERO,
        }
    }
}

/// The only place the pipeline sleeps.
#[derive(Debug)]
pub struct BackoffController {
    policy: BackoffPolicy,
    rate_limit_waits: u64,
    total_waited: Duration,
}

impl BackoffController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            rate_limit_waits: 0,
            total_waited: Duration::ZERO,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Suspend for at least `retry_after` (plus padding). Never shortened.
    pub async fn wait(&mut self, retry_after: Duration) {
        let dur = retry_after + self.policy.rate_limit_padding;
        tracing::warn!(wait_secs = dur.as_secs_f64(), "rate limited by provider, backing off");
        self.rate_limit_waits += 1;
        self.sleep_for(dur).await;
    }

    /// Fixed inter-message delay applied after a successful transfer.
    pub async fn pace(&mut self) {
        let dur = self.policy.message_delay;
        if dur > Duration::ZERO {
            self.sleep_for(dur).await;
        }
    }

    pub fn rate_limit_waits(&self) -> u64 {
        self.rate_limit_waits
    }

    pub fn total_waited(&self) -> Duration {
        self.total_waited
    }

    async fn sleep_for(&mut self, dur: Duration) {
        let started = Instant::now();
        sleep(dur).await;
        self.total_waited += started.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rate_limit_wait_is_at_least_retry_after_plus_padding() {
        let mut b = BackoffController::new(BackoffPolicy {
            message_delay: Duration::from_millis(10),
            rate_limit_padding: Duration::from_millis(500),
        });
        let start = Instant::now();
        b.wait(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_millis(5500));
        assert_eq!(b.rate_limit_waits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pace_sleeps_the_fixed_delay() {
        let mut b = BackoffController::new(BackoffPolicy::default());
        let start = Instant::now();
        b.pace().await;
        b.pace().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(b.rate_limit_waits(), 0);
        assert!(b.total_waited() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_does_not_sleep() {
        let mut b = BackoffController::new(BackoffPolicy {
            message_delay: Duration::ZERO,
            rate_limit_padding: Duration::ZERO,
        });
        b.pace().await;
        assert_eq!(b.total_waited(), Duration::ZERO);
    }
}
