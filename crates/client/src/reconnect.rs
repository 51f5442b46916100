//! Automatic reconnection policy.

use std::time::Duration;

/// What the engine knows when asking for the next retry delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    /// Reconnect attempts made so far in this outage (0 before the first).
    pub previous_attempts: u32,
    /// Time since the outage began.
    pub elapsed: Duration,
}

/// Decides how long to wait before the next reconnect attempt.
///
/// Returning `None` stops reconnecting; the engine assumes nothing about
/// the growth of the returned delays.
pub trait ReconnectPolicy: Send + Sync {
    fn next_delay(&self, context: &RetryContext) -> Option<Duration>;
}

impl<F> ReconnectPolicy for F
where
    F: Fn(&RetryContext) -> Option<Duration> + Send + Sync,
{
    fn next_delay(&self, context: &RetryContext) -> Option<Duration> {
        self(context)
    }
}

/// Default policy: a fixed sequence of increasing delays, then a steady
/// interval, giving up once the outage exceeds `max_elapsed`.
#[derive(Debug, Clone)]
pub struct DefaultReconnectPolicy {
    pub initial_delays: Vec<Duration>,
    pub steady_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for DefaultReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delays: vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            steady_interval: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(300),
        }
    }
}

impl ReconnectPolicy for DefaultReconnectPolicy {
    fn next_delay(&self, context: &RetryContext) -> Option<Duration> {
        if context.elapsed >= self.max_elapsed {
            return None;
        }
        Some(
            self.initial_delays
                .get(context.previous_attempts as usize)
                .copied()
                .unwrap_or(self.steady_interval),
        )
    }
}
