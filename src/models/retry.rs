use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2,
        }
    }
}

/// How many times a consumer hands the same message to its handler before
/// giving up and parking it on the dead-letter queue.
#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    pub max_attempts: u32,
    pub dead_letter_queue: String,
}

impl RedeliveryPolicy {
    pub fn new(max_attempts: u32, dead_letter_queue: impl Into<String>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::new(5, "notifications_dead_letter")
    }
}

/// Upper bounds for individual broker round trips.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub publish: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            publish: Duration::from_secs(5),
        }
    }
}
