//! Caller-side retry for subscriptions
//!
//! A feed handle is not always ready on the gateway the moment a
//! participant announces it, so the first subscribe attempt can fail.

use std::time::Duration;

use super::{FeedSubscriber, Subscription};
use crate::config::GatewayConfig;
use crate::errors::{ClassroomError, Result};
use crate::types::{FeedId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            attempts: config.subscribe_attempts,
            delay: config.subscribe_retry_delay(),
        }
    }
}

/// Subscribe, retrying failed attempts after `policy.delay`.
///
/// Returns the first successful subscription, or the last error once the
/// attempts run out.
pub async fn subscribe_with_retry(
    subscriber: &FeedSubscriber,
    room: &RoomId,
    feed: FeedId,
    policy: RetryPolicy,
) -> Result<Subscription> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match subscriber.subscribe(room, feed).await {
            Ok(subscription) => {
                if attempt > 1 {
                    log::info!("Subscribed to feed {} on attempt {}", feed, attempt);
                }
                return Ok(subscription);
            }
            Err(e) => {
                log::warn!(
                    "Subscribe attempt {}/{} for feed {} failed: {}",
                    attempt,
                    attempts,
                    feed,
                    e
                );
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ClassroomError::Negotiation(format!("no subscribe attempt made for feed {}", feed))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = crate::config::ClassroomConfig::default().gateway;
        config.subscribe_attempts = 5;
        config.subscribe_retry_delay_ms = 250;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
