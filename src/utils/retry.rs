use std::time::Duration;
use crate::upload::constants::{BACKOFF_INITIAL, BACKOFF_MAX, BACKOFF_MULTIPLIER, RETRY_DELAY};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// Backoff used for transient network and server failures
    pub fn transient() -> Self {
        RetryStrategy::Exponential {
            initial: BACKOFF_INITIAL,
            multiplier: BACKOFF_MULTIPLIER,
            max_delay: BACKOFF_MAX,
        }
    }

    /// Fixed wait between budgeted attempts
    pub fn attempts() -> Self {
        RetryStrategy::Fixed(RETRY_DELAY)
    }

    /// 计算第 n 次重试的延迟
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                let delay = Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()));
                std::cmp::min(delay, *max_delay)
            }
        }
    }

    /// The delay after `previous`, or the first delay when nothing was waited yet.
    ///
    /// Only the previous delay is carried between steps, so the sequence is
    /// rebuilt from it instead of from an attempt number.
    pub fn next_delay(&self, previous: Option<Duration>) -> Duration {
        match (self, previous) {
            (RetryStrategy::Fixed(delay), _) => *delay,
            (RetryStrategy::Exponential { .. }, None) => self.get_delay(0),
            (RetryStrategy::Exponential { multiplier, max_delay, .. }, Some(previous)) => {
                let delay = previous.as_secs_f64() * multiplier;
                Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()))
            }
        }
    }
}
