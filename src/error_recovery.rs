//! Bounded retry for transient transport failures.
//!
//! Only [`RigError::Transport`] is retried. A `:N` rejection means the
//! controller heard the command and refused it, so repeating it would only
//! repeat the refusal.

use crate::error::{RigError, RigResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use tiger_rig::error_recovery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 2,
///     backoff_delay: Duration::from_millis(50),
///     backoff_multiplier: 2.0,
/// };
/// assert_eq!(policy.delay_for(1), Duration::from_millis(100));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The maximum number of retry attempts, not counting the initial try.
    ///
    /// Set to 0 to disable retries.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub backoff_delay: Duration,

    /// Factor applied to the delay after each failed retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    /// Two retries, 50ms initial delay, doubling.
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        self.backoff_delay.mul_f64(factor)
    }

    /// Run `op`, retrying while it fails with a transient error.
    ///
    /// The last error is returned once the attempts are exhausted. Non-transient
    /// errors are returned immediately.
    pub async fn retry_transient<T, F, Fut>(&self, mut op: F) -> RigResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RigResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after transport error");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), RigError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RigError::Configuration(format!(
                "retry backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AsiErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = policy
            .retry_transient(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RigError::transport("hub", "timeout"))
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let result: RigResult<()> = policy
            .retry_transient(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RigError::transport("hub", "timeout"))
            })
            .await;

        assert!(matches!(result, Err(RigError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_retries_rejected_commands() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: RigResult<()> = policy
            .retry_transient(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RigError::DeviceCommand {
                    command: "LK".into(),
                    reply: ":N-5".into(),
                    code: AsiErrorCode::OperationFailed,
                })
            })
            .await;

        assert!(matches!(result, Err(RigError::DeviceCommand { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_geometrically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }
}
