use crate::error::PortalError;
use crate::store::StoreError;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Retries `op` while it fails with a transient store error. Anything else
/// (not-found included) is returned on the first failure.
pub fn with_retry<T, F>(policy: RetryPolicy, op: F) -> Result<T, PortalError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    with_retry_sleep(policy, op, std::thread::sleep)
}

pub fn with_retry_sleep<T, F, S>(policy: RetryPolicy, mut op: F, mut sleep: S) -> Result<T, PortalError>
where
    F: FnMut() -> Result<T, StoreError>,
    S: FnMut(Duration),
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                if attempt >= attempts {
                    return Err(PortalError::Network {
                        attempts,
                        last: e.to_string(),
                    });
                }
                warn!(attempt, attempts, error = %e, "transient store error, retrying");
                sleep(policy.delay);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
