//! Quota-aware retry with backoff and model fallback.
//!
//! Every outbound one-shot request to the backend goes through
//! [`execute_with_retry`]: transient classes are absorbed and retried here,
//! everything else propagates to the caller unchanged.

use std::time::Duration;

use crate::error::{BridgeError, Result};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Upper bound on calls per invocation, first attempt included.
    pub max_attempts: u32,
    /// Quota backoff grows as `backoff_base * attempt_index`.
    pub backoff_base: Duration,
    /// Backend-side faults wait a shorter `transient_delay * attempt_index`.
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            transient_delay: Duration::from_millis(200),
        }
    }
}

/// Run `work` against the backend, retrying per the policy.
///
/// The model passed to `work` starts as `primary_model` and switches to
/// `fallback_model` at most once: on the first quota failure, or immediately
/// when the backend reports the model as unknown. Authorization failures and
/// unclassified errors are never retried.
pub fn execute_with_retry<T, F>(
    api_key: &str,
    primary_model: &str,
    fallback_model: Option<&str>,
    policy: RetryPolicy,
    mut work: F,
) -> Result<T>
where
    F: FnMut(&str) -> Result<T>,
{
    if api_key.trim().is_empty() {
        return Err(BridgeError::Configuration {
            message: "no API key configured".to_string(),
        });
    }

    let mut model = primary_model.to_string();
    let mut switched = false;
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        match work(&model) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let attempts_remain = attempt < policy.max_attempts;
                match &err {
                    BridgeError::Quota { .. } if attempts_remain => {
                        if !switched {
                            if let Some(fallback) = fallback_model {
                                println!(
                                    "[Retry] quota hit on {}, switching to {}",
                                    model, fallback
                                );
                                model = fallback.to_string();
                                switched = true;
                            }
                        }
                        std::thread::sleep(policy.backoff_base * attempt);
                    }
                    BridgeError::TransientBackend { .. } if attempts_remain => {
                        std::thread::sleep(policy.transient_delay * attempt);
                    }
                    BridgeError::ModelNotFound { .. }
                        if attempts_remain && !switched && fallback_model.is_some() =>
                    {
                        // Not a fault, just a configuration adaptation: no delay.
                        model = fallback_model.unwrap_or_default().to_string();
                        switched = true;
                    }
                    _ => return Err(err),
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| BridgeError::Other("retries exhausted".to_string())))
}
