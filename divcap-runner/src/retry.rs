//! Retry policy applied by the orchestrator around single-attempt provider calls.

use std::time::Duration;

use divcap_core::CaptureError;

/// `max_attempts` total tries with a fixed `backoff` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts (two retries), retried immediately.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// `retries` extra attempts after the first.
    pub fn from_retries(retries: u32, backoff: Duration) -> Self {
        Self::new(retries.saturating_add(1), backoff)
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. `op` receives the 1-based attempt number.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut(u32) -> Result<T, CaptureError>,
    ) -> Result<T, CaptureError> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    tracing::debug!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        "attempt failed, retrying: {e}"
                    );
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(e: &CaptureError) -> bool {
    match e {
        CaptureError::Provider(p) => p.is_retryable(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divcap_core::data::ProviderError;

    fn transient() -> CaptureError {
        ProviderError::NetworkUnreachable("reset".into()).into()
    }

    #[test]
    fn succeeds_on_last_attempt() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let out = policy.run("KO", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(transient())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::from_retries(1, Duration::ZERO);
        let mut calls = 0;
        let out: Result<(), _> = policy.run("KO", |_| {
            calls += 1;
            Err(transient())
        });
        assert!(out.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn non_retryable_stops_immediately() {
        let mut calls = 0;
        let out: Result<(), _> = RetryPolicy::default().run("ZZZZ", |_| {
            calls += 1;
            Err(ProviderError::SymbolNotFound { symbol: "ZZZZ".into() }.into())
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);

        let mut calls = 0;
        let _: Result<(), _> = RetryPolicy::default().run("X", |_| {
            calls += 1;
            Err(CaptureError::InvalidInput("bad".into()))
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
