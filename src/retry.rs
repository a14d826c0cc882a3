//! Retry logic for async calls.
//!
//! Every retried operation in the orchestrator is idempotent chain-side
//! (confirmations, batch requests and contract submissions all rely on
//! nonce or dedup checks there), so a bounded-attempt retrier that treats
//! all errors alike is enough.

use std::time::Duration;

use backoff::backoff::Backoff;
use futures::{Future, TryFutureExt};

use crate::error::Error;

/// Total calls [`with_retry`] gives an operation before surfacing its
/// last error.
pub const MAX_ATTEMPTS: usize = 10;

const BASE_PAUSE: Duration = Duration::from_secs(1);
const MAX_PAUSE: Duration = Duration::from_secs(5);

/// Pause schedule for [`with_retry`]: one second after the first failure,
/// growing by a second per attempt up to a five second ceiling, exhausted
/// once the attempt budget is spent.
#[derive(Debug, Default)]
struct LinearPause {
    attempt: usize,
}

impl Backoff for LinearPause {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= MAX_ATTEMPTS {
            return None;
        }
        Some(BASE_PAUSE.saturating_mul(self.attempt as u32).min(MAX_PAUSE))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Runs `op` until it succeeds or the attempt budget runs out, surfacing
/// the last error. Every error retries; per-attempt timeouts are the
/// caller's concern.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    backoff::future::retry(LinearPause::default(), || {
        op().map_err(backoff::Error::transient)
    })
    .await
}
