use tokio::time::{sleep, Sleep};
use tower::retry::Policy;

use crate::net::util::retry::{classifier::RetryClassifier, lifecycle::RetryLifecycle, ExponentialBackoff};

/// Default maximum number of attempts, including the initial one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// A bounded exponential backoff retry policy.
///
/// Requests classified as needing to be retried are retried after an exponentially increasing backoff, up to a maximum
/// number of attempts. The attempt count is tracked per request: `tower` clones the policy for every request it
/// services, so each request starts again from its first attempt.
#[derive(Clone, Debug)]
pub struct BoundedExponentialBackoffRetryPolicy<C, L> {
    classifier: C,
    retry_lifecycle: L,
    backoff: ExponentialBackoff,
    max_attempts: u32,
    attempt: u32,
}

impl<C, L> BoundedExponentialBackoffRetryPolicy<C, L> {
    /// Creates a new `BoundedExponentialBackoffRetryPolicy` with the given classifier, lifecycle, and exponential
    /// backoff strategy.
    ///
    /// Defaults to a maximum of 10 attempts.
    pub fn new(classifier: C, retry_lifecycle: L, backoff: ExponentialBackoff) -> Self {
        Self {
            classifier,
            retry_lifecycle,
            backoff,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt: 1,
        }
    }

    /// Sets the maximum number of attempts, including the initial one.
    ///
    /// A value of zero is treated as one: the request is sent once and never retried.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl<C, L, Req, Res, Error> Policy<Req, Res, Error> for BoundedExponentialBackoffRetryPolicy<C, L>
where
    C: RetryClassifier<Res, Error>,
    L: RetryLifecycle<Req, Res, Error>,
    Req: Clone,
{
    type Future = Sleep;

    fn retry(&mut self, request: &mut Req, response: &mut Result<Res, Error>) -> Option<Self::Future> {
        let attempt = self.attempt;

        if !self.classifier.should_retry(response) {
            self.retry_lifecycle.after_success(request, response, attempt);
            return None;
        }

        if attempt >= self.max_attempts {
            self.retry_lifecycle.after_retries_exhausted(request, response, attempt);
            return None;
        }

        let backoff_dur = self.backoff.get_backoff_duration(attempt);
        self.retry_lifecycle.before_retry(request, response, backoff_dur, attempt);
        self.attempt += 1;

        Some(sleep(backoff_dur))
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}
