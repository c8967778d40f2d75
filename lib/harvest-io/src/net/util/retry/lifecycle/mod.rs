use std::time::Duration;

mod http;
pub use self::http::StandardHttpRetryLifecycle;

/// Hooks invoked by a retry policy as it classifies responses.
pub trait RetryLifecycle<Req, Res, Error> {
    /// Called before a request is retried.
    fn before_retry(&self, req: &Req, res: &Result<Res, Error>, retry_backoff: Duration, attempt: u32);

    /// Called when a request is classified as successful.
    fn after_success(&self, req: &Req, res: &Result<Res, Error>, attempt: u32);

    /// Called when a request failed and no retry attempts remain.
    fn after_retries_exhausted(&self, req: &Req, res: &Result<Res, Error>, attempt: u32);
}
