//! Retry primitives for HTTP requests.

mod backoff;
pub use self::backoff::ExponentialBackoff;

mod classifier;
pub use self::classifier::{RetryClassifier, StandardHttpClassifier};

mod lifecycle;
pub use self::lifecycle::{RetryLifecycle, StandardHttpRetryLifecycle};

mod policy;
pub use self::policy::{BoundedExponentialBackoffRetryPolicy, NoopRetryPolicy};
