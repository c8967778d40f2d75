//! HTTP client.

mod client;
pub use self::client::{HttpClient, HttpClientBuilder};

mod telemetry;
pub use self::telemetry::{AttemptTelemetry, AttemptTelemetryLayer};
