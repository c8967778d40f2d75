use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Instant,
};

use http::{Request, Response, StatusCode};
use metrics::{Counter, Histogram};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

/// Records telemetry for every individual HTTP attempt.
///
/// Placed beneath the retry layer, this sees each attempt separately, including those that end up being retried.
///
/// ## Metrics
///
/// - `submission_attempt_latency_seconds`: a histogram of the time taken by each attempt, whatever its outcome.
/// - `submission_attempt_errors_total`: the number of attempts that failed, either because the request could not be
///   sent or because the response status was anything other than `200 OK`.
#[derive(Clone)]
pub struct AttemptTelemetryLayer {
    latency: Histogram,
    errors: Counter,
}

impl AttemptTelemetryLayer {
    /// Creates a new `AttemptTelemetryLayer`, registering its metrics with the global recorder.
    pub fn new() -> Self {
        Self {
            latency: metrics::histogram!("submission_attempt_latency_seconds"),
            errors: metrics::counter!("submission_attempt_errors_total"),
        }
    }
}

impl Default for AttemptTelemetryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for AttemptTelemetryLayer {
    type Service = AttemptTelemetry<S>;

    fn layer(&self, service: S) -> Self::Service {
        AttemptTelemetry {
            service,
            latency: self.latency.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Records telemetry for every individual HTTP attempt.
#[derive(Clone)]
pub struct AttemptTelemetry<S> {
    service: S,
    latency: Histogram,
    errors: Counter,
}

impl<B, B2, S> Service<Request<B>> for AttemptTelemetry<S>
where
    S: Service<Request<B>, Response = Response<B2>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = AttemptTelemetryFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        AttemptTelemetryFuture {
            latency: self.latency.clone(),
            errors: self.errors.clone(),
            started: Instant::now(),
            fut: self.service.call(req),
        }
    }
}

pin_project! {
    /// Response future from [`AttemptTelemetry`] services.
    pub struct AttemptTelemetryFuture<F> {
        latency: Histogram,
        errors: Counter,
        started: Instant,

        #[pin]
        fut: F,
    }
}

impl<F, B, E> Future for AttemptTelemetryFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.fut.poll(cx));

        this.latency.record(this.started.elapsed().as_secs_f64());
        let failed = match &result {
            Ok(response) => response.status() != StatusCode::OK,
            Err(_) => true,
        };
        if failed {
            this.errors.increment(1);
        }

        Poll::Ready(result)
    }
}
