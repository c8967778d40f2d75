use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use harvest_error::GenericError;
use harvest_tls::ClientTLSConfigBuilder;
use http::{Request, Response};
use hyper::body::{Body, Incoming};
use hyper_rustls::{FixedServerNameResolver, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Builder},
    rt::{TokioExecutor, TokioTimer},
};
use rustls::pki_types::ServerName;
use tower::{
    retry::Policy, timeout::TimeoutLayer, util::BoxCloneService, BoxError, Service, ServiceBuilder, ServiceExt as _,
};

use super::AttemptTelemetryLayer;
use crate::net::util::retry::NoopRetryPolicy;

/// An HTTP client.
#[derive(Clone)]
pub struct HttpClient<B = ()> {
    inner: BoxCloneService<Request<B>, Response<Incoming>, BoxError>,
}

impl HttpClient<()> {
    /// Creates a new builder for configuring an HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }
}

impl<B> HttpClient<B>
where
    B: Body + Send + 'static,
{
    /// Sends a request to the server, and waits for a response.
    ///
    /// Retries and per-attempt timeouts, if configured, happen within this call.
    ///
    /// # Errors
    ///
    /// If the request could not be sent, or it timed out, an error will be returned.
    pub async fn send(&mut self, req: Request<B>) -> Result<Response<Incoming>, BoxError> {
        self.inner.ready().await?.call(req).await
    }
}

impl<B> Service<Request<B>> for HttpClient<B>
where
    B: Body + Send + 'static,
{
    type Response = Response<Incoming>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        self.inner.call(req)
    }
}

/// An HTTP client builder.
///
/// # Defaults
///
/// - support for both HTTP and HTTPS (uses platform's root certificates for server certificate validation)
/// - HTTP/1.1 only
/// - 30 second connect timeout, 60 second per-request timeout
/// - no connection reuse: idle connections are never pooled, so every request opens a fresh connection
#[derive(Clone)]
pub struct HttpClientBuilder<P = NoopRetryPolicy> {
    hyper_builder: Builder,
    tls_builder: ClientTLSConfigBuilder,
    server_name: Option<ServerName<'static>>,
    connect_timeout: Duration,
    retry_policy: P,
    request_timeout: Option<Duration>,
    attempt_telemetry: Option<AttemptTelemetryLayer>,
}

impl<P> HttpClientBuilder<P> {
    /// Sets the timeout when connecting to the remote host.
    ///
    /// Defaults to 30 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    ///
    /// The request timeout applies to each individual request made to the remote host, including each request made when
    /// retrying a failed request.
    ///
    /// Defaults to 60 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of idle connections per host.
    ///
    /// Defaults to 0, which disables connection reuse.
    pub fn with_max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.hyper_builder.pool_max_idle_per_host(max);
        self
    }

    /// Sets the retry policy to use when sending requests.
    ///
    /// Defaults to no retry policy. (i.e. requests are not retried)
    pub fn with_retry_policy<P2>(self, retry_policy: P2) -> HttpClientBuilder<P2> {
        HttpClientBuilder {
            hyper_builder: self.hyper_builder,
            tls_builder: self.tls_builder,
            server_name: self.server_name,
            connect_timeout: self.connect_timeout,
            retry_policy,
            request_timeout: self.request_timeout,
            attempt_telemetry: self.attempt_telemetry,
        }
    }

    /// Enables per-attempt telemetry.
    ///
    /// See [`AttemptTelemetryLayer`] for more information.
    pub fn with_attempt_telemetry(mut self, layer: AttemptTelemetryLayer) -> Self {
        self.attempt_telemetry = Some(layer);
        self
    }

    /// Sets the TLS configuration.
    pub fn with_tls_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ClientTLSConfigBuilder) -> ClientTLSConfigBuilder,
    {
        self.tls_builder = f(self.tls_builder);
        self
    }

    /// Sets the name to verify server certificates against, instead of the host of each request.
    pub fn with_server_name(mut self, server_name: ServerName<'static>) -> Self {
        self.server_name = Some(server_name);
        self
    }

    /// Builds the `HttpClient`.
    ///
    /// # Errors
    ///
    /// If there was an error building the TLS configuration for the client, an error will be returned.
    pub fn build<B>(self) -> Result<HttpClient<B>, GenericError>
    where
        B: Body + Clone + Unpin + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
        P: Policy<Request<B>, Response<Incoming>, BoxError> + Send + Clone + 'static,
        P::Future: Send,
    {
        let tls_config = self.tls_builder.build()?;

        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(self.connect_timeout));
        http_connector.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http();
        let connector = match self.server_name {
            Some(server_name) => connector
                .with_server_name_resolver(FixedServerNameResolver::new(server_name))
                .enable_http1()
                .wrap_connector(http_connector),
            None => connector.enable_http1().wrap_connector(http_connector),
        };

        let client = self.hyper_builder.build(connector);

        let inner = ServiceBuilder::new()
            .retry(self.retry_policy)
            .option_layer(self.attempt_telemetry)
            .option_layer(self.request_timeout.map(TimeoutLayer::new))
            .service(client.map_err(BoxError::from))
            .boxed_clone();

        Ok(HttpClient { inner })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        let mut hyper_builder = Builder::new(TokioExecutor::new());
        hyper_builder.pool_timer(TokioTimer::new()).pool_max_idle_per_host(0);

        Self {
            hyper_builder,
            tls_builder: ClientTLSConfigBuilder::new(),
            server_name: None,
            connect_timeout: Duration::from_secs(30),
            retry_policy: NoopRetryPolicy,
            request_timeout: Some(Duration::from_secs(60)),
            attempt_telemetry: None,
        }
    }
}
