//! Broker submission.
//!
//! Serializes a batch to JSON, compresses it when it is large enough, and uploads it to the broker, retrying failed
//! attempts until the submission deadline.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use harvest_config::{
    deser::{EmptyStringAsNone, PermissiveBool},
    GenericConfiguration,
};
use harvest_core::{
    data_model::Batch,
    stats::{SharedStats, SubmissionOutcome},
};
use harvest_error::{ErrorContext as _, GenericError};
use harvest_io::{
    compression::{encode_payload, CompressionScheme, EncodedPayload, DEFAULT_COMPRESSION_THRESHOLD},
    net::{
        client::http::{AttemptTelemetryLayer, HttpClient},
        util::retry::{
            BoundedExponentialBackoffRetryPolicy, ExponentialBackoff, StandardHttpClassifier,
            StandardHttpRetryLifecycle,
        },
    },
};
use harvest_tls::parse_server_name;
use http::{header, HeaderValue, Request, StatusCode, Uri};
use http_body_util::{BodyExt as _, Full};
use rustls::{pki_types::ServerName, RootCertStore};
use serde::Deserialize;
use serde_with::serde_as;
use snafu::{ResultExt as _, Snafu};
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const MIN_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

static CONTENT_TYPE_JSON: HeaderValue = HeaderValue::from_static("application/json");
static USER_AGENT: HeaderValue = HeaderValue::from_static(concat!("kube-harvester/", env!("CARGO_PKG_VERSION")));

const fn default_compression() -> bool {
    true
}

const fn default_compression_threshold_bytes() -> usize {
    DEFAULT_COMPRESSION_THRESHOLD
}

const fn default_submit_deadline_secs() -> u64 {
    50
}

/// Submission configuration.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct SubmissionConfiguration {
    /// URL of the broker endpoint that batches are submitted to.
    ///
    /// When unset, batches can only be written to standard output, with `dry_run`.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub submission_url: Option<String>,

    /// Whether or not to write batches to standard output when no submission URL is set.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub dry_run: bool,

    /// Whether or not payloads larger than `compression_threshold_bytes` are gzip-compressed.
    ///
    /// Defaults to `true`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Payloads at or below this size, in bytes, are always sent uncompressed.
    ///
    /// Defaults to 1024.
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Directory that a copy of every payload is written to, for troubleshooting.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub trace_dir: Option<String>,

    /// Time allowed for a submission, retries included, before it's started over.
    ///
    /// Defaults to 50 seconds.
    #[serde(default = "default_submit_deadline_secs")]
    pub submit_deadline_secs: u64,

    /// PEM bundle of the certificate authorities trusted for the broker, instead of the platform roots.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub broker_ca_file: Option<String>,

    /// Name to verify the broker's certificate against, instead of the host of the submission URL.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub broker_server_name: Option<String>,
}

impl SubmissionConfiguration {
    /// Creates a new `SubmissionConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }
}

impl Default for SubmissionConfiguration {
    fn default() -> Self {
        Self {
            submission_url: None,
            dry_run: false,
            compression: default_compression(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            trace_dir: None,
            submit_deadline_secs: default_submit_deadline_secs(),
            broker_ca_file: None,
            broker_server_name: None,
        }
    }
}

/// Submission errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SubmitError {
    /// No submission URL is configured, and dry-run mode is disabled.
    #[snafu(display("no submission URL configured and dry-run mode disabled"))]
    MissingEndpoint,

    /// The batch could not be serialized.
    #[snafu(display("failed to serialize batch"))]
    Serialization {
        /// Error source.
        source: serde_json::Error,
    },

    /// The payload could not be compressed.
    #[snafu(display("failed to compress payload"))]
    Compress {
        /// Error source.
        source: std::io::Error,
    },

    /// The payload could not be written to standard output.
    #[snafu(display("failed to write payload to stdout"))]
    Stdout {
        /// Error source.
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[snafu(display("failed to build HTTP client"))]
    Client {
        /// Error source.
        source: GenericError,
    },

    /// The request could not be built.
    #[snafu(display("failed to build request"))]
    BuildRequest {
        /// Error source.
        source: http::Error,
    },

    /// The request failed, after exhausting all retries.
    #[snafu(display("failed to send request"))]
    Transport {
        /// Error source.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The broker responded with an unexpected status code, after exhausting all retries.
    #[snafu(display("broker responded with status {}", status))]
    Status {
        /// Response status code.
        status: StatusCode,
    },

    /// The broker's response could not be read.
    #[snafu(display("failed to read response body"))]
    ResponseBody {
        /// Error source.
        source: hyper::Error,
    },

    /// The broker's response could not be decoded.
    #[snafu(display("failed to decode response"))]
    ResponseDecode {
        /// Error source.
        source: serde_json::Error,
    },

    /// The submission was cancelled before it completed.
    #[snafu(display("submission cancelled"))]
    Cancelled,
}

#[derive(Debug, Default, Deserialize)]
struct BrokerResponse {
    #[serde(default)]
    error: String,

    #[serde(default)]
    stats: u64,

    #[serde(default)]
    filtered: u64,
}

/// Submits batches to the broker.
///
/// The HTTP client is built on first use and shared by every subsequent submission. Requests are retried with a bounded
/// exponential backoff, and a submission that runs past its deadline is started over, until it either succeeds, fails
/// with any other error, or is cancelled.
pub struct Submitter {
    endpoint: Option<Uri>,
    dry_run: bool,
    compression: CompressionScheme,
    compression_threshold: usize,
    trace_dir: Option<PathBuf>,
    submit_deadline: Duration,
    ca_file: Option<PathBuf>,
    server_name: Option<ServerName<'static>>,
    root_cert_store: Option<RootCertStore>,
    backoff: ExponentialBackoff,
    stats: SharedStats,
    client: Mutex<Option<HttpClient<Full<Bytes>>>>,
    trace_seq: AtomicU64,
}

impl Submitter {
    /// Creates a new `Submitter` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the submission URL or the broker server name are invalid, an error is returned.
    pub fn new(config: SubmissionConfiguration, stats: SharedStats) -> Result<Self, GenericError> {
        let endpoint = config
            .submission_url
            .as_deref()
            .map(|url| {
                url.parse::<Uri>()
                    .with_error_context(|| format!("Invalid submission URL '{}'.", url))
            })
            .transpose()?;
        let server_name = config
            .broker_server_name
            .as_deref()
            .map(parse_server_name)
            .transpose()?;

        let compression = if config.compression {
            CompressionScheme::gzip_default()
        } else {
            CompressionScheme::noop()
        };

        Ok(Self {
            endpoint,
            dry_run: config.dry_run,
            compression,
            compression_threshold: config.compression_threshold_bytes,
            trace_dir: config.trace_dir.map(PathBuf::from),
            submit_deadline: Duration::from_secs(config.submit_deadline_secs),
            ca_file: config.broker_ca_file.map(PathBuf::from),
            server_name,
            root_cert_store: None,
            backoff: ExponentialBackoff::new(MIN_BACKOFF, MAX_BACKOFF),
            stats,
            client: Mutex::new(None),
            trace_seq: AtomicU64::new(0),
        })
    }

    /// Sets the backoff used between retries.
    ///
    /// Defaults to an exponential backoff between 50 milliseconds and 1 second.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the time allowed for a submission before it's started over.
    pub fn with_submit_deadline(mut self, submit_deadline: Duration) -> Self {
        self.submit_deadline = submit_deadline;
        self
    }

    /// Sets the root certificates trusted for the broker.
    ///
    /// Takes precedence over the platform roots, but not over a configured CA file.
    pub fn with_root_cert_store(mut self, root_cert_store: RootCertStore) -> Self {
        self.root_cert_store = Some(root_cert_store);
        self
    }

    /// Returns the shared submission stats.
    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Submits a batch.
    ///
    /// Empty batches are ignored.
    ///
    /// # Errors
    ///
    /// If the batch could not be delivered, an error is returned. Nothing is recorded in the stats in that case.
    pub async fn submit(&self, batch: &Batch, cancel: &CancellationToken) -> Result<(), SubmitError> {
        if batch.is_empty() {
            debug!("Skipping submission of empty batch.");
            return Ok(());
        }

        let payload = Bytes::from(batch.to_json().context(Serialization)?);

        if let Some(trace_dir) = &self.trace_dir {
            self.write_trace(trace_dir, &payload).await;
        }

        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint,
            None if self.dry_run => return write_stdout(&payload).await,
            None => return MissingEndpoint.fail(),
        };

        let raw_bytes = payload.len() as u64;
        let encoded = encode_payload(self.compression, self.compression_threshold, payload)
            .await
            .context(Compress)?;
        let wire_bytes = encoded.body.len() as u64;

        let mut client = self.client()?;

        let response = loop {
            let request = build_request(endpoint, &encoded)?;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Cancelled.fail(),
                result = tokio::time::timeout(self.submit_deadline, client.send(request)) => match result {
                    Ok(result) => break result.context(Transport)?,
                    Err(_) => {
                        warn!(
                            url = %endpoint,
                            deadline = ?self.submit_deadline,
                            "Submission exceeded its deadline. Starting over."
                        );
                    }
                },
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Status { status }.fail();
        }

        let body = response.into_body().collect().await.context(ResponseBody)?.to_bytes();
        let broker_response = if body.is_empty() {
            BrokerResponse::default()
        } else {
            serde_json::from_slice::<BrokerResponse>(&body).context(ResponseDecode)?
        };

        if !broker_response.error.is_empty() {
            warn!(url = %endpoint, error = %broker_response.error, "Broker reported an error for submitted batch.");
        }

        self.stats.record_submission(SubmissionOutcome {
            sent: batch.len() as u64,
            received: broker_response.stats,
            broker_filtered: broker_response.filtered,
            raw_bytes,
            wire_bytes,
        });

        debug!(
            url = %endpoint,
            sent = batch.len(),
            received = broker_response.stats,
            filtered = broker_response.filtered,
            raw_bytes,
            wire_bytes,
            "Submitted batch."
        );

        Ok(())
    }

    fn client(&self) -> Result<HttpClient<Full<Bytes>>, SubmitError> {
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }

        let built = self.build_client().context(Client)?;
        *client = Some(built.clone());
        Ok(built)
    }

    fn build_client(&self) -> Result<HttpClient<Full<Bytes>>, GenericError> {
        let retry_policy = BoundedExponentialBackoffRetryPolicy::new(
            StandardHttpClassifier,
            StandardHttpRetryLifecycle,
            self.backoff.clone(),
        )
        .with_max_attempts(MAX_ATTEMPTS);

        let mut builder = HttpClient::builder()
            .with_request_timeout(REQUEST_TIMEOUT)
            .with_attempt_telemetry(AttemptTelemetryLayer::new());

        if let Some(root_cert_store) = self.root_cert_store.clone() {
            builder = builder.with_tls_config(|tls| tls.with_root_cert_store(root_cert_store));
        }
        if let Some(ca_file) = self.ca_file.clone() {
            builder = builder.with_tls_config(|tls| tls.with_ca_file(ca_file));
        }
        if let Some(server_name) = self.server_name.clone() {
            builder = builder.with_server_name(server_name);
        }

        builder.with_retry_policy(retry_policy).build()
    }

    async fn write_trace(&self, trace_dir: &Path, payload: &Bytes) {
        let seq = self.trace_seq.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{}_{}.json", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"), seq);
        let path = trace_dir.join(file_name);

        if let Err(e) = tokio::fs::write(&path, payload).await {
            error!(path = %path.display(), error = %e, "Failed to write trace file.");
        }
    }
}

fn build_request(endpoint: &Uri, encoded: &EncodedPayload) -> Result<Request<Full<Bytes>>, SubmitError> {
    let mut builder = Request::put(endpoint.clone())
        .header(header::CONTENT_TYPE, CONTENT_TYPE_JSON.clone())
        .header(header::USER_AGENT, USER_AGENT.clone())
        .header(header::CONTENT_LENGTH, encoded.body.len());

    if let Some(content_encoding) = &encoded.content_encoding {
        builder = builder.header(header::CONTENT_ENCODING, content_encoding.clone());
    }

    builder.body(Full::new(encoded.body.clone())).context(BuildRequest)
}

async fn write_stdout(payload: &[u8]) -> Result<(), SubmitError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(payload).await.context(Stdout)?;
    stdout.write_all(b"\n").await.context(Stdout)?;
    stdout.flush().await.context(Stdout)
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        net::SocketAddr,
        sync::{atomic::AtomicUsize, Arc},
    };

    use async_compression::tokio::bufread::GzipDecoder;
    use harvest_core::data_model::{MetricSample, MetricValue};
    use hyper::{body::Incoming, server::conn::http1, service::service_fn, Response};
    use hyper_util::rt::TokioIo;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tokio::{io::AsyncReadExt as _, net::TcpListener};

    use super::*;

    #[derive(Clone, Debug)]
    struct ReceivedRequest {
        content_encoding: Option<String>,
        content_type: Option<String>,
        body: Bytes,
    }

    #[derive(Clone, Default)]
    struct Broker {
        requests: Arc<Mutex<Vec<ReceivedRequest>>>,
        hits: Arc<AtomicUsize>,
    }

    impl Broker {
        fn requests(&self) -> Vec<ReceivedRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    /// Spawns a broker that fails the first `failures` requests with `503 Service Unavailable`, and stalls for
    /// `stall` on the first request.
    async fn spawn_broker(failures: usize, stall: Option<Duration>) -> (SocketAddr, Broker) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::default();

        let state = broker.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move {
                            let hit = state.hits.fetch_add(1, Ordering::SeqCst);
                            if hit == 0 {
                                if let Some(stall) = stall {
                                    tokio::time::sleep(stall).await;
                                }
                            }

                            let header_str = |name: header::HeaderName| {
                                req.headers()
                                    .get(name)
                                    .map(|v: &HeaderValue| v.to_str().unwrap().to_string())
                            };
                            let content_encoding = header_str(header::CONTENT_ENCODING);
                            let content_type = header_str(header::CONTENT_TYPE);
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            state.requests.lock().unwrap().push(ReceivedRequest {
                                content_encoding,
                                content_type,
                                body,
                            });

                            let response = if hit < failures {
                                Response::builder()
                                    .status(StatusCode::SERVICE_UNAVAILABLE)
                                    .body(Full::new(Bytes::new()))
                                    .unwrap()
                            } else {
                                Response::new(Full::new(Bytes::from_static(
                                    br#"{"error":"","stats":3,"filtered":1}"#,
                                )))
                            };
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        (addr, broker)
    }

    fn submitter(addr: Option<SocketAddr>, stats: SharedStats) -> Submitter {
        let config = SubmissionConfiguration {
            submission_url: addr.map(|addr| format!("http://{}/module/prometheus/abc", addr)),
            ..Default::default()
        };

        Submitter::new(config, stats)
            .unwrap()
            .with_root_cert_store(RootCertStore::empty())
            .with_backoff(ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5)))
    }

    /// Builds a batch with `count` samples whose serialized form is roughly `count * 60` bytes.
    fn batch(count: usize) -> Batch {
        let mut batch = Batch::new();
        for i in 0..count {
            batch.insert(
                format!("kube_pod_status_ready|ST[pod:web-{}]", i),
                MetricSample::new(MetricValue::Float64(1.0), Some(1_700_000_000_000)),
            );
        }
        batch
    }

    async fn gunzip(body: &[u8]) -> Vec<u8> {
        let mut decoded = Vec::new();
        GzipDecoder::new(body).read_to_end(&mut decoded).await.unwrap();
        decoded
    }

    #[tokio::test]
    async fn retries_until_success() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let (addr, broker) = spawn_broker(5, None).await;
        let stats = SharedStats::new();
        let submitter = submitter(Some(addr), stats.clone());

        submitter.submit(&batch(3), &CancellationToken::new()).await.unwrap();

        assert_eq!(broker.hits(), 6);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.received, 3);
        assert_eq!(snapshot.broker_filtered, 1);

        let attempt_errors = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| match (key.key().name(), value) {
                ("submission_attempt_errors_total", DebugValue::Counter(count)) => Some(count),
                _ => None,
            });
        assert_eq!(attempt_errors, Some(5));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (addr, broker) = spawn_broker(usize::MAX, None).await;
        let stats = SharedStats::new();
        let submitter = submitter(Some(addr), stats.clone());

        let error = submitter.submit(&batch(1), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            error,
            SubmitError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE
            }
        ));
        assert_eq!(broker.hits(), MAX_ATTEMPTS as usize);
        assert_eq!(stats.snapshot().sent, 0);
    }

    #[tokio::test]
    async fn small_payloads_are_not_compressed() {
        let (addr, broker) = spawn_broker(0, None).await;
        let stats = SharedStats::new();
        let submitter = submitter(Some(addr), stats.clone());

        let batch = batch(3);
        let raw = batch.to_json().unwrap();
        assert!(raw.len() < DEFAULT_COMPRESSION_THRESHOLD);

        submitter.submit(&batch, &CancellationToken::new()).await.unwrap();

        let requests = broker.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].content_encoding, None);
        assert_eq!(requests[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(&requests[0].body[..], &raw[..]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent_bytes, raw.len() as u64);
        assert_eq!(snapshot.sent_bytes_wire, raw.len() as u64);
    }

    #[tokio::test]
    async fn large_payloads_are_compressed() {
        let (addr, broker) = spawn_broker(0, None).await;
        let stats = SharedStats::new();
        let submitter = submitter(Some(addr), stats.clone());

        let batch = batch(40);
        let raw = batch.to_json().unwrap();
        assert!(raw.len() > DEFAULT_COMPRESSION_THRESHOLD);

        submitter.submit(&batch, &CancellationToken::new()).await.unwrap();

        let requests = broker.requests();
        assert_eq!(requests[0].content_encoding.as_deref(), Some("gzip"));
        assert_eq!(gunzip(&requests[0].body).await, raw);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent_bytes, raw.len() as u64);
        assert_eq!(snapshot.sent_bytes_wire, requests[0].body.len() as u64);
        assert!(snapshot.sent_bytes_wire < snapshot.sent_bytes);
    }

    #[tokio::test]
    async fn deadline_restarts_submission() {
        let (addr, broker) = spawn_broker(0, Some(Duration::from_secs(5))).await;
        let stats = SharedStats::new();
        let submitter = submitter(Some(addr), stats.clone()).with_submit_deadline(Duration::from_millis(200));

        submitter.submit(&batch(2), &CancellationToken::new()).await.unwrap();

        assert_eq!(broker.hits(), 2);
        assert_eq!(stats.snapshot().sent, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_submission() {
        let (addr, broker) = spawn_broker(0, None).await;
        let submitter = submitter(Some(addr), SharedStats::new());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = submitter.submit(&batch(2), &cancel).await.unwrap_err();
        assert!(matches!(error, SubmitError::Cancelled));
        assert_eq!(broker.hits(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let stats = SharedStats::new();
        let submitter = submitter(None, stats.clone());

        submitter.submit(&Batch::new(), &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.snapshot(), Default::default());
    }

    #[tokio::test]
    async fn missing_endpoint() {
        let submitter = submitter(None, SharedStats::new());

        let error = submitter.submit(&batch(1), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, SubmitError::MissingEndpoint));
    }

    #[tokio::test]
    async fn dry_run_writes_trace_files() {
        let trace_dir = tempfile::tempdir().unwrap();
        let config = SubmissionConfiguration {
            dry_run: true,
            trace_dir: Some(trace_dir.path().display().to_string()),
            ..Default::default()
        };
        let stats = SharedStats::new();
        let submitter = Submitter::new(config, stats.clone()).unwrap();

        let batch = batch(2);
        submitter.submit(&batch, &CancellationToken::new()).await.unwrap();
        submitter.submit(&batch, &CancellationToken::new()).await.unwrap();

        let mut traces = std::fs::read_dir(trace_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect::<Vec<_>>();
        traces.sort();

        assert_eq!(traces.len(), 2);
        assert!(traces[0].display().to_string().ends_with("_0.json"));
        assert_eq!(std::fs::read(&traces[1]).unwrap(), batch.to_json().unwrap());

        // Dry runs never reach the broker, so nothing is recorded.
        assert_eq!(stats.snapshot().sent, 0);
    }

    #[test]
    fn configuration_defaults() {
        let config = serde_json::from_str::<SubmissionConfiguration>(r#"{"submission_url":"","dry_run":"true"}"#)
            .unwrap();

        assert_eq!(config.submission_url, None);
        assert!(config.dry_run);
        assert!(config.compression);
        assert_eq!(config.compression_threshold_bytes, 1024);
        assert_eq!(config.submit_deadline_secs, 50);
    }

    #[test]
    fn invalid_submission_url() {
        let config = SubmissionConfiguration {
            submission_url: Some("http://exa mple.com/".to_string()),
            ..Default::default()
        };
        assert!(Submitter::new(config, SharedStats::new()).is_err());
    }
}
