//! Prometheus scrape source.
//!
//! Scrapes endpoints exposing metrics in the Prometheus text exposition format, translates them into a batch, and
//! submits it.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use harvest_config::{deser::PermissiveBool, GenericConfiguration};
use harvest_context::{Tag, TagList};
use harvest_core::{
    collector::{CollectionLease, Collector, CycleContext},
    data_model::Batch,
};
use harvest_error::{generic_error, ErrorContext as _, GenericError};
use harvest_io::net::client::http::{HttpClient, HttpClientBuilder};
use http::{header, HeaderValue, Request, StatusCode, Uri};
use http_body_util::{BodyExt as _, Empty};
use serde::Deserialize;
use serde_with::serde_as;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    common::writer::MetricWriter,
    destinations::submission::{SubmitError, Submitter},
};

mod translator;
pub use self::translator::{reduce_histogram, translate, HistogramMode, TranslateError, TranslateOptions, TranslateSummary};

const SCRAPE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SCRAPE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static ACCEPT_TEXT: HeaderValue = HeaderValue::from_static("text/plain;version=0.0.4");

const fn default_collection_interval_secs() -> u64 {
    60
}

/// A scraped endpoint.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct EndpointConfiguration {
    /// Identifier of the endpoint, used in logs.
    pub id: String,

    /// URL of the endpoint.
    pub url: String,

    /// Comma-separated `category:value` tags added to the stream tags of every metric from this endpoint.
    #[serde(default)]
    pub tags: String,

    /// Whether or not the endpoint was discovered dynamically, such as through pod annotations.
    ///
    /// Metrics from dynamic endpoints bypass the metric filter unless `filter_dynamic` is set.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub dynamic: bool,
}

/// Collector configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct CollectorConfiguration {
    /// Time between collection cycles, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,

    /// Endpoints to scrape.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfiguration>,

    /// Name of the cluster, added as a `cluster` tag to every metric.
    #[serde(default)]
    pub cluster_name: String,

    /// How histograms are translated.
    #[serde(default)]
    pub histogram_mode: HistogramMode,
}

impl CollectorConfiguration {
    /// Creates a new `CollectorConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Returns the time between collection cycles.
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs.max(1))
    }

    /// Builds a collector for every configured endpoint.
    ///
    /// # Errors
    ///
    /// If any endpoint URL is invalid, an error is returned.
    pub fn build_collectors(
        &self, client: &HttpClient<Empty<Bytes>>, writer: &MetricWriter, submitter: &Arc<Submitter>,
    ) -> Result<Vec<Arc<dyn Collector>>, GenericError> {
        let mut collectors = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let collector = EndpointCollector::new(
                endpoint,
                &self.cluster_name,
                self.histogram_mode,
                client.clone(),
                writer.clone(),
                Arc::clone(submitter),
            )?;
            collectors.push(Arc::new(collector) as Arc<dyn Collector>);
        }

        Ok(collectors)
    }
}

/// Returns a builder for the HTTP client used to scrape endpoints.
///
/// Scrapes aren't retried: a failed scrape is tried again on the next cycle.
pub fn scrape_client_builder() -> HttpClientBuilder {
    HttpClient::builder()
        .with_connect_timeout(SCRAPE_CONNECT_TIMEOUT)
        .with_request_timeout(SCRAPE_REQUEST_TIMEOUT)
}

/// Collects metrics from a single Prometheus endpoint.
pub struct EndpointCollector {
    id: String,
    url: Uri,
    base_tags: TagList,
    dynamic: bool,
    histogram_mode: HistogramMode,
    client: Mutex<HttpClient<Empty<Bytes>>>,
    writer: MetricWriter,
    submitter: Arc<Submitter>,
    lease: CollectionLease,
}

impl EndpointCollector {
    /// Creates a new `EndpointCollector`.
    ///
    /// # Errors
    ///
    /// If the endpoint URL is invalid, an error is returned.
    pub fn new(
        endpoint: &EndpointConfiguration, cluster_name: &str, histogram_mode: HistogramMode,
        client: HttpClient<Empty<Bytes>>, writer: MetricWriter, submitter: Arc<Submitter>,
    ) -> Result<Self, GenericError> {
        let url = endpoint
            .url
            .parse::<Uri>()
            .with_error_context(|| format!("Invalid URL '{}' for endpoint '{}'.", endpoint.url, endpoint.id))?;

        let mut base_tags = TagList::from_delimited(&endpoint.tags);
        if !cluster_name.is_empty() {
            base_tags.insert(Tag::new("cluster", cluster_name));
        }

        Ok(Self {
            id: endpoint.id.clone(),
            url,
            base_tags,
            dynamic: endpoint.dynamic,
            histogram_mode,
            client: Mutex::new(client),
            writer,
            submitter,
            lease: CollectionLease::new(),
        })
    }

    /// Returns the lease guarding collections from this endpoint.
    pub fn lease(&self) -> &CollectionLease {
        &self.lease
    }

    async fn scrape(&self, cancel: &CancellationToken) -> Result<Option<Bytes>, GenericError> {
        let request = Request::get(self.url.clone())
            .header(header::ACCEPT, ACCEPT_TEXT.clone())
            .body(Empty::new())
            .error_context("Failed to build scrape request.")?;

        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner).clone();

        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(None),
            result = client.send(request) => result
                .map_err(|e| generic_error!(e))
                .with_error_context(|| format!("Failed to scrape '{}'.", self.url))?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(generic_error!(
                "Endpoint '{}' responded with status {}.",
                self.url,
                status
            ));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .with_error_context(|| format!("Failed to read scrape response from '{}'.", self.url))?
            .to_bytes();

        Ok(Some(body))
    }
}

#[async_trait]
impl Collector for EndpointCollector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn collect(&self, context: CycleContext) -> Result<(), GenericError> {
        let Some(_lease) = self.lease.try_acquire() else {
            warn!(source = %self.id, "Previous collection still running. Skipping.");
            return Ok(());
        };

        let cancel = context.cancel_token();
        let body = match self.scrape(cancel).await? {
            Some(body) => body,
            None => {
                debug!(source = %self.id, "Scrape cancelled.");
                return Ok(());
            }
        };
        let input = std::str::from_utf8(&body)
            .with_error_context(|| format!("Response from '{}' is not valid UTF-8.", self.url))?;

        let options = TranslateOptions::new(context.timestamp_ms())
            .with_histogram_mode(self.histogram_mode)
            .with_dynamic(self.dynamic);

        let mut batch = Batch::new();
        let summary = translate(input, &self.base_tags, &self.writer, &mut batch, &options, cancel)
            .with_error_context(|| format!("Failed to translate metrics from '{}'.", self.url))?;
        if summary.cancelled {
            debug!(source = %self.id, "Translation cancelled.");
            return Ok(());
        }

        debug!(
            source = %self.id,
            families = summary.families,
            samples = summary.samples,
            written = summary.written,
            skipped = summary.skipped,
            rejected = summary.rejected,
            "Translated metrics."
        );

        match self.submitter.submit(&batch, cancel).await {
            Ok(()) => Ok(()),
            Err(SubmitError::Cancelled) => {
                debug!(source = %self.id, "Submission cancelled.");
                Ok(())
            }
            Err(e) => Err(e).with_error_context(|| format!("Failed to submit metrics from '{}'.", self.id)),
        }
    }
}
