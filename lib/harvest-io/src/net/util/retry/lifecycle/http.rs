use std::{borrow::Cow, error::Error as _, fmt, time::Duration};

use http::StatusCode;
use tower::BoxError;
use tracing::{debug, error, warn};

use super::RetryLifecycle;

/// A standard HTTP retry lifecycle that emits contextual information about HTTP requests and responses.
///
/// Every retry is logged at warning level with the request URI and a categorized description of the failure, which
/// digs through nested errors to surface DNS, connection, TLS, and timeout failures.
#[derive(Clone, Debug)]
pub struct StandardHttpRetryLifecycle;

impl<B, B2, E> RetryLifecycle<http::Request<B>, http::Response<B2>, E> for StandardHttpRetryLifecycle
where
    E: DynError,
{
    fn before_retry(
        &self, req: &http::Request<B>, res: &Result<http::Response<B2>, E>, retry_backoff: Duration, attempt: u32,
    ) {
        let url = SanitizedRequestUri(req.uri());
        let categorized_error = CategorizedError::try_categorize(res);

        warn!(attempt, %url, "{} Retrying after {:?}.", categorized_error, retry_backoff);
    }

    fn after_success(&self, req: &http::Request<B>, _: &Result<http::Response<B2>, E>, attempt: u32) {
        let url = SanitizedRequestUri(req.uri());
        debug!(attempt, %url, "Request succeeded.");
    }

    fn after_retries_exhausted(&self, req: &http::Request<B>, res: &Result<http::Response<B2>, E>, attempt: u32) {
        let url = SanitizedRequestUri(req.uri());
        let categorized_error = CategorizedError::try_categorize(res);

        error!(attempt, %url, "{} Giving up after {} attempts.", categorized_error, attempt);
    }
}

struct SanitizedRequestUri<'a>(&'a http::Uri);

impl fmt::Display for SanitizedRequestUri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials and query parameters are left out.
        if let (Some(scheme), Some(host)) = (self.0.scheme_str(), self.0.host()) {
            write!(f, "{}://{}", scheme, host)?;
            if let Some(port) = self.0.port_u16() {
                write!(f, ":{}", port)?;
            }
        }

        write!(f, "{}", self.0.path())
    }
}

enum CategorizedError {
    Client(String),
    Tls(String),
    Timeout,
    Http(StatusCode),
    Other(String),
}

impl CategorizedError {
    fn try_categorize<B, E>(res: &Result<http::Response<B>, E>) -> Self
    where
        E: DynError,
    {
        match res {
            Ok(resp) => Self::Http(resp.status()),
            Err(e) => Self::extract_nested(e.as_dyn_error()),
        }
    }

    fn extract_nested(error: &(dyn std::error::Error + 'static)) -> Self {
        if error.is::<tower::timeout::error::Elapsed>() {
            return Self::Timeout;
        }

        if let Some(hyper_error) = error.downcast_ref::<hyper_util::client::legacy::Error>() {
            return match hyper_error.source() {
                Some(source) => Self::extract_nested(source),
                None => Self::Client(hyper_error.to_string()),
            };
        }

        if let Some(rustls_error) = error.downcast_ref::<rustls::Error>() {
            return Self::from_rustls(rustls_error);
        }

        // An I/O error may be standalone, or may be wrapping something more specific.
        if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
            return match io_error.get_ref() {
                Some(source) => Self::extract_nested(source),
                None => Self::Other(io_error.to_string()),
            };
        }

        Self::Other(error.to_string())
    }

    fn from_rustls(error: &rustls::Error) -> Self {
        let reason = match error {
            rustls::Error::InvalidCertificate(cert_error) => format!(
                "peer certificate is invalid: {}",
                rustls_cert_error_to_string(cert_error)
            ),
            _ => error.to_string(),
        };

        Self::Tls(reason)
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategorizedError::Client(reason) => write!(f, "Request failed due to a client error: {}.", reason),
            CategorizedError::Tls(reason) => write!(f, "Request failed due to a TLS error: {}.", reason),
            CategorizedError::Timeout => write!(f, "Request timed out."),
            CategorizedError::Http(status_code) => write!(
                f,
                "Broker responded with non-success status code {}.",
                status_code.as_str()
            ),
            CategorizedError::Other(reason) => write!(f, "Request failed: {}.", reason),
        }
    }
}

fn rustls_cert_error_to_string(cert_error: &rustls::CertificateError) -> Cow<'static, str> {
    match cert_error {
        rustls::CertificateError::BadEncoding => "certificate incorrectly encoded".into(),
        rustls::CertificateError::Expired => "certificate expired (current time is after notAfter time)".into(),
        rustls::CertificateError::NotValidYet => {
            "certificate not valid yet (current time is before notBefore time)".into()
        }
        rustls::CertificateError::Revoked => "certificate has been revoked".into(),
        rustls::CertificateError::UnknownIssuer => "certificate chain is not issued by a known root certificate".into(),
        rustls::CertificateError::BadSignature => {
            "certificate is not signed correctly by the key of its alleged issuer".into()
        }
        rustls::CertificateError::NotValidForName => "certificate is not valid for the broker's name".into(),
        rustls::CertificateError::Other(other) => format!("generic error: {}", other).into(),
        other => format!("generic unhandled error: {:?}", other).into(),
    }
}

/// Errors that can be viewed as a dynamically-dispatched [`std::error::Error`] for downcasting.
pub trait DynError {
    /// Returns this error as a trait object.
    fn as_dyn_error(&self) -> &(dyn std::error::Error + 'static);
}

impl DynError for BoxError {
    fn as_dyn_error(&self) -> &(dyn std::error::Error + 'static) {
        &**self
    }
}
