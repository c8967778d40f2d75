use http::StatusCode;

use super::RetryClassifier;

/// A standard HTTP response classifier.
///
/// The broker acknowledges a submission with `200 OK` and nothing else, so every other status code is treated as
/// retryable, as are all transport errors.
#[derive(Clone, Debug)]
pub struct StandardHttpClassifier;

impl<B, Error> RetryClassifier<http::Response<B>, Error> for StandardHttpClassifier {
    fn should_retry(&self, response: &Result<http::Response<B>, Error>) -> bool {
        match response {
            Ok(resp) => resp.status() != StatusCode::OK,
            Err(_) => true,
        }
    }
}
