//! Payload compression.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use async_compression::{tokio::write::GzipEncoder, Level};
use bytes::Bytes;
use http::HeaderValue;
use pin_project::pin_project;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};

static CONTENT_ENCODING_GZIP: HeaderValue = HeaderValue::from_static("gzip");

/// Payloads at or below this size, in bytes, are sent uncompressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Compression schemes supported by `Compressor`.
#[derive(Copy, Clone, Debug)]
pub enum CompressionScheme {
    /// No compression.
    Noop,

    /// Gzip.
    Gzip(Level),
}

impl CompressionScheme {
    /// No compression.
    pub const fn noop() -> Self {
        Self::Noop
    }

    /// Gzip compression, using the default compression level.
    pub const fn gzip_default() -> Self {
        Self::Gzip(Level::Default)
    }
}

/// Generic compressor.
///
/// Wraps a writer, compressing everything written through it according to the configured `CompressionScheme`.
#[pin_project(project = CompressorProjected)]
pub enum Compressor<W: AsyncWrite> {
    /// No-op compressor.
    Noop(#[pin] W),

    /// Gzip compressor.
    Gzip(#[pin] GzipEncoder<W>),
}

impl<W: AsyncWrite> Compressor<W> {
    /// Creates a new compressor from a given compression scheme and writer.
    pub fn from_scheme(scheme: CompressionScheme, writer: W) -> Self {
        match scheme {
            CompressionScheme::Noop => Self::Noop(writer),
            CompressionScheme::Gzip(level) => Self::Gzip(GzipEncoder::with_quality(writer, level)),
        }
    }

    /// Consumes the compressor, returning the inner writer.
    pub fn into_inner(self) -> W {
        match self {
            Self::Noop(writer) => writer,
            Self::Gzip(encoder) => encoder.into_inner(),
        }
    }

    /// Returns the content encoding for this compressor.
    pub fn content_encoding(&self) -> Option<HeaderValue> {
        match self {
            Self::Noop(_) => None,
            Self::Gzip(_) => Some(CONTENT_ENCODING_GZIP.clone()),
        }
    }
}

impl<W: AsyncWrite> AsyncWrite for Compressor<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        match self.project() {
            CompressorProjected::Noop(writer) => writer.poll_write(cx, buf),
            CompressorProjected::Gzip(encoder) => encoder.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.project() {
            CompressorProjected::Noop(writer) => writer.poll_flush(cx),
            CompressorProjected::Gzip(encoder) => encoder.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.project() {
            CompressorProjected::Noop(writer) => writer.poll_shutdown(cx),
            CompressorProjected::Gzip(encoder) => encoder.poll_shutdown(cx),
        }
    }
}

/// A request body, ready to be sent.
#[derive(Clone, Debug)]
pub struct EncodedPayload {
    /// The body, possibly compressed.
    pub body: Bytes,

    /// The value of the `Content-Encoding` header to send alongside the body, if any.
    pub content_encoding: Option<HeaderValue>,
}

/// Encodes a payload for transmission.
///
/// When `scheme` is a compressing scheme and the payload is larger than `threshold` bytes, the payload is compressed.
/// Otherwise, it is passed through as-is.
///
/// # Errors
///
/// If compression fails, an error is returned.
pub async fn encode_payload(
    scheme: CompressionScheme, threshold: usize, payload: Bytes,
) -> Result<EncodedPayload, io::Error> {
    let scheme = if payload.len() > threshold {
        scheme
    } else {
        CompressionScheme::Noop
    };

    if let CompressionScheme::Noop = scheme {
        return Ok(EncodedPayload {
            body: payload,
            content_encoding: None,
        });
    }

    let mut compressor = Compressor::from_scheme(scheme, Vec::with_capacity(payload.len() / 4));
    let content_encoding = compressor.content_encoding();
    compressor.write_all(&payload).await?;
    compressor.shutdown().await?;

    Ok(EncodedPayload {
        body: Bytes::from(compressor.into_inner()),
        content_encoding,
    })
}

#[cfg(test)]
mod tests {
    use async_compression::tokio::bufread::GzipDecoder;
    use tokio::io::AsyncReadExt as _;

    use super::*;

    fn payload_of_len(len: usize) -> Bytes {
        let unit = br#"{"some_metric|ST[env:prod]":{"_type":"n","_value":1.5}}"#;
        unit.iter().copied().cycle().take(len).collect::<Vec<u8>>().into()
    }

    #[tokio::test]
    async fn small_payload_is_not_compressed() {
        let payload = payload_of_len(200);
        let encoded = encode_payload(CompressionScheme::gzip_default(), DEFAULT_COMPRESSION_THRESHOLD, payload.clone())
            .await
            .unwrap();

        assert_eq!(encoded.body, payload);
        assert!(encoded.content_encoding.is_none());
    }

    #[tokio::test]
    async fn large_payload_is_compressed() {
        let payload = payload_of_len(2000);
        let encoded = encode_payload(CompressionScheme::gzip_default(), DEFAULT_COMPRESSION_THRESHOLD, payload.clone())
            .await
            .unwrap();

        assert_eq!(encoded.content_encoding, Some(HeaderValue::from_static("gzip")));
        assert!(encoded.body.len() < payload.len());

        let mut decoded = Vec::new();
        GzipDecoder::new(&encoded.body[..])
            .read_to_end(&mut decoded)
            .await
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn disabled_compression_passes_through() {
        let payload = payload_of_len(2000);
        let encoded = encode_payload(CompressionScheme::noop(), DEFAULT_COMPRESSION_THRESHOLD, payload.clone())
            .await
            .unwrap();

        assert_eq!(encoded.body, payload);
        assert!(encoded.content_encoding.is_none());
    }
}
