use std::fmt::Write as _;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tracing::warn;

use crate::tags::{Tag, TagList};

/// Maximum length of a tagged name, in bytes.
pub const MAX_TAGGED_NAME_LEN: usize = 4096;

/// Maximum number of tags, stream and measurement combined, in a tagged name.
pub const MAX_TAGS: usize = 256;

/// Maximum length of a tag category, in bytes.
pub const MAX_TAG_CATEGORY_LEN: usize = 254;

/// Maximum combined length of a tag category and value, in bytes.
pub const MAX_TAG_LEN: usize = 256;

const STREAM_TAGS_PREFIX: &str = "|ST[";
const MEASUREMENT_TAGS_PREFIX: &str = "|MT[";
const BASE64_PREFIX: &str = "b\"";
const BASE64_SUFFIX: &str = "\"";

/// Tag errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TagError {
    /// The encoded tag was not wrapped as `b"..."`.
    #[snafu(display("encoded tag part '{}' is not wrapped as b\"...\"", part))]
    NotWrapped {
        /// The offending part of the tag.
        part: String,
    },

    /// The encoded tag part was not valid base64.
    #[snafu(display("encoded tag part '{}' is not valid base64", part))]
    InvalidBase64 {
        /// The offending part of the tag.
        part: String,

        /// Error source.
        source: base64::DecodeError,
    },

    /// The decoded tag part was not valid UTF-8.
    #[snafu(display("decoded tag part '{}' is not valid UTF-8", part))]
    InvalidUtf8 {
        /// The offending part of the tag.
        part: String,

        /// Error source.
        source: std::string::FromUtf8Error,
    },
}

/// What to do with a metric whose combined tag count exceeds [`MAX_TAGS`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TagLimitPolicy {
    /// Keep the first [`MAX_TAGS`] tags (stream tags first, then measurement tags) and emit the metric.
    #[default]
    Truncate,

    /// Drop the metric entirely.
    DropMetric,
}

/// Encodes a bare metric name and its tags into a tagged name.
///
/// The tagged name grammar is `<name>[|ST[tag,...]][|MT[tag,...]]`, where each tag is either `category:value` or,
/// when base64 encoding is enabled, `b"<base64 category>":b"<base64 value>"`.
///
/// # Limits
///
/// The broker rejects a whole submission when any single name in it violates its limits, so the encoder never emits a
/// name that would:
///
/// - tags longer than [`MAX_TAG_LEN`], or with a category longer than [`MAX_TAG_CATEGORY_LEN`], are dropped
/// - more than [`MAX_TAGS`] tags are handled per the configured [`TagLimitPolicy`]
/// - names longer than [`MAX_TAGGED_NAME_LEN`] are not emitted at all
#[derive(Clone, Debug, Default)]
pub struct TagEncoder {
    base64: bool,
    limit_policy: TagLimitPolicy,
}

impl TagEncoder {
    /// Creates a new `TagEncoder` that emits plain tags and truncates excess tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether or not tags are base64-encoded.
    ///
    /// Defaults to `false`.
    pub fn with_base64(mut self, base64: bool) -> Self {
        self.base64 = base64;
        self
    }

    /// Sets the policy applied when a metric has too many tags.
    ///
    /// Defaults to [`TagLimitPolicy::Truncate`].
    pub fn with_limit_policy(mut self, policy: TagLimitPolicy) -> Self {
        self.limit_policy = policy;
        self
    }

    /// Returns `true` if tags are base64-encoded.
    pub fn is_base64(&self) -> bool {
        self.base64
    }

    /// Builds the tagged name for the given bare name and tag groups.
    ///
    /// Returns `None` if the metric must not be emitted, due to either the tag limit policy or the name exceeding
    /// [`MAX_TAGGED_NAME_LEN`].
    pub fn tagged_name(&self, name: &str, stream_tags: &TagList, measurement_tags: &TagList) -> Option<String> {
        let total_tags = stream_tags.len() + measurement_tags.len();
        let (stream_limit, measurement_limit) = if total_tags > MAX_TAGS {
            match self.limit_policy {
                TagLimitPolicy::DropMetric => {
                    warn!(
                        metric_name = name,
                        total_tags,
                        max_tags = MAX_TAGS,
                        "Dropping metric with too many tags."
                    );
                    return None;
                }
                TagLimitPolicy::Truncate => {
                    warn!(
                        metric_name = name,
                        total_tags,
                        max_tags = MAX_TAGS,
                        "Truncating tags for metric with too many tags."
                    );
                    let stream_limit = stream_tags.len().min(MAX_TAGS);
                    (stream_limit, MAX_TAGS - stream_limit)
                }
            }
        } else {
            (stream_tags.len(), measurement_tags.len())
        };

        let mut tagged_name = String::with_capacity(name.len() + total_tags * 16);
        tagged_name.push_str(name);
        self.push_tag_group(
            &mut tagged_name,
            name,
            STREAM_TAGS_PREFIX,
            stream_tags.iter().take(stream_limit),
        );
        self.push_tag_group(
            &mut tagged_name,
            name,
            MEASUREMENT_TAGS_PREFIX,
            measurement_tags.iter().take(measurement_limit),
        );

        if tagged_name.len() > MAX_TAGGED_NAME_LEN {
            warn!(
                metric_name = name,
                len = tagged_name.len(),
                max_len = MAX_TAGGED_NAME_LEN,
                "Dropping metric with oversized tagged name."
            );
            return None;
        }

        Some(tagged_name)
    }

    fn push_tag_group<'a, I>(&self, buf: &mut String, name: &str, prefix: &str, tags: I)
    where
        I: Iterator<Item = &'a Tag>,
    {
        let group_start = buf.len();
        let mut wrote_any = false;

        for tag in tags {
            if !is_within_limits(name, tag) {
                continue;
            }

            if wrote_any {
                buf.push(',');
            } else {
                buf.push_str(prefix);
                wrote_any = true;
            }

            self.encode_tag(tag, buf);
        }

        if wrote_any {
            buf.push(']');
        } else {
            buf.truncate(group_start);
        }
    }

    /// Encodes a single tag, appending it to `buf`.
    pub fn encode_tag(&self, tag: &Tag, buf: &mut String) {
        if !self.base64 {
            let _ = write!(buf, "{}:{}", tag.category(), tag.value());
            return;
        }

        let category = strip_whitespace(&tag.category().to_lowercase());
        push_base64(buf, &category);

        // The broker needs the delimiter even when there's no value.
        buf.push(':');

        let value = strip_whitespace(tag.value());
        if !value.is_empty() {
            push_base64(buf, &value);
        }
    }
}

fn is_within_limits(name: &str, tag: &Tag) -> bool {
    if tag.category().len() > MAX_TAG_CATEGORY_LEN {
        warn!(
            metric_name = name,
            tag_category = tag.category(),
            max_len = MAX_TAG_CATEGORY_LEN,
            "Dropping tag with oversized category."
        );
        return false;
    }

    if tag.len() > MAX_TAG_LEN {
        warn!(
            metric_name = name,
            tag_category = tag.category(),
            len = tag.len(),
            max_len = MAX_TAG_LEN,
            "Dropping oversized tag."
        );
        return false;
    }

    true
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn push_base64(buf: &mut String, raw: &str) {
    buf.push_str(BASE64_PREFIX);
    STANDARD.encode_string(raw.as_bytes(), buf);
    buf.push_str(BASE64_SUFFIX);
}

/// Decodes a tag that was encoded in base64 form (`b"<category>":b"<value>"`).
///
/// The category comes back lower-cased and with whitespace removed, as it was encoded.
///
/// # Errors
///
/// If either part of the tag isn't wrapped as `b"..."`, or isn't valid base64-encoded UTF-8, an error is returned.
pub fn decode_tag(encoded: &str) -> Result<Tag, TagError> {
    let (raw_category, raw_value) = match encoded.find("\":") {
        Some(idx) => (&encoded[..idx + 1], &encoded[idx + 2..]),
        None => (encoded, ""),
    };

    let category = decode_part(raw_category)?;
    let value = if raw_value.is_empty() {
        String::new()
    } else {
        decode_part(raw_value)?
    };

    Ok(Tag::new(category, value))
}

fn decode_part(part: &str) -> Result<String, TagError> {
    let inner = part
        .strip_prefix(BASE64_PREFIX)
        .and_then(|s| s.strip_suffix(BASE64_SUFFIX))
        .ok_or_else(|| TagError::NotWrapped { part: part.to_string() })?;

    let decoded = STANDARD.decode(inner).context(InvalidBase64 { part })?;
    String::from_utf8(decoded).context(InvalidUtf8 { part })
}
