//! Metric naming primitives.
//!
//! A metric submitted to the broker is identified by its *tagged name*: the bare metric name followed by an encoded
//! list of stream tags (which define series identity) and measurement tags (which qualify a single sample). This
//! crate provides the tag model and the encoder that turns a bare name and two tag groups into that tagged name.
#![deny(missing_docs)]

pub mod tags;
pub use self::tags::{Tag, TagList};

mod encoder;
pub use self::encoder::{
    decode_tag, TagEncoder, TagError, TagLimitPolicy, MAX_TAGGED_NAME_LEN, MAX_TAGS, MAX_TAG_CATEGORY_LEN, MAX_TAG_LEN,
};
