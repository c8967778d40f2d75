//! Deserialization helpers for use with `serde_with`.
//!
//! Values coming from environment variables are strings, or whatever `figment` managed to infer from them, so settings
//! that would naturally be booleans or optional strings need to accept a few more shapes than serde does by default.

use serde::{de::Error as _, Deserialize, Deserializer};
use serde_with::DeserializeAs;

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

/// Deserializes a `bool` from a boolean, a string, or a number.
///
/// Strings must be `true` or `false`, ignoring case and surrounding whitespace, or `1` or `0`. Numbers must be either
/// `1` or `0`.
pub struct PermissiveBool;

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parsed = match BoolLike::deserialize(deserializer)? {
            BoolLike::Bool(value) => Some(value),
            BoolLike::Signed(value) => bool_from_number(value as f64),
            BoolLike::Unsigned(value) => bool_from_number(value as f64),
            BoolLike::Float(value) => bool_from_number(value),
            BoolLike::Text(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
        };

        parsed.ok_or_else(|| D::Error::custom("expected a boolean, `true`/`false` as a string, or `1`/`0`"))
    }
}

fn bool_from_number(value: f64) -> Option<bool> {
    if value == 1.0 {
        Some(true)
    } else if value == 0.0 {
        Some(false)
    } else {
        None
    }
}

/// Deserializes an `Option<String>`, treating an empty or whitespace-only string as absent.
pub struct EmptyStringAsNone;

impl<'de> DeserializeAs<'de, Option<String>> for EmptyStringAsNone {
    fn deserialize_as<D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|s| !s.trim().is_empty()))
    }
}
