use indexmap::{map::Entry, IndexMap};
use serde::Serialize;
use tracing::warn;

use super::MetricSample;

/// A batch of metric samples, keyed by tagged name.
///
/// A batch is built for a single source during a single collection cycle, submitted, and then discarded. Tagged names
/// are unique within a batch: inserting a sample under an existing name replaces the previous sample.
///
/// Samples are kept in insertion order so that serialized payloads are stable for a given sequence of inserts.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct Batch {
    samples: IndexMap<String, MetricSample>,
}

impl Batch {
    /// Creates a new, empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a sample under the given tagged name.
    ///
    /// If a sample already exists under the same name, it is replaced and returned, and a warning is logged.
    pub fn insert(&mut self, tagged_name: String, sample: MetricSample) -> Option<MetricSample> {
        match self.samples.entry(tagged_name) {
            Entry::Occupied(mut entry) => {
                warn!(
                    tagged_name = entry.key().as_str(),
                    "Duplicate tagged name in batch. Previous sample overwritten."
                );
                Some(entry.insert(sample))
            }
            Entry::Vacant(entry) => {
                entry.insert(sample);
                None
            }
        }
    }

    /// Returns the sample stored under the given tagged name, if any.
    pub fn get(&self, tagged_name: &str) -> Option<&MetricSample> {
        self.samples.get(tagged_name)
    }

    /// Returns `true` if a sample is stored under the given tagged name.
    pub fn contains(&self, tagged_name: &str) -> bool {
        self.samples.contains_key(tagged_name)
    }

    /// Returns the number of samples in the batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns an iterator over the tagged names and samples in the batch, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricSample)> {
        self.samples.iter().map(|(name, sample)| (name.as_str(), sample))
    }

    /// Serializes the batch as a JSON object mapping tagged name to sample.
    ///
    /// # Errors
    ///
    /// If serialization fails, an error is returned.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::MetricValue;

    #[test]
    fn collision_overwrites() {
        let mut batch = Batch::new();
        assert!(batch
            .insert("a".to_string(), MetricSample::new(MetricValue::Uint64(1), None))
            .is_none());

        let previous = batch.insert("a".to_string(), MetricSample::new(MetricValue::Uint64(2), None));
        assert_eq!(previous, Some(MetricSample::new(MetricValue::Uint64(1), None)));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get("a").map(|s| s.value()), Some(&MetricValue::Uint64(2)));
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut batch = Batch::new();
        batch.insert(
            "z|ST[a:1]".to_string(),
            MetricSample::new(MetricValue::Float64(2.5), Some(10)),
        );
        batch.insert(
            "a".to_string(),
            MetricSample::new(MetricValue::Text("up".to_string()), None),
        );

        let json = String::from_utf8(batch.to_json().unwrap()).unwrap();
        similar_asserts::assert_eq!(
            json,
            r#"{"z|ST[a:1]":{"_type":"n","_value":2.5,"_ts":10},"a":{"_type":"s","_value":"up"}}"#
        );
    }
}
