//! Metadata transformers applied to collected samples
//!
//! Raw metering metadata varies per backend; transformers normalize it into
//! the description stored with each rated line. Collectors declare which
//! transformers they need and the set is validated at startup.

use std::collections::HashMap;
use std::sync::Arc;

/// Normalizes one raw sample's metadata into the stored description
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, resource: &str, desc: serde_json::Value) -> serde_json::Value;
}

/// Named set of transformers available to collectors
#[derive(Clone, Default)]
pub struct TransformerSet {
    inner: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with the built-in transformers registered
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.insert(Arc::new(MetadataPruner::default()));
        set
    }

    pub fn insert(&mut self, transformer: Arc<dyn Transformer>) {
        self.inner
            .insert(transformer.name().to_string(), transformer);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.inner.get(name).cloned()
    }
}

/// Keeps only the billing-relevant metadata fields for known resource types.
///
/// Unknown resource types pass through untouched; metering backends attach
/// large metadata blobs and only a stable subset belongs in rated lines.
pub struct MetadataPruner {
    fields: HashMap<&'static str, Vec<&'static str>>,
}

impl Default for MetadataPruner {
    fn default() -> Self {
        let mut fields = HashMap::new();
        fields.insert(
            "compute",
            vec![
                "availability_zone",
                "flavor",
                "image_id",
                "instance_id",
                "memory",
                "metadata",
                "name",
                "project_id",
                "user_id",
                "vcpus",
            ],
        );
        fields.insert(
            "image",
            vec![
                "checksum",
                "container_format",
                "disk_format",
                "is_public",
                "name",
                "size",
                "status",
            ],
        );
        fields.insert("volume", vec!["volume_id", "name", "size", "status"]);
        Self { fields }
    }
}

impl Transformer for MetadataPruner {
    fn name(&self) -> &str {
        "metadata"
    }

    fn transform(&self, resource: &str, desc: serde_json::Value) -> serde_json::Value {
        let Some(allowed) = self.fields.get(resource) else {
            return desc;
        };
        match desc {
            serde_json::Value::Object(map) => {
                let pruned: serde_json::Map<String, serde_json::Value> = map
                    .into_iter()
                    .filter(|(key, _)| allowed.contains(&key.as_str()))
                    .collect();
                serde_json::Value::Object(pruned)
            }
            other => other,
        }
    }
}
