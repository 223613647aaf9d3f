//! In-memory collector serving recorded usage samples
//!
//! Used by tests, demos, and single-node deployments that push usage into the
//! process instead of pulling from a metering service. Samples are loaded per
//! (tenant, resource) and served back for any window that fully covers them.

use async_trait::async_trait;
use dashmap::DashMap;

use tollgate_common::{CollectError, UsageItem};

use crate::transformers::TransformerSet;
use crate::Collector;

/// One recorded sample set for a (tenant, resource) pair
#[derive(Debug, Clone)]
struct StaticSample {
    begin: i64,
    end: i64,
    items: Vec<UsageItem>,
}

/// Collector backed by an in-memory dataset
pub struct StaticCollector {
    transformers: TransformerSet,
    // (tenant_id, resource) -> recorded samples
    data: DashMap<(String, String), Vec<StaticSample>>,
}

impl StaticCollector {
    pub fn new(transformers: TransformerSet) -> Self {
        Self {
            transformers,
            data: DashMap::new(),
        }
    }

    /// Record samples for one (tenant, resource, period) triple
    pub fn load(
        &self,
        tenant_id: impl Into<String>,
        resource: impl Into<String>,
        begin: i64,
        end: i64,
        items: Vec<UsageItem>,
    ) {
        self.data
            .entry((tenant_id.into(), resource.into()))
            .or_default()
            .push(StaticSample { begin, end, items });
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn name(&self) -> &str {
        "static"
    }

    fn dependencies(&self) -> &[&str] {
        &["metadata"]
    }

    async fn retrieve(
        &self,
        resource: &str,
        start: i64,
        end: i64,
        tenant_id: &str,
    ) -> Result<Vec<UsageItem>, CollectError> {
        let key = (tenant_id.to_string(), resource.to_string());
        let mut collected = Vec::new();

        if let Some(samples) = self.data.get(&key) {
            for sample in samples.iter() {
                if sample.begin >= start && sample.end <= end {
                    collected.extend(sample.items.iter().cloned());
                }
            }
        }

        if collected.is_empty() {
            return Err(CollectError::no_data(self.name(), resource));
        }

        if let Some(transformer) = self.transformers.get("metadata") {
            for item in &mut collected {
                item.desc = transformer.transform(resource, std::mem::take(&mut item.desc));
            }
        }

        Ok(collected)
    }
}
