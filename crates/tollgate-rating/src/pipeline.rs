//! Ordered chain of rating processors

use std::sync::Arc;

use rust_decimal::Decimal;

use tollgate_common::UsageFrame;

use crate::RatingProcessor;

/// Rating modules in execution order (descending priority, stable).
///
/// Cheap to clone; workers take a pipeline snapshot per iteration so a
/// reload in the orchestrator never mutates a running worker.
#[derive(Clone, Default)]
pub struct RatingPipeline {
    processors: Vec<Arc<dyn RatingProcessor>>,
}

impl RatingPipeline {
    pub fn new(mut processors: Vec<Arc<dyn RatingProcessor>>) -> Self {
        processors.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { processors }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every module's `process` hook over the batch, in order
    pub fn process(&self, frames: &mut [UsageFrame]) {
        for processor in &self.processors {
            processor.process(frames);
        }
    }

    /// Notify every module that a period produced no usage
    pub fn nodata(&self, begin: i64, end: i64) {
        for processor in &self.processors {
            processor.nodata(begin, end);
        }
    }

    /// Run the quote hooks and return the total price of the batch
    pub fn quote(&self, frames: &mut [UsageFrame]) -> Decimal {
        for processor in &self.processors {
            processor.quote(frames);
        }
        frames
            .iter()
            .flat_map(|frame| frame.usage.values())
            .flatten()
            .map(|item| item.price())
            .sum()
    }
}
