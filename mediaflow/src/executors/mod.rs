//! Stage executors.
//!
//! An executor runs the business logic of one stage and reports an
//! [`Outcome`]. Executors never retry or sleep on failure; they classify the
//! failure and leave the decision to the scheduler's retry policy.

mod compose;
mod context;
mod ship;
mod transform;

pub use compose::{
    composite_watermark, fit_within, max_watermark_box, overlay_watermark, watermark_position,
    write_jpeg_atomic, ComposeError, Placement, DEFAULT_JPEG_QUALITY,
};
pub use context::{ExecutionContext, JobContext};
pub use ship::{classify_status, ShipExecutor};
pub use transform::{
    output_path_for, HttpWatermarkSource, StaticWatermarkSource, TransformExecutor,
    WatermarkError, WatermarkSource,
};

use crate::core::{Outcome, Payload, Stage};
use crate::errors::MediaflowError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Business logic for one pipeline stage.
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// The stage this executor handles.
    fn stage(&self) -> Stage;

    /// Executes the stage once.
    ///
    /// Must be safe to re-run on the same payload after a crash redelivery.
    async fn execute(&self, ctx: &dyn ExecutionContext, payload: &Payload) -> Outcome;
}

/// Executors keyed by the stage they handle.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` for its stage, returning any executor it replaces.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) -> Option<Arc<dyn StageExecutor>> {
        self.executors.insert(executor.stage(), executor)
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Returns the executor for `stage`.
    #[must_use]
    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn StageExecutor>> {
        self.executors.get(&stage)
    }

    /// Returns stages with no registered executor.
    #[must_use]
    pub fn missing_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| !self.executors.contains_key(stage))
            .collect()
    }

    /// Fails with [`MediaflowError::NoExecutor`] for the first stage nothing handles.
    ///
    /// A worker missing a stage would fail every job of that stage, so it
    /// refuses to start instead.
    pub fn ensure_complete(&self) -> Result<(), MediaflowError> {
        match self.missing_stages().first() {
            Some(stage) => Err(MediaflowError::NoExecutor(*stage)),
            None => Ok(()),
        }
    }
}
