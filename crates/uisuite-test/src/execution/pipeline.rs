use crate::config::Platform;
use crate::{Result, TestError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Idle,
    Building,
    DeviceBooting,
    ServerStarting,
    SessionStarting,
    Testing,
    Publishing,
    TearingDown,
    Done,
    Failed,
}

impl PipelineStage {
    /// Stages that do work and can therefore fail.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            PipelineStage::Idle | PipelineStage::TearingDown | PipelineStage::Done | PipelineStage::Failed
        )
    }

    /// Any stage before teardown may fail, including `Idle`.
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (Idle, Building)
            | (Building, DeviceBooting)
            | (DeviceBooting, ServerStarting)
            | (ServerStarting, SessionStarting)
            | (SessionStarting, Testing)
            | (Testing, Publishing)
            | (Testing, TearingDown)
            | (Publishing, TearingDown)
            | (Failed, TearingDown)
            | (TearingDown, Done) => true,
            (from, Failed) => *from == Idle || from.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Tracks one platform's progress through the pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    platform: Platform,
    stage: PipelineStage,
    failed_at: Option<PipelineStage>,
    history: Vec<StageTransition>,
}

impl Pipeline {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            stage: PipelineStage::Idle,
            failed_at: None,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// The active stage the pipeline was in when it failed.
    pub fn failed_at(&self) -> Option<PipelineStage> {
        self.failed_at
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    pub fn advance(&mut self, next: PipelineStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(TestError::Execution(format!(
                "{}: invalid stage transition {} -> {}",
                self.platform, self.stage, next
            )));
        }

        debug!(platform = %self.platform, from = %self.stage, to = %next, "Stage transition");
        if next == PipelineStage::Failed {
            self.failed_at = Some(self.stage);
        }
        self.history.push(StageTransition {
            from: self.stage,
            to: next,
            at: chrono::Utc::now(),
        });
        self.stage = next;
        Ok(())
    }

    /// Marks the current stage failed. A pipeline already failed or tearing
    /// down is left as is.
    pub fn fail(&mut self) {
        if self.stage.can_transition_to(PipelineStage::Failed) {
            let _ = self.advance(PipelineStage::Failed);
        }
    }

    /// Moves to teardown from wherever the pipeline stopped. Stopping before
    /// the tests ran counts as a failure.
    pub fn begin_teardown(&mut self) {
        if !matches!(self.stage, PipelineStage::Testing | PipelineStage::Publishing) {
            self.fail();
        }
        let _ = self.advance(PipelineStage::TearingDown);
    }

    pub fn finish(&mut self) {
        let _ = self.advance(PipelineStage::Done);
    }
}
