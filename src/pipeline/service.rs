use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use super::executor::{ExecutionError, PipelineExecutor, PipelineResult};
use super::step::{StepKind, StepOptions};
use super::validation::{validate_pipeline, validate_step_options, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessOperation {
    Optimize,
    RemoveBackground,
    Pipeline,
}

impl ProcessOperation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "optimize" => Some(Self::Optimize),
            "remove_background" => Some(Self::RemoveBackground),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimize => "optimize",
            Self::RemoveBackground => "remove_background",
            Self::Pipeline => "pipeline",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Steps must be an array")]
    StepsNotArray,
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(err) => err.code(),
            Self::StepsNotArray => "steps_not_array",
            Self::Execution(err) => err.code(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::StepsNotArray)
    }
}

/// Validate-then-execute entry points used by the HTTP layer and the CLI.
pub struct ImagePipelineService {
    executor: PipelineExecutor,
}

impl ImagePipelineService {
    pub fn new(executor: PipelineExecutor) -> Self {
        Self { executor }
    }

    pub fn supports(&self, kind: StepKind) -> bool {
        self.executor.supports(kind)
    }

    pub fn validate_pipeline_steps(
        &self,
        raw_steps: &[Value],
    ) -> Result<Vec<StepOptions>, ValidationError> {
        validate_pipeline(raw_steps)
    }

    pub async fn run_pipeline(
        &self,
        initial: &Path,
        steps: &[StepOptions],
    ) -> Result<PipelineResult, ExecutionError> {
        self.executor.run(initial, steps).await
    }

    pub async fn run_optimize(
        &self,
        input: &Path,
        raw_options: Option<&Value>,
    ) -> Result<PipelineResult, PipelineError> {
        self.run_single(StepKind::Optimize, input, raw_options).await
    }

    pub async fn run_remove_background(
        &self,
        input: &Path,
        raw_options: Option<&Value>,
    ) -> Result<PipelineResult, PipelineError> {
        self.run_single(StepKind::RemoveBackground, input, raw_options)
            .await
    }

    async fn run_single(
        &self,
        kind: StepKind,
        input: &Path,
        raw_options: Option<&Value>,
    ) -> Result<PipelineResult, PipelineError> {
        let step = validate_step_options(kind, raw_options)?;
        Ok(self.executor.run(input, std::slice::from_ref(&step)).await?)
    }

    pub async fn process(
        &self,
        operation: ProcessOperation,
        input: &Path,
        raw_options: Option<&Value>,
        raw_steps: Option<&Value>,
    ) -> Result<PipelineResult, PipelineError> {
        match operation {
            ProcessOperation::Optimize => self.run_optimize(input, raw_options).await,
            ProcessOperation::RemoveBackground => {
                self.run_remove_background(input, raw_options).await
            }
            ProcessOperation::Pipeline => {
                let raw_steps = raw_steps
                    .and_then(Value::as_array)
                    .ok_or(PipelineError::StepsNotArray)?;
                let steps = self.validate_pipeline_steps(raw_steps.as_slice())?;
                Ok(self.run_pipeline(input, steps.as_slice()).await?)
            }
        }
    }
}
