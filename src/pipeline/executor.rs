use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::remote::{Artifact, RemoteError, SharedRemoteOperation};
use super::step::{StepKind, StepOptions};
use crate::storage::FileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineRunState {
    #[default]
    Idle,
    Validating,
    Running(usize),
    Succeeded,
    Failed,
}

impl PipelineRunState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use PipelineRunState::{Failed, Idle, Running, Succeeded, Validating};

        match (self, next) {
            (Idle, Validating) => true,
            (Validating, Running(0)) | (Validating, Failed) => true,
            (Running(current), Running(following)) => following == current + 1,
            (Running(_), Succeeded) | (Running(_), Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("pipeline has no steps")]
    EmptyPipeline,
    #[error("step {index} has unsupported type '{kind}'")]
    UnsupportedStepType { index: usize, kind: StepKind },
    #[error("step {index} ({kind}) failed: {source}")]
    RemoteFailure {
        index: usize,
        kind: StepKind,
        #[source]
        source: RemoteError,
    },
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyPipeline => "empty_pipeline",
            Self::UnsupportedStepType { .. } => "unsupported_step_type",
            Self::RemoteFailure { source, .. } => source.code(),
        }
    }

    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::EmptyPipeline => None,
            Self::UnsupportedStepType { index, .. } | Self::RemoteFailure { index, .. } => {
                Some(*index)
            }
        }
    }

}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub final_artifact: Artifact,
    pub steps_completed: usize,
}

/// Runs validated steps strictly in order, feeding each output into the next step.
pub struct PipelineExecutor {
    files: Arc<dyn FileStore>,
    operations: HashMap<StepKind, SharedRemoteOperation>,
}

impl PipelineExecutor {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self {
            files,
            operations: HashMap::new(),
        }
    }

    /// Registers `operation` for its kind, replacing any earlier registration.
    pub fn with_operation(mut self, operation: SharedRemoteOperation) -> Self {
        self.operations.insert(operation.kind(), operation);
        self
    }

    pub fn supports(&self, kind: StepKind) -> bool {
        self.operations.contains_key(&kind)
    }

    pub async fn run(
        &self,
        initial: &Path,
        steps: &[StepOptions],
    ) -> Result<PipelineResult, ExecutionError> {
        let mut run = RunTracker::default();
        run.advance(PipelineRunState::Validating);
        if steps.is_empty() {
            run.advance(PipelineRunState::Failed);
            return Err(ExecutionError::EmptyPipeline);
        }
        let resolved = match self.resolve(steps) {
            Ok(resolved) => resolved,
            Err(err) => {
                run.advance(PipelineRunState::Failed);
                return Err(err);
            }
        };

        let mut intermediate = IntermediateArtifact::new(Arc::clone(&self.files));
        let mut current_input = initial.to_path_buf();
        let mut last_artifact: Option<Artifact> = None;

        for (index, (operation, options)) in resolved.into_iter().enumerate() {
            let kind = options.kind();
            run.advance(PipelineRunState::Running(index));
            info!(
                step_index = index,
                kind = %kind,
                input = %current_input.display(),
                "running pipeline step"
            );

            let artifact = match operation.execute(current_input.as_path(), options).await {
                Ok(artifact) => artifact,
                Err(source) => {
                    run.advance(PipelineRunState::Failed);
                    if let Some(stale) = intermediate.release() {
                        intermediate.discard(stale).await;
                    }
                    warn!(step_index = index, kind = %kind, error = %source, "pipeline step failed");
                    return Err(ExecutionError::RemoteFailure {
                        index,
                        kind,
                        source,
                    });
                }
            };

            let owned = (artifact.path != initial).then(|| artifact.path.clone());
            if let Some(stale) = intermediate.replace(owned) {
                intermediate.discard(stale).await;
            }
            current_input = artifact.path.clone();
            last_artifact = Some(artifact);
        }

        // The last output becomes the caller's; nothing is left to clean up.
        intermediate.release();
        let final_artifact = last_artifact.ok_or(ExecutionError::EmptyPipeline)?;
        run.advance(PipelineRunState::Succeeded);
        info!(
            steps = steps.len(),
            output = %final_artifact.path.display(),
            size = final_artifact.size,
            "pipeline finished"
        );
        Ok(PipelineResult {
            final_artifact,
            steps_completed: steps.len(),
        })
    }

    fn resolve<'a>(
        &self,
        steps: &'a [StepOptions],
    ) -> Result<Vec<(SharedRemoteOperation, &'a StepOptions)>, ExecutionError> {
        steps
            .iter()
            .enumerate()
            .map(|(index, options)| {
                let kind = options.kind();
                self.operations
                    .get(&kind)
                    .filter(|operation| operation.kind() == kind)
                    .map(|operation| (Arc::clone(operation), options))
                    .ok_or(ExecutionError::UnsupportedStepType { index, kind })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct RunTracker {
    state: PipelineRunState,
}

impl RunTracker {
    fn advance(&mut self, next: PipelineRunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid pipeline transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }
}

/// Owns the latest intermediate output of a run. Superseded and failed-run outputs are
/// deleted on the blocking pool; a run future dropped mid-step deletes inline on drop.
struct IntermediateArtifact {
    files: Arc<dyn FileStore>,
    path: Option<PathBuf>,
}

impl IntermediateArtifact {
    fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files, path: None }
    }

    /// Holds `next` and hands back the previous path unless it is the same file.
    fn replace(&mut self, next: Option<PathBuf>) -> Option<PathBuf> {
        let previous = std::mem::replace(&mut self.path, next);
        previous.filter(|previous| self.path.as_ref() != Some(previous))
    }

    fn release(&mut self) -> Option<PathBuf> {
        self.path.take()
    }

    async fn discard(&self, path: PathBuf) {
        let files = Arc::clone(&self.files);
        let shown = path.display().to_string();
        match tokio::task::spawn_blocking(move || files.delete(path.as_path())).await {
            Ok(true) => debug!(path = %shown, "removed intermediate artifact"),
            Ok(false) => {}
            Err(join_error) => {
                warn!(path = %shown, error = %join_error, "intermediate cleanup task failed")
            }
        }
    }
}

impl Drop for IntermediateArtifact {
    fn drop(&mut self) {
        // A single unlink; drop cannot await the blocking pool.
        if let Some(path) = self.path.take() {
            if self.files.delete(path.as_path()) {
                debug!(path = %path.display(), "removed intermediate artifact on drop");
            }
        }
    }
}
