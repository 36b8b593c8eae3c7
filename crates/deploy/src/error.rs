//! Deploy error types.

use std::fmt;

use dockwright_vcs::VcsError;

/// Steps of a single deploy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployStep {
    Build,
    Deploy,
}

impl DeployStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Deploy => "deploy",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by a container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("engine error: {0}")]
    Other(String),

    #[error("cancelled")]
    Cancelled,
}

/// Cause of a failed step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl StepError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Vcs(VcsError::Cancelled) | Self::Engine(EngineError::Cancelled)
        )
    }
}

/// Errors reported for a deploy attempt.
///
/// `Revision` and `StepFailed` are collected into a
/// [`DeployOutcome`](crate::DeployOutcome); `InvalidRequest` is returned
/// directly, since it means the caller broke the contract.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{project}: cannot resolve revision: {source}")]
    Revision {
        project: String,
        #[source]
        source: VcsError,
    },

    #[error("{project}/{environment}: {step} step failed{}: {source}", target_suffix(.target))]
    StepFailed {
        project: String,
        environment: String,
        step: DeployStep,
        target: Option<String>,
        #[source]
        source: StepError,
    },

    #[error("invalid deploy request: {0}")]
    InvalidRequest(String),
}

impl DeployError {
    /// Step that failed, if this is a step failure.
    pub fn step(&self) -> Option<DeployStep> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

fn target_suffix(target: &Option<String>) -> String {
    match target {
        Some(target) => format!(" on {target}"),
        None => String::new(),
    }
}
