//! Data types for the deploy flow.

use std::fmt;

use dockwright_vcs::{CommitRef, Project, RepositoryAddress, RevisionFingerprint};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployStep};

/// A named deploy destination and the engine endpoints it spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub name: String,
    /// Engine endpoints (e.g. `tcp://10.0.0.2:2375`), deployed in order.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Environment {
    pub fn new<S: Into<String>>(name: impl Into<String>, targets: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

/// States of a single deploy attempt.
///
/// `Pending -> ResolvingRevision -> (SkippedNoChange | Building -> Deploying
/// -> Succeeded) | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Pending,
    ResolvingRevision,
    SkippedNoChange,
    Building,
    Deploying,
    Succeeded,
    Failed,
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SkippedNoChange | Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ResolvingRevision => "resolving revision",
            Self::SkippedNoChange => "skipped (no change)",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted while an attempt runs.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    StateChanged {
        project: String,
        environment: String,
        state: DeployState,
    },
    StepFailed {
        project: String,
        environment: String,
        step: DeployStep,
        target: Option<String>,
        error: String,
    },
}

/// Input of [`DeployOrchestrator::deploy`](crate::DeployOrchestrator::deploy).
#[derive(Debug, Clone)]
pub struct DeployRequest<'a> {
    pub project: &'a Project,
    pub environment: &'a Environment,
    /// Fingerprint last deployed to this (project, environment), if the
    /// caller keeps history.
    pub previous: Option<RevisionFingerprint>,
    pub force: bool,
}

/// Result of one deploy attempt.
///
/// `errors` is the failure channel: one entry per failed step, empty on
/// success or skip.
#[derive(Debug)]
pub struct DeployOutcome {
    pub project: String,
    pub environment: String,
    pub state: DeployState,
    /// Fingerprint resolved by this attempt; `None` if resolution failed.
    pub revision: Option<RevisionFingerprint>,
    pub errors: Vec<DeployError>,
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.state != DeployState::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.state == DeployState::SkippedNoChange
    }
}

/// Image build handed to a [`ContainerEngine`](crate::ContainerEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub project: String,
    pub repository: RepositoryAddress,
    /// Primary commit the revision was resolved at.
    pub commit: CommitRef,
    pub descriptor_path: String,
    pub image: String,
    pub no_cache: bool,
    pub targets: Vec<String>,
}

/// Container (re)start on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTargetRequest {
    pub project: String,
    pub environment: String,
    pub image: String,
    pub target: String,
}

/// A container found on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub target: String,
    pub id: String,
    pub image: String,
    /// Engine status text, e.g. `Up 2 hours`.
    pub status: String,
    pub name: String,
}

/// Image tag for a project at a revision: `<project>:<short fingerprint>`.
pub fn image_tag(project: &str, revision: &RevisionFingerprint) -> String {
    format!("{}:{}", project.to_ascii_lowercase(), revision.short())
}

/// Container name for a project in an environment: `<project>-<environment>`.
///
/// Environments sharing a target each get their own container. Characters
/// outside `[a-zA-Z0-9_.-]` become `-`.
pub fn container_name(project: &str, environment: &str) -> String {
    format!("{project}-{environment}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
