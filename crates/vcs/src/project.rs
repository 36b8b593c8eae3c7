//! Deployable project definition.

use serde::{Deserialize, Serialize};

use crate::address::RepositoryAddress;
use crate::error::VcsError;

/// Default build descriptor path inside the primary repository.
pub const DEFAULT_BUILD_DESCRIPTOR: &str = "Dockerfile";

fn default_build_descriptor() -> String {
    DEFAULT_BUILD_DESCRIPTOR.to_string()
}

/// A deployable unit: one primary repository, zero or more related
/// repositories that also affect its revision, and a build descriptor.
///
/// Read-only once constructed; the core never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub repository: RepositoryAddress,
    /// Order is part of the fingerprint input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_repositories: Vec<RepositoryAddress>,
    #[serde(rename = "dockerfile", default = "default_build_descriptor")]
    pub build_descriptor_path: String,
    /// Environments this project may be deployed to. Empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,
    #[serde(default)]
    pub no_cache: bool,
}

impl Project {
    /// Creates a project with no related repositories and the default
    /// build descriptor path.
    pub fn new(name: impl Into<String>, repository: RepositoryAddress) -> Self {
        Self {
            name: name.into(),
            repository,
            related_repositories: Vec::new(),
            build_descriptor_path: default_build_descriptor(),
            environments: Vec::new(),
            no_cache: false,
        }
    }

    pub fn with_related(mut self, related: impl IntoIterator<Item = RepositoryAddress>) -> Self {
        self.related_repositories.extend(related);
        self
    }

    pub fn with_build_descriptor(mut self, path: impl Into<String>) -> Self {
        self.build_descriptor_path = path.into();
        self
    }

    pub fn with_environments<S: Into<String>>(mut self, envs: impl IntoIterator<Item = S>) -> Self {
        self.environments.extend(envs.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if the project may be deployed to `environment`.
    pub fn allows_environment(&self, environment: &str) -> bool {
        self.environments.is_empty() || self.environments.iter().any(|e| e == environment)
    }

    /// Checks that every repository address points at a reachable host.
    pub fn validate(&self) -> Result<(), VcsError> {
        self.repository.locator()?;
        for related in &self.related_repositories {
            related.locator()?;
        }
        Ok(())
    }
}
