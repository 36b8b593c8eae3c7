//! Deploy flow for dockwright projects.
//!
//! This crate implements the **business logic** of a deploy attempt. It has
//! no knowledge of configuration files or terminals: the binary hands it a
//! [`Project`](dockwright_vcs::Project), an [`Environment`], a progress sink
//! and the last recorded revision.
//!
//! # Pipeline
//!
//! 1. **Resolve** the project revision through a
//!    [`VcsProvider`](dockwright_vcs::VcsProvider)
//! 2. **Skip** when the revision matches the previous deploy (unless forced)
//! 3. **Build** the image once, on every target of the environment
//! 4. **Deploy** the image target by target, collecting failures

pub mod deploy;
pub mod docker;
pub mod engine;
pub mod error;
pub mod progress;
pub mod types;

pub use deploy::DeployOrchestrator;
pub use docker::{DEFAULT_DOCKER_BINARY, DockerCli};
pub use engine::ContainerEngine;
pub use error::{DeployError, DeployStep, EngineError, StepError};
pub use progress::Progress;
pub use types::{
    BuildRequest, ContainerInfo, DeployEvent, DeployOutcome, DeployRequest, DeployState,
    DeployTargetRequest, Environment, container_name, image_tag,
};
