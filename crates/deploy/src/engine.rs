//! Container engine trait.
//!
//! The orchestrator never builds or runs containers itself; it drives an
//! engine through this trait. [`DockerCli`](crate::DockerCli) is the
//! production implementation, tests use in-memory mocks.

use dockwright_vcs::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::progress::Progress;
use crate::types::{BuildRequest, ContainerInfo, DeployTargetRequest};

/// Build and run primitives of a container runtime.
///
/// Implementations write human-readable output to `progress` as they go
/// and return [`EngineError::Cancelled`] once `cancel` fires.
pub trait ContainerEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Builds `request.image` on every target in `request.targets`.
    fn build<'a>(
        &'a self,
        request: &'a BuildRequest,
        progress: &'a mut Progress<'_>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>>;

    /// Replaces the project's container for one environment on one target.
    fn deploy<'a>(
        &'a self,
        request: &'a DeployTargetRequest,
        progress: &'a mut Progress<'_>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>>;

    /// Containers on `target` named exactly `name`, running or not.
    fn list<'a>(
        &'a self,
        target: &'a str,
        name: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ContainerInfo>, EngineError>>;
}
