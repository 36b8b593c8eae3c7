//! Hosted VCS provider abstraction.
//!
//! Orchestration code only talks to [`VcsProvider`]; adding a backend means
//! implementing its three operations. Nothing here caches: every call hits
//! the live provider, since a stale tip commit silently disables redeploy
//! detection.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::address::RepositoryAddress;
use crate::error::VcsError;
use crate::project::Project;
use crate::revision::{CommitRef, RevisionFingerprint, resolve_revision};

/// Boxed, sendable future returned by provider and engine traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability set of a hosted VCS backend.
///
/// Every operation may block on the network and accepts a cancellation
/// token; a cancelled token yields [`VcsError::Cancelled`].
pub trait VcsProvider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Resolves the tip commit of `address`'s branch (or the default branch).
    fn resolve_last_commit<'a>(
        &'a self,
        address: &'a RepositoryAddress,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommitRef, VcsError>>;

    /// Fingerprints the project's primary and related repositories.
    ///
    /// Fails if any single repository fails to resolve.
    fn resolve_last_revision<'a>(
        &'a self,
        project: &'a Project,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<RevisionFingerprint, VcsError>> {
        Box::pin(async move {
            resolve_revision(self, project, cancel)
                .await
                .map(|revision| revision.fingerprint)
        })
    }

    /// Fetches `path` as it exists at the tip of `address`.
    ///
    /// A missing path is [`VcsError::FileNotFound`], never
    /// [`VcsError::RepositoryNotFound`].
    fn fetch_file<'a>(
        &'a self,
        address: &'a RepositoryAddress,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<u8>, VcsError>>;
}

/// Fetches the project's build descriptor from its primary repository.
///
/// Errors are passed through unchanged, so callers can tell "no build
/// descriptor configured" ([`VcsError::FileNotFound`]) from an unreachable
/// repository.
pub async fn get_build_descriptor<P>(
    provider: &P,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, VcsError>
where
    P: VcsProvider + ?Sized,
{
    debug!(
        provider = provider.name(),
        project = %project.name,
        path = %project.build_descriptor_path,
        "fetching build descriptor"
    );
    provider
        .fetch_file(&project.repository, &project.build_descriptor_path, cancel)
        .await
}
