//! Commit references and project revision fingerprints.
//!
//! A fingerprint is SHA-256 over the ordered sequence
//! `(primary, related_1, related_2, ...)`, each reference encoded as its
//! byte length (big-endian `u64`) followed by its bytes. The length prefix
//! keeps `["ab", "c"]` and `["a", "bc"]` apart. The encoding and digest are
//! part of the external contract: fingerprints recorded by one build are
//! compared by another.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::VcsError;
use crate::project::Project;
use crate::provider::VcsProvider;

/// Length of [`RevisionFingerprint::short`].
pub const SHORT_LEN: usize = 12;

/// Provider-defined identifier of a branch tip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitRef(String);

impl CommitRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic digest of a project's repository state. Equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionFingerprint(String);

impl RevisionFingerprint {
    /// Wraps a previously recorded fingerprint (e.g. from deploy history).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First [`SHORT_LEN`] hex characters, used for image tags and display.
    pub fn short(&self) -> &str {
        self.0.get(..SHORT_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for RevisionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Combines a primary reference and the related references, in order.
///
/// With no related references this is simply the digest of the primary
/// reference under the same encoding.
pub fn fingerprint(primary: &CommitRef, related: &[CommitRef]) -> RevisionFingerprint {
    let mut hasher = Sha256::new();
    for reference in std::iter::once(primary).chain(related) {
        let bytes = reference.as_str().as_bytes();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    RevisionFingerprint(hex::encode(hasher.finalize()))
}

/// Commit references that went into a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRevision {
    pub primary: CommitRef,
    pub related: Vec<CommitRef>,
    pub fingerprint: RevisionFingerprint,
}

/// Resolves every repository of `project` against the live provider and
/// fingerprints the result.
///
/// The primary repository is resolved first, then related repositories in
/// configured order. The first failure fails the whole resolution.
pub async fn resolve_revision<P>(
    provider: &P,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<ResolvedRevision, VcsError>
where
    P: VcsProvider + ?Sized,
{
    let primary = provider
        .resolve_last_commit(&project.repository, cancel)
        .await?;

    let mut related = Vec::with_capacity(project.related_repositories.len());
    for address in &project.related_repositories {
        related.push(provider.resolve_last_commit(address, cancel).await?);
    }

    let fingerprint = fingerprint(&primary, &related);
    debug!(
        project = %project.name,
        primary = %primary,
        related = related.len(),
        revision = %fingerprint,
        "revision resolved"
    );

    Ok(ResolvedRevision {
        primary,
        related,
        fingerprint,
    })
}
