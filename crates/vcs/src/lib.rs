//! Repository addresses, revision fingerprints and hosted VCS providers.
//!
//! This crate answers two questions for the deploy flow: "what is the
//! current state of this project's repositories?" (a single comparable
//! [`RevisionFingerprint`]) and "what does its build descriptor say?".
//! It is provider-agnostic; [`github`] is the bundled backend.
//!
//! # Address format
//!
//! `<transport-locator>[!<branch>]`, e.g. `git@github.com:org/repo.git!live`.

pub mod address;
pub mod error;
pub mod github;
pub mod project;
pub mod provider;
pub mod revision;

pub use address::{Locator, RepositoryAddress};
pub use error::VcsError;
pub use github::Client as GitHubClient;
pub use project::Project;
pub use provider::{BoxFuture, VcsProvider, get_build_descriptor};
pub use revision::{CommitRef, ResolvedRevision, RevisionFingerprint, fingerprint, resolve_revision};
