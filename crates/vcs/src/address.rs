//! Repository address parsing.
//!
//! The textual form is `<transport-locator>[!<branch>]`. The locator is
//! opaque to the core and handed to the provider as-is; `!` is reserved
//! and never part of a locator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VcsError;

/// Separator between the transport locator and the branch qualifier.
pub const BRANCH_SEPARATOR: char = '!';

/// A parsed repository address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryAddress {
    transport_url: String,
    branch: Option<String>,
}

impl RepositoryAddress {
    /// Parses `<transport-locator>[!<branch>]`.
    ///
    /// Fails with [`VcsError::InvalidAddress`] when the locator is empty or
    /// when a `!` is present with nothing after it.
    pub fn parse(raw: &str) -> Result<Self, VcsError> {
        let raw = raw.trim();
        let (locator, branch) = match raw.split_once(BRANCH_SEPARATOR) {
            Some((locator, branch)) => (locator, Some(branch)),
            None => (raw, None),
        };

        if locator.is_empty() {
            return Err(VcsError::invalid_address(raw, "empty transport locator"));
        }
        if branch.is_some_and(str::is_empty) {
            return Err(VcsError::invalid_address(raw, "empty branch after '!'"));
        }

        Ok(Self {
            transport_url: locator.to_string(),
            branch: branch.map(str::to_string),
        })
    }

    /// Opaque locator used by the provider to open the repository.
    pub fn transport_url(&self) -> &str {
        &self.transport_url
    }

    /// Branch qualifier; `None` means the provider's default branch.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Splits the locator into host and repository path.
    ///
    /// Understands scp-like (`git@host:org/repo.git`) and URL-like
    /// (`https://host/org/repo`) locators. A trailing `.git` is dropped.
    pub fn locator(&self) -> Result<Locator, VcsError> {
        let raw = self.transport_url.as_str();

        let (authority, path) = if let Some((_, rest)) = raw.split_once("://") {
            rest.split_once('/')
                .ok_or_else(|| VcsError::invalid_address(raw, "missing repository path"))?
        } else {
            match (raw.find(':'), raw.find('/')) {
                (Some(colon), Some(slash)) if colon < slash => (&raw[..colon], &raw[colon + 1..]),
                (Some(colon), None) => (&raw[..colon], &raw[colon + 1..]),
                _ => return Err(VcsError::invalid_address(raw, "locator has no host")),
            }
        };

        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        if host.is_empty() {
            return Err(VcsError::invalid_address(raw, "locator has no host"));
        }

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        if path.is_empty() {
            return Err(VcsError::invalid_address(raw, "missing repository path"));
        }

        Ok(Locator {
            host: host.to_ascii_lowercase(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for RepositoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{}{BRANCH_SEPARATOR}{branch}", self.transport_url),
            None => f.write_str(&self.transport_url),
        }
    }
}

impl FromStr for RepositoryAddress {
    type Err = VcsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepositoryAddress {
    type Error = VcsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepositoryAddress> for String {
    fn from(address: RepositoryAddress) -> Self {
        address.to_string()
    }
}

/// Host-agnostic parts of a transport locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Lowercased host name, without user info or port.
    pub host: String,
    /// Repository path on the host, e.g. `org/repo`.
    pub path: String,
}
