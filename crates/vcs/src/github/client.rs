//! GitHub REST API provider.
//!
//! Async HTTP client using `reqwest` with optional Bearer token
//! authentication. Each request races the caller's cancellation token.

use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{CommitResponse, ContentsResponse, RepositoryResponse};
use crate::address::{Locator, RepositoryAddress};
use crate::error::VcsError;
use crate::provider::{BoxFuture, VcsProvider};
use crate::revision::CommitRef;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const DEFAULT_HOST: &str = "github.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("dockwright/", env!("CARGO_PKG_VERSION"));

/// Path segments keep `/` so branch names like `release/1.x` and nested
/// file paths survive encoding.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

/// Errors from building the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid API token")]
    InvalidToken,
}

/// GitHub provider.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    host: String,
}

impl Client {
    /// Creates a client for github.com.
    ///
    /// An empty or missing token makes unauthenticated requests, which
    /// only see public repositories and are rate limited hard.
    pub fn new(token: Option<&str>, timeout: Option<Duration>) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| Error::InvalidToken)?,
            );
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            host: DEFAULT_HOST.to_string(),
        })
    }

    /// Points the client at another API endpoint, e.g. GitHub Enterprise
    /// (`https://ghe.example.com/api/v3`, host `ghe.example.com`).
    pub fn with_api(mut self, base_url: impl Into<String>, host: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self.host = host.into().to_ascii_lowercase();
        self
    }

    /// Sets a custom base URL, keeping the github.com host (for testing).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Maps an address to `owner/repo` on this host.
    fn repo_path(&self, address: &RepositoryAddress) -> Result<String, VcsError> {
        let Locator { host, path } = address.locator()?;
        if host != self.host {
            return Err(VcsError::RepositoryNotFound(format!(
                "{address} (host '{host}' is not served by {})",
                self.host
            )));
        }
        if path.split('/').count() != 2 {
            return Err(VcsError::RepositoryNotFound(format!(
                "{address} (expected owner/repo, got '{path}')"
            )));
        }
        Ok(path)
    }

    /// Performs a GET request. `Ok(None)` means the resource does not exist
    /// (404, or 422 for an unknown ref).
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, VcsError> {
        cancellable(cancel, self.send_get(url, query)).await
    }

    async fn send_get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Vec<u8>>, VcsError> {
        debug!(url, "GET");
        let resp = self.http.get(url).query(query).send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VcsError::Transient(format!(
                "GitHub API error {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn repository(
        &self,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RepositoryResponse>, VcsError> {
        let url = format!("{}/repos/{repo}", self.base_url);
        match self.get(&url, &[], cancel).await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    async fn last_commit(
        &self,
        address: &RepositoryAddress,
        cancel: &CancellationToken,
    ) -> Result<CommitRef, VcsError> {
        let repo = self.repo_path(address)?;
        let reference = address.branch().unwrap_or("HEAD");
        let url = format!(
            "{}/repos/{repo}/commits/{}",
            self.base_url,
            utf8_percent_encode(reference, PATH_SEGMENT)
        );

        if let Some(body) = self.get(&url, &[], cancel).await? {
            let commit: CommitResponse = serde_json::from_slice(&body)?;
            debug!(repository = %address, sha = %commit.sha, "last commit");
            return Ok(CommitRef::new(commit.sha));
        }

        // The ref lookup failed; find out whether the repository exists.
        match self.repository(&repo, cancel).await? {
            None => Err(VcsError::RepositoryNotFound(address.to_string())),
            Some(info) => {
                let branch = match address.branch() {
                    Some(branch) => branch.to_string(),
                    None if !info.default_branch.is_empty() => info.default_branch,
                    None => "HEAD".to_string(),
                };
                Err(VcsError::BranchNotFound {
                    repository: address.transport_url().to_string(),
                    branch,
                })
            }
        }
    }

    async fn file(
        &self,
        address: &RepositoryAddress,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, VcsError> {
        // Pin the read to the same tip the revision is computed from.
        let commit = self.last_commit(address, cancel).await?;
        let repo = self.repo_path(address)?;
        let clean = path.trim_start_matches("./").trim_start_matches('/');
        let url = format!(
            "{}/repos/{repo}/contents/{}",
            self.base_url,
            utf8_percent_encode(clean, PATH_SEGMENT)
        );

        let not_found = || VcsError::FileNotFound {
            repository: address.to_string(),
            path: path.to_string(),
        };

        let body = self
            .get(&url, &[("ref", commit.as_str())], cancel)
            .await?
            .ok_or_else(not_found)?;

        let file = match serde_json::from_slice::<ContentsResponse>(&body)? {
            ContentsResponse::File(file) if file.kind == "file" => file,
            _ => return Err(not_found()),
        };

        if file.encoding == "base64" && !file.content.is_empty() {
            return decode_content(&file.content);
        }

        // Large files come back without inline content.
        let download_url = file.download_url.ok_or_else(not_found)?;
        self.get(&download_url, &[], cancel)
            .await?
            .ok_or_else(not_found)
    }
}

impl VcsProvider for Client {
    fn name(&self) -> &str {
        "github"
    }

    fn resolve_last_commit<'a>(
        &'a self,
        address: &'a RepositoryAddress,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommitRef, VcsError>> {
        Box::pin(self.last_commit(address, cancel))
    }

    fn fetch_file<'a>(
        &'a self,
        address: &'a RepositoryAddress,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<u8>, VcsError>> {
        Box::pin(self.file(address, path, cancel))
    }
}

/// Decodes GitHub's line-wrapped base64 file content.
fn decode_content(content: &str) -> Result<Vec<u8>, VcsError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| VcsError::Transient(format!("malformed file content: {e}")))
}

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, VcsError>
where
    F: Future<Output = Result<T, VcsError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VcsError::Cancelled),
        result = fut => result,
    }
}
