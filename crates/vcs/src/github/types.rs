//! GitHub REST v3 response types (only the fields we read).

use serde::Deserialize;

/// `GET /repos/{owner}/{repo}/commits/{ref}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
}

/// `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepositoryResponse {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: String,
}

/// `GET /repos/{owner}/{repo}/contents/{path}`: a file, or a listing when
/// the path is a directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ContentsResponse {
    File(ContentFile),
    Listing(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentFile {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub content: String,
    /// Raw URL; GitHub leaves `content` empty for files over 1 MB.
    #[serde(default)]
    pub download_url: Option<String>,
}
