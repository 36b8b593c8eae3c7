//! Operator configuration.
//!
//! A single JSON file, by default `$XDG_CONFIG_HOME/dockwright/config.json`
//! (falling back to `~/.config`):
//!
//! ```json
//! {
//!   "github_token": "",
//!   "environments": { "live": { "targets": ["tcp://10.0.0.2:2375"] } },
//!   "projects": [
//!     { "name": "web", "repository": "git@github.com:org/web.git!live" }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use dockwright_deploy::{DEFAULT_DOCKER_BINARY, Environment};
use dockwright_vcs::Project;
use serde::{Deserialize, Serialize};

/// Environment variable that supplies the GitHub token when the file has none.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github_token: String,
    /// GitHub Enterprise API root, e.g. `https://ghe.example.com/api/v3`.
    pub github_api_url: Option<String>,
    /// Host repository addresses must point at when `github_api_url` is set.
    pub github_host: Option<String>,
    pub http_timeout_secs: u64,
    /// Whole-command deadline; unset means no deadline.
    pub deadline_secs: Option<u64>,
    pub docker_binary: String,
    pub environments: BTreeMap<String, Environment>,
    pub projects: Vec<Project>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: String::new(),
            github_api_url: None,
            github_host: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            deadline_secs: None,
            docker_binary: DEFAULT_DOCKER_BINARY.to_string(),
            environments: BTreeMap::new(),
            projects: Vec::new(),
        }
    }
}

impl Config {
    /// Reads, normalizes and validates the config at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.apply_token_env(std::env::var(TOKEN_ENV).ok());
        config.normalize();
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            projects = config.projects.len(),
            environments = config.environments.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Uses `value` as the token when the file leaves it empty.
    pub fn apply_token_env(&mut self, value: Option<String>) {
        if self.github_token.is_empty() {
            if let Some(token) = value.filter(|t| !t.trim().is_empty()) {
                self.github_token = token.trim().to_string();
            }
        }
    }

    /// Environment names come from the map keys.
    fn normalize(&mut self) {
        for (name, env) in &mut self.environments {
            env.name.clone_from(name);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be greater than zero");
        }
        if self.docker_binary.trim().is_empty() {
            bail!("docker_binary must not be empty");
        }
        if self.github_api_url.is_some() != self.github_host.is_some() {
            bail!("github_api_url and github_host must be set together");
        }
        for env in self.environments.values() {
            if env.targets.is_empty() {
                bail!("environment '{}' has no targets", env.name);
            }
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.name.trim().is_empty() {
                bail!("project with repository {} has no name", project.repository);
            }
            if !seen.insert(project.name.as_str()) {
                bail!("duplicate project '{}'", project.name);
            }
            project
                .validate()
                .with_context(|| format!("project '{}'", project.name))?;
            if project.build_descriptor_path.trim().is_empty() {
                bail!("project '{}' has an empty build descriptor path", project.name);
            }
            for env in &project.environments {
                if !self.environments.contains_key(env) {
                    bail!(
                        "project '{}' refers to undefined environment '{env}'",
                        project.name
                    );
                }
            }
        }
        Ok(())
    }

    pub fn project(&self, name: &str) -> anyhow::Result<&Project> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .with_context(|| format!("unknown project '{name}'"))
    }

    pub fn environment(&self, name: &str) -> anyhow::Result<&Environment> {
        self.environments
            .get(name)
            .with_context(|| format!("unknown environment '{name}'"))
    }

    /// Environments `project` may be deployed to, in name order.
    pub fn environments_for<'a>(
        &'a self,
        project: &'a Project,
    ) -> impl Iterator<Item = &'a Environment> + 'a {
        self.environments
            .values()
            .filter(move |env| project.allows_environment(&env.name))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Default config location.
pub fn default_config_path() -> PathBuf {
    config_base_dir().join("dockwright").join("config.json")
}

fn config_base_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config")
}
