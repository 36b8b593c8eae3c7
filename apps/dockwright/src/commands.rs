//! `deploy`, `status` and `containers` command handlers.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use dockwright_deploy::{
    ContainerEngine, ContainerInfo, DeployOrchestrator, DeployOutcome, DeployRequest, DockerCli,
    EngineError, container_name,
};
use dockwright_vcs::{
    GitHubClient, Project, RevisionFingerprint, VcsError, VcsProvider, get_build_descriptor,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::history::{History, HistoryStore};

/// Builds the GitHub provider described by `config`.
pub fn github_provider(config: &Config) -> anyhow::Result<GitHubClient> {
    let token = Some(config.github_token.as_str()).filter(|t| !t.is_empty());
    let client = GitHubClient::new(token, Some(config.http_timeout()))
        .context("creating GitHub client")?;
    Ok(match (&config.github_api_url, &config.github_host) {
        (Some(url), Some(host)) => client.with_api(url.as_str(), host.as_str()),
        _ => client,
    })
}

/// Runs one deploy attempt and records it on success.
///
/// Returns `Ok(false)` when the attempt finished with errors.
pub async fn deploy(
    config: &Config,
    store: &HistoryStore,
    project: &str,
    environment: &str,
    force: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let project = config.project(project)?;
    let environment = config.environment(environment)?;
    let mut history = store.load()?;

    let provider = Arc::new(github_provider(config)?);
    let engine = Arc::new(DockerCli::new(&config.docker_binary));
    let orchestrator = DeployOrchestrator::new(provider, engine);

    let request = DeployRequest {
        project,
        environment,
        previous: history.previous(&project.name, &environment.name),
        force,
    };

    info!(
        project = %project.name,
        environment = %environment.name,
        force,
        "starting deploy"
    );
    let mut stdout = tokio::io::stdout();
    let outcome = orchestrator.deploy(&request, &mut stdout, cancel).await?;

    let mut out = std::io::stdout();
    report(&mut out, &outcome)?;

    if record(&mut history, &outcome) {
        store.save(&history)?;
        info!(path = %store.path().display(), "deploy recorded");
    }
    Ok(outcome.is_success())
}

/// Records the outcome's revision if it was actually deployed.
fn record(history: &mut History, outcome: &DeployOutcome) -> bool {
    if !outcome.is_success() || outcome.is_skipped() {
        return false;
    }
    match &outcome.revision {
        Some(revision) => {
            history.record(&outcome.project, &outcome.environment, revision.clone());
            true
        }
        None => false,
    }
}

fn report(out: &mut impl Write, outcome: &DeployOutcome) -> std::io::Result<()> {
    let revision = outcome
        .revision
        .as_ref()
        .map(|r| r.short().to_string())
        .unwrap_or_else(|| "-".into());
    writeln!(
        out,
        "{}/{}: {} (revision {revision})",
        outcome.project, outcome.environment, outcome.state
    )?;
    for error in &outcome.errors {
        writeln!(out, "  error: {error}")?;
    }
    Ok(())
}

/// Prints revision and descriptor state for one or all projects.
pub async fn status(
    config: &Config,
    store: &HistoryStore,
    project: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let projects: Vec<&Project> = match project {
        Some(name) => vec![config.project(name)?],
        None => config.projects.iter().collect(),
    };
    let history = store.load()?;
    let provider = github_provider(config)?;
    let mut out = std::io::stdout();

    for project in projects {
        let revision = provider.resolve_last_revision(project, cancel).await;
        let descriptor = get_build_descriptor(&provider, project, cancel).await;
        let previous: Vec<(String, Option<RevisionFingerprint>)> = config
            .environments_for(project)
            .map(|env| (env.name.clone(), history.previous(&project.name, &env.name)))
            .collect();
        render_status(&mut out, project, &revision, &previous, &descriptor)?;
    }
    Ok(())
}

fn render_status(
    out: &mut impl Write,
    project: &Project,
    revision: &Result<RevisionFingerprint, VcsError>,
    previous: &[(String, Option<RevisionFingerprint>)],
    descriptor: &Result<Vec<u8>, VcsError>,
) -> std::io::Result<()> {
    writeln!(out, "{} ({})", project.name, project.repository)?;
    match revision {
        Ok(current) => {
            writeln!(out, "  revision: {}", current.short())?;
            for (environment, last) in previous {
                writeln!(out, "  {environment}: {}", compare(last.as_ref(), current))?;
            }
        }
        Err(e) => writeln!(out, "  revision: error: {e}")?,
    }
    match descriptor {
        Ok(content) => writeln!(
            out,
            "  build descriptor: {} ({} bytes)",
            project.build_descriptor_path,
            content.len()
        )?,
        Err(VcsError::FileNotFound { .. }) => writeln!(out, "  no build descriptor configured")?,
        Err(e) => writeln!(out, "  build descriptor: error: {e}")?,
    }
    Ok(())
}

/// One `docker ps` lookup: an environment's container on one target.
struct ContainerRow {
    environment: String,
    target: String,
    containers: Result<Vec<ContainerInfo>, EngineError>,
}

/// Prints the containers of one or all projects on every target of every
/// environment they deploy to.
pub async fn containers(
    config: &Config,
    project: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let projects: Vec<&Project> = match project {
        Some(name) => vec![config.project(name)?],
        None => config.projects.iter().collect(),
    };
    let engine = DockerCli::new(&config.docker_binary);
    let mut out = std::io::stdout();

    for project in projects {
        let mut rows = Vec::new();
        for env in config.environments_for(project) {
            let name = container_name(&project.name, &env.name);
            for target in &env.targets {
                let containers = engine.list(target, &name, cancel).await;
                if matches!(containers, Err(EngineError::Cancelled)) {
                    anyhow::bail!("cancelled");
                }
                rows.push(ContainerRow {
                    environment: env.name.clone(),
                    target: target.clone(),
                    containers,
                });
            }
        }
        render_containers(&mut out, project, &rows)?;
    }
    Ok(())
}

fn render_containers(
    out: &mut impl Write,
    project: &Project,
    rows: &[ContainerRow],
) -> std::io::Result<()> {
    writeln!(out, "{}", project.name)?;
    for row in rows {
        match &row.containers {
            Ok(containers) if containers.is_empty() => {
                writeln!(out, "  {} {}: no container", row.environment, row.target)?;
            }
            Ok(containers) => {
                for c in containers {
                    writeln!(
                        out,
                        "  {} {}: {} {} {} ({})",
                        row.environment, row.target, c.name, c.id, c.image, c.status
                    )?;
                }
            }
            Err(e) => writeln!(out, "  {} {}: error: {e}", row.environment, row.target)?,
        }
    }
    Ok(())
}

fn compare(last: Option<&RevisionFingerprint>, current: &RevisionFingerprint) -> &'static str {
    match last {
        Some(last) if last == current => "up to date",
        Some(_) => "changes pending",
        None => "never deployed",
    }
}
