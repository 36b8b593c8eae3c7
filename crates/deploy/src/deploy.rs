//! Deploy orchestrator.
//!
//! One [`DeployOrchestrator::deploy`] call is one attempt for a
//! (project, environment) pair: resolve the revision, skip when nothing
//! changed, build once, then deploy target by target. Step failures are
//! collected into the [`DeployOutcome`] instead of being returned.
//!
//! The orchestrator holds no per-attempt state, so concurrent calls for
//! different pairs may share one instance.

use std::sync::Arc;

use dockwright_vcs::{ResolvedRevision, VcsProvider, resolve_revision};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::ContainerEngine;
use crate::error::{DeployError, DeployStep, EngineError, StepError};
use crate::progress::Progress;
use crate::types::{
    BuildRequest, DeployEvent, DeployOutcome, DeployRequest, DeployState, DeployTargetRequest,
    image_tag,
};

/// Capacity of the event channel; events beyond it are dropped.
const EVENT_CAPACITY: usize = 256;

/// Drives deploy attempts against a VCS provider and a container engine.
pub struct DeployOrchestrator {
    provider: Arc<dyn VcsProvider>,
    engine: Arc<dyn ContainerEngine>,
    events_tx: mpsc::Sender<DeployEvent>,
    events_rx: Option<mpsc::Receiver<DeployEvent>>,
}

impl DeployOrchestrator {
    pub fn new(provider: Arc<dyn VcsProvider>, engine: Arc<dyn ContainerEngine>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            provider,
            engine,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<DeployEvent>> {
        self.events_rx.take()
    }

    /// Runs one deploy attempt.
    ///
    /// Returns `Err` only for requests that break the contract (see
    /// [`DeployError::InvalidRequest`]). Everything else, including a failed
    /// revision resolution, is reported in [`DeployOutcome::errors`].
    pub async fn deploy(
        &self,
        request: &DeployRequest<'_>,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, DeployError> {
        validate(request)?;

        let mut attempt = Attempt::new(self, request);
        attempt.transition(DeployState::Pending);
        attempt.transition(DeployState::ResolvingRevision);

        let revision = match resolve_revision(self.provider.as_ref(), request.project, cancel).await
        {
            Ok(revision) => revision,
            Err(source) => {
                error!(
                    project = %attempt.outcome.project,
                    error = %source,
                    "revision resolution failed"
                );
                attempt.outcome.errors.push(DeployError::Revision {
                    project: attempt.outcome.project.clone(),
                    source,
                });
                return Ok(attempt.finish(DeployState::Failed));
            }
        };
        attempt.outcome.revision = Some(revision.fingerprint.clone());

        if !request.force && request.previous.as_ref() == Some(&revision.fingerprint) {
            info!(
                project = %attempt.outcome.project,
                environment = %attempt.outcome.environment,
                revision = %revision.fingerprint.short(),
                "no changes since last deploy, skipping"
            );
            return Ok(attempt.finish(DeployState::SkippedNoChange));
        }

        let mut progress = Progress::new(sink);
        let image = image_tag(&request.project.name, &revision.fingerprint);

        attempt.transition(DeployState::Building);
        if let Err(source) = self
            .build(request, &revision, &image, &mut progress, cancel)
            .await
        {
            attempt.step_failed(DeployStep::Build, None, source);
            return Ok(attempt.finish(DeployState::Failed));
        }

        attempt.transition(DeployState::Deploying);
        for target in &request.environment.targets {
            let result = if cancel.is_cancelled() {
                Err(EngineError::Cancelled)
            } else {
                let target_request = DeployTargetRequest {
                    project: request.project.name.clone(),
                    environment: request.environment.name.clone(),
                    image: image.clone(),
                    target: target.clone(),
                };
                progress
                    .line(&format!("==> deploying {image} to {target}"))
                    .await;
                self.engine
                    .deploy(&target_request, &mut progress, cancel)
                    .await
            };

            if let Err(e) = result {
                let cancelled = matches!(e, EngineError::Cancelled);
                attempt.step_failed(DeployStep::Deploy, Some(target.clone()), e.into());
                if cancelled {
                    break;
                }
            }
        }

        progress.flush().await;
        let state = if attempt.outcome.errors.is_empty() {
            DeployState::Succeeded
        } else {
            DeployState::Failed
        };
        Ok(attempt.finish(state))
    }

    async fn build(
        &self,
        request: &DeployRequest<'_>,
        revision: &ResolvedRevision,
        image: &str,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }

        let project = request.project;
        let build = BuildRequest {
            project: project.name.clone(),
            repository: project.repository.clone(),
            commit: revision.primary.clone(),
            descriptor_path: project.build_descriptor_path.clone(),
            image: image.to_string(),
            no_cache: project.no_cache,
            targets: request.environment.targets.clone(),
        };

        progress
            .line(&format!(
                "==> building {image} from {} at {}",
                project.repository, revision.primary
            ))
            .await;
        debug!(
            engine = self.engine.name(),
            project = %project.name,
            image,
            "build started"
        );
        self.engine.build(&build, progress, cancel).await?;
        Ok(())
    }
}

fn validate(request: &DeployRequest<'_>) -> Result<(), DeployError> {
    let environment = &request.environment.name;
    if environment.trim().is_empty() {
        return Err(DeployError::InvalidRequest(format!(
            "project '{}': environment name is empty",
            request.project.name
        )));
    }
    if request.environment.targets.is_empty() {
        return Err(DeployError::InvalidRequest(format!(
            "environment '{environment}' has no targets"
        )));
    }
    if !request.project.allows_environment(environment) {
        return Err(DeployError::InvalidRequest(format!(
            "project '{}' cannot be deployed to '{environment}'",
            request.project.name
        )));
    }
    Ok(())
}

/// Bookkeeping for one running attempt.
struct Attempt<'o> {
    events_tx: &'o mpsc::Sender<DeployEvent>,
    outcome: DeployOutcome,
}

impl<'o> Attempt<'o> {
    fn new(orchestrator: &'o DeployOrchestrator, request: &DeployRequest<'_>) -> Self {
        Self {
            events_tx: &orchestrator.events_tx,
            outcome: DeployOutcome {
                project: request.project.name.clone(),
                environment: request.environment.name.clone(),
                state: DeployState::Pending,
                revision: None,
                errors: Vec::new(),
            },
        }
    }

    fn transition(&mut self, state: DeployState) {
        debug!(
            project = %self.outcome.project,
            environment = %self.outcome.environment,
            from = %self.outcome.state,
            to = %state,
            "deploy state"
        );
        self.outcome.state = state;
        // Nobody may be listening; a full or closed channel is not an error.
        let _ = self.events_tx.try_send(DeployEvent::StateChanged {
            project: self.outcome.project.clone(),
            environment: self.outcome.environment.clone(),
            state,
        });
    }

    fn step_failed(&mut self, step: DeployStep, target: Option<String>, source: StepError) {
        error!(
            project = %self.outcome.project,
            environment = %self.outcome.environment,
            %step,
            host = target.as_deref().unwrap_or("-"),
            error = %source,
            "deploy step failed"
        );
        let _ = self.events_tx.try_send(DeployEvent::StepFailed {
            project: self.outcome.project.clone(),
            environment: self.outcome.environment.clone(),
            step,
            target: target.clone(),
            error: source.to_string(),
        });
        self.outcome.errors.push(DeployError::StepFailed {
            project: self.outcome.project.clone(),
            environment: self.outcome.environment.clone(),
            step,
            target,
            source,
        });
    }

    fn finish(mut self, state: DeployState) -> DeployOutcome {
        self.transition(state);
        if state == DeployState::Succeeded {
            info!(
                project = %self.outcome.project,
                environment = %self.outcome.environment,
                "deploy completed"
            );
        }
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use dockwright_vcs::{
        BoxFuture, CommitRef, Project, RepositoryAddress, RevisionFingerprint, VcsError,
    };

    use crate::types::{ContainerInfo, Environment};

    struct MockProvider {
        commits: Mutex<HashMap<String, String>>,
    }

    impl MockProvider {
        fn new(commits: &[(&str, &str)]) -> Self {
            Self {
                commits: Mutex::new(
                    commits
                        .iter()
                        .map(|(a, c)| (a.to_string(), c.to_string()))
                        .collect(),
                ),
            }
        }
    }

    impl VcsProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn resolve_last_commit<'a>(
            &'a self,
            address: &'a RepositoryAddress,
            cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<CommitRef, VcsError>> {
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return Err(VcsError::Cancelled);
                }
                let key = address.to_string();
                self.commits
                    .lock()
                    .unwrap()
                    .get(&key)
                    .map(CommitRef::new)
                    .ok_or(VcsError::RepositoryNotFound(key))
            })
        }

        fn fetch_file<'a>(
            &'a self,
            address: &'a RepositoryAddress,
            path: &'a str,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<Vec<u8>, VcsError>> {
            Box::pin(async move {
                Err(VcsError::FileNotFound {
                    repository: address.to_string(),
                    path: path.to_string(),
                })
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Build { image: String, commit: String },
        Deploy { target: String },
    }

    #[derive(Default)]
    struct MockEngine {
        calls: Mutex<Vec<Call>>,
        fail_build: bool,
        fail_targets: Vec<String>,
        /// Cancels this token when deploying to the given target.
        cancel_on: Option<(String, CancellationToken)>,
    }

    impl MockEngine {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ContainerEngine for MockEngine {
        fn name(&self) -> &str {
            "mock"
        }

        fn build<'a>(
            &'a self,
            request: &'a BuildRequest,
            progress: &'a mut Progress<'_>,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<(), EngineError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(Call::Build {
                    image: request.image.clone(),
                    commit: request.commit.to_string(),
                });
                progress.line("building...").await;
                if self.fail_build {
                    return Err(EngineError::Other("descriptor syntax error".into()));
                }
                Ok(())
            })
        }

        fn deploy<'a>(
            &'a self,
            request: &'a DeployTargetRequest,
            progress: &'a mut Progress<'_>,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<(), EngineError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(Call::Deploy {
                    target: request.target.clone(),
                });
                progress.line("starting container").await;
                if let Some((target, token)) = &self.cancel_on {
                    if *target == request.target {
                        token.cancel();
                        return Err(EngineError::Cancelled);
                    }
                }
                if self.fail_targets.contains(&request.target) {
                    return Err(EngineError::Other(format!("{} unreachable", request.target)));
                }
                Ok(())
            })
        }

        fn list<'a>(
            &'a self,
            _target: &'a str,
            _name: &'a str,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<Vec<ContainerInfo>, EngineError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    const PRIMARY: &str = "git@github.com:org/web.git";
    const RELATED: &str = "git@github.com:org/lib.git";

    fn project() -> Project {
        Project::new("web", RepositoryAddress::parse(PRIMARY).unwrap())
            .with_related([RepositoryAddress::parse(RELATED).unwrap()])
    }

    fn live() -> Environment {
        Environment::new("live", ["tcp://a:2375", "tcp://b:2375"])
    }

    fn provider() -> Arc<MockProvider> {
        Arc::new(MockProvider::new(&[(PRIMARY, "c1"), (RELATED, "r1")]))
    }

    fn current_revision() -> RevisionFingerprint {
        dockwright_vcs::fingerprint(&CommitRef::new("c1"), &[CommitRef::new("r1")])
    }

    fn request<'a>(
        project: &'a Project,
        environment: &'a Environment,
        previous: Option<RevisionFingerprint>,
        force: bool,
    ) -> DeployRequest<'a> {
        DeployRequest {
            project,
            environment,
            previous,
            force,
        }
    }

    #[tokio::test]
    async fn unchanged_revision_is_skipped_without_output() {
        let engine = Arc::new(MockEngine::default());
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(
                &request(&project, &env, Some(current_revision()), false),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::SkippedNoChange);
        assert!(outcome.errors.is_empty());
        assert!(outcome.is_success());
        assert_eq!(outcome.revision, Some(current_revision()));
        assert!(engine.calls().is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn force_runs_build_and_deploy_on_unchanged_revision() {
        let engine = Arc::new(MockEngine::default());
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(
                &request(&project, &env, Some(current_revision()), true),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Succeeded);
        assert!(outcome.errors.is_empty());
        let image = format!("web:{}", current_revision().short());
        assert_eq!(
            engine.calls(),
            vec![
                Call::Build {
                    image,
                    commit: "c1".into()
                },
                Call::Deploy {
                    target: "tcp://a:2375".into()
                },
                Call::Deploy {
                    target: "tcp://b:2375".into()
                },
            ]
        );
        let out = String::from_utf8(sink).unwrap();
        assert!(out.contains("building..."));
        assert!(out.contains("starting container"));
    }

    #[tokio::test]
    async fn changed_revision_deploys_without_force() {
        let engine = Arc::new(MockEngine::default());
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();
        let stale = RevisionFingerprint::from_hex("00");

        let outcome = orchestrator
            .deploy(
                &request(&project, &env, Some(stale), false),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state, DeployState::Succeeded);
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn build_failure_skips_deploy() {
        let engine = Arc::new(MockEngine {
            fail_build: true,
            ..Default::default()
        });
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(&request(&project, &env, None, false), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Failed);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].step(), Some(DeployStep::Build));
        assert!(
            engine
                .calls()
                .iter()
                .all(|c| matches!(c, Call::Build { .. }))
        );
    }

    #[tokio::test]
    async fn target_failures_are_collected() {
        let engine = Arc::new(MockEngine {
            fail_targets: vec!["tcp://a:2375".into()],
            ..Default::default()
        });
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(&request(&project, &env, None, false), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Failed);
        assert_eq!(outcome.errors.len(), 1);
        match &outcome.errors[0] {
            DeployError::StepFailed {
                project,
                environment,
                step,
                target,
                ..
            } => {
                assert_eq!(project, "web");
                assert_eq!(environment, "live");
                assert_eq!(*step, DeployStep::Deploy);
                assert_eq!(target.as_deref(), Some("tcp://a:2375"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // The second target still ran.
        assert!(engine.calls().contains(&Call::Deploy {
            target: "tcp://b:2375".into()
        }));
    }

    #[tokio::test]
    async fn revision_failure_is_the_only_error() {
        let engine = Arc::new(MockEngine::default());
        let provider = Arc::new(MockProvider::new(&[(PRIMARY, "c1")]));
        let orchestrator = DeployOrchestrator::new(provider, engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(&request(&project, &env, None, true), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Failed);
        assert_eq!(outcome.revision, None);
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            &outcome.errors[0],
            DeployError::Revision {
                source: VcsError::RepositoryNotFound(_),
                ..
            }
        ));
        assert!(engine.calls().is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_deploy_ends_attempt() {
        let cancel = CancellationToken::new();
        let engine = Arc::new(MockEngine {
            cancel_on: Some(("tcp://a:2375".into(), cancel.clone())),
            ..Default::default()
        });
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(&request(&project, &env, None, false), &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Failed);
        assert_eq!(outcome.errors.len(), 1);
        match &outcome.errors[0] {
            DeployError::StepFailed { source, .. } => assert!(source.is_cancelled()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!engine.calls().contains(&Call::Deploy {
            target: "tcp://b:2375".into()
        }));
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_revision() {
        let engine = Arc::new(MockEngine::default());
        let orchestrator = DeployOrchestrator::new(provider(), engine.clone());
        let (project, env) = (project(), live());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink: Vec<u8> = Vec::new();

        let outcome = orchestrator
            .deploy(&request(&project, &env, None, false), &mut sink, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            &outcome.errors[0],
            DeployError::Revision {
                source: VcsError::Cancelled,
                ..
            }
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn contract_violations_are_rejected() {
        let orchestrator =
            DeployOrchestrator::new(provider(), Arc::new(MockEngine::default()));
        let mut sink: Vec<u8> = Vec::new();
        let cancel = CancellationToken::new();
        let project = project();

        let unnamed = Environment::new("", ["tcp://a:2375"]);
        let err = orchestrator
            .deploy(&request(&project, &unnamed, None, false), &mut sink, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidRequest(_)));

        let empty = Environment::new("live", Vec::<String>::new());
        let err = orchestrator
            .deploy(&request(&project, &empty, None, false), &mut sink, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidRequest(_)));

        let restricted = project.clone().with_environments(["staging"]);
        let env = live();
        let err = orchestrator
            .deploy(&request(&restricted, &env, None, false), &mut sink, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn state_changes_are_emitted() {
        let mut orchestrator =
            DeployOrchestrator::new(provider(), Arc::new(MockEngine::default()));
        let mut events = orchestrator.take_events().unwrap();
        assert!(orchestrator.take_events().is_none());
        let (project, env) = (project(), live());
        let mut sink: Vec<u8> = Vec::new();

        orchestrator
            .deploy(&request(&project, &env, None, false), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DeployEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                DeployState::Pending,
                DeployState::ResolvingRevision,
                DeployState::Building,
                DeployState::Deploying,
                DeployState::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_attempts_share_one_orchestrator() {
        let orchestrator = Arc::new(DeployOrchestrator::new(
            provider(),
            Arc::new(MockEngine::default()),
        ));
        let mut handles = Vec::new();
        for name in ["live", "staging"] {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                let project = project();
                let env = Environment::new(name, ["tcp://a:2375"]);
                let mut sink: Vec<u8> = Vec::new();
                orchestrator
                    .deploy(&request(&project, &env, None, false), &mut sink, &CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
    }
}
