//! SW-008: Remote executor.
//!
//! Carries a compiled plan to one reachable host:
//! prepare (no I/O on the host) → connect + key step, retried while
//! `Connecting` → script step → result. The whole session runs under one
//! deadline; expiry drops the in-flight ssh child, which kills it.

use super::args::plan_arguments;
use super::codegen;
use super::config::ExecutorConfig;
use super::error::{CompileError, ExecutionError};
use super::types::*;
use crate::provenance::{eventlog, hasher};
use crate::transport::ssh::{expand_home, SshTransport};
use crate::transport::{ExecOutput, RemoteShell, SshAuth, SshEndpoint, TransportError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// One plan/target pair for [`Executor::run_many`].
#[derive(Debug, Clone)]
pub struct DeploymentJob {
    pub plan: Arc<ExecutionPlan>,
    pub target: RemoteTarget,
}

/// Runs compiled plans against remote hosts.
pub struct Executor<T: RemoteShell = SshTransport> {
    config: ExecutorConfig,
    transport: Arc<T>,
    event_log: Option<PathBuf>,
}

impl<T: RemoteShell> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            event_log: self.event_log.clone(),
        }
    }
}

impl Executor<SshTransport> {
    /// Executor over the system ssh client.
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_transport(config, SshTransport)
    }
}

impl<T: RemoteShell> Executor<T> {
    pub fn with_transport(config: ExecutorConfig, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            event_log: None,
        }
    }

    /// Append execution events to a JSONL log at `path`.
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the plan's first script on `target`.
    ///
    /// `timeout_secs` bounds the whole session; 0 uses the configured default.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        target: &RemoteTarget,
        timeout_secs: u64,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.execute(plan, None, target, timeout_secs).await
    }

    /// Run the named script of the plan on `target`.
    pub async fn run_script(
        &self,
        plan: &ExecutionPlan,
        script: &str,
        target: &RemoteTarget,
        timeout_secs: u64,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.execute(plan, Some(script), target, timeout_secs).await
    }

    /// Run independent deployments concurrently, one task per job.
    /// Results come back in input order.
    pub async fn run_many(
        &self,
        jobs: Vec<DeploymentJob>,
        timeout_secs: u64,
    ) -> Vec<Result<ExecutionResult, ExecutionError>>
    where
        T: 'static,
    {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let executor = self.clone();
                tokio::spawn(async move { executor.run(&job.plan, &job.target, timeout_secs).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(ExecutionError::WorkerAborted(e.to_string())),
            });
        }
        results
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        script: Option<&str>,
        target: &RemoteTarget,
        timeout_secs: u64,
    ) -> Result<ExecutionResult, ExecutionError> {
        if self.config.disable_agent {
            warn!(host = %target.host, "remote execution disabled by configuration");
            return Err(ExecutionError::AgentDisabled);
        }

        let prepared = self.prepare(plan, script, target)?;
        let timeout_secs = if timeout_secs == 0 {
            self.config.timeout_secs
        } else {
            timeout_secs
        };
        let digest = hasher::hash_plan(plan).map_err(CompileError::InvalidTemplate)?;
        let host = prepared.endpoint.host.clone();

        info!(
            host = %host,
            port = prepared.endpoint.port,
            plan = %prepared.plan_id,
            script = %prepared.script,
            digest = %digest,
            timeout_secs,
            "starting remote execution"
        );
        let mut tracker = StateTracker::new(&host, self.event_log.is_some());
        tracker.note(ExecutionEvent::ExecutionStarted {
            host: host.clone(),
            plan_id: prepared.plan_id.clone(),
            plan_digest: digest,
            script: prepared.script.clone(),
        });

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.session(&prepared, &mut tracker),
        )
        .await
        .unwrap_or(Err(ExecutionError::Timeout(timeout_secs)));

        match outcome {
            Ok((attempts, output)) => {
                tracker.enter(ExecutionState::Succeeded);
                let duration = start.elapsed();
                info!(
                    host = %host,
                    attempts,
                    seconds = duration.as_secs_f64(),
                    "remote execution succeeded"
                );
                tracker.note(ExecutionEvent::ExecutionSucceeded {
                    host: host.clone(),
                    plan_id: prepared.plan_id.clone(),
                    attempts,
                    total_seconds: duration.as_secs_f64(),
                });
                let transitions = self.finish(tracker).await;
                Ok(ExecutionResult {
                    plan_id: prepared.plan_id,
                    script: prepared.script,
                    host,
                    port: prepared.endpoint.port,
                    attempts,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    transitions,
                    duration,
                })
            }
            Err(e) => {
                tracker.enter(ExecutionState::Failed);
                warn!(host = %host, error = %e, "remote execution failed");
                tracker.note(ExecutionEvent::ExecutionFailed {
                    host: host.clone(),
                    plan_id: prepared.plan_id,
                    error: e.to_string(),
                });
                self.finish(tracker).await;
                Err(e)
            }
        }
    }

    /// Everything that can be checked or generated before touching the host.
    fn prepare(
        &self,
        plan: &ExecutionPlan,
        script: Option<&str>,
        target: &RemoteTarget,
    ) -> Result<Prepared, ExecutionError> {
        let plan = match plan {
            ExecutionPlan::Structured(p) => p,
            ExecutionPlan::Legacy(_) => {
                return Err(ExecutionError::NotImplemented(
                    "legacy (v1) plans have no remote execution backend".into(),
                ))
            }
        };

        let (name, descriptor) = match script {
            Some(name) => plan
                .scripts
                .get_key_value(name)
                .ok_or_else(|| CompileError::invalid(format!("plan has no script '{}'", name)))?,
            None => plan
                .scripts
                .first()
                .ok_or_else(|| CompileError::invalid("plan has no scripts"))?,
        };
        if !descriptor.is_application() {
            return Err(ExecutionError::NotImplemented(format!(
                "script '{}' of type '{}' cannot be run remotely",
                name, descriptor.script_type
            )));
        }
        if let Some((script, id)) = plan.dangling_references().into_iter().next() {
            return Err(CompileError::invalid(format!(
                "script '{}' references unknown file '{}'",
                script, id
            ))
            .into());
        }

        let args = plan_arguments(plan)?;
        let host = target
            .address()
            .ok_or_else(|| ExecutionError::InvalidTarget("target has no address".into()))?
            .to_string();
        if target.username.trim().is_empty() {
            return Err(ExecutionError::InvalidTarget(format!(
                "target {} has no username",
                host
            )));
        }

        let public_key = public_key_for(target)?;
        let (identity, key_file) = identity_for(target)?;
        let key_step = codegen::key_install_script(&public_key);
        let script_step =
            codegen::stage_script(plan, descriptor, &args, &self.config.remote_workdir)?;

        debug!(
            host = %host,
            args = args.len(),
            files = descriptor.files.len(),
            "prepared deployment steps"
        );

        Ok(Prepared {
            plan_id: plan.id.clone(),
            script: name.clone(),
            endpoint: SshEndpoint {
                host,
                port: target.port.unwrap_or(self.config.ssh_port),
                user: target.username.clone(),
                auth: SshAuth::Key(identity),
                connect_timeout_secs: self.config.connect_timeout_secs,
            },
            password: target.password.clone().filter(|p| !p.is_empty()),
            key_step,
            script_step,
            _key_file: key_file,
        })
    }

    async fn session(
        &self,
        prepared: &Prepared,
        tracker: &mut StateTracker<'_>,
    ) -> Result<(u32, ExecOutput), ExecutionError> {
        let (attempts, endpoint) = self.install_key(prepared, tracker).await?;

        tracker.enter(ExecutionState::ScriptRunning);
        let output = self
            .transport
            .exec(&endpoint, &prepared.script_step)
            .await
            .map_err(|e| session_error(e, &endpoint.host, attempts))?;
        if !output.success() {
            return Err(ExecutionError::StepFailed {
                step: DeployStep::RunScript,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok((attempts, output))
    }

    /// Connect and run the key step. Returns the attempt count and the
    /// endpoint that authenticated.
    async fn install_key(
        &self,
        prepared: &Prepared,
        tracker: &mut StateTracker<'_>,
    ) -> Result<(u32, SshEndpoint), ExecutionError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut endpoint = prepared.endpoint.clone();
        let mut attempt = 0;

        tracker.enter(ExecutionState::Connecting);
        loop {
            attempt += 1;
            debug!(host = %endpoint.host, attempt, max_attempts, "connecting");

            match self.transport.exec(&endpoint, &prepared.key_step).await {
                Ok(out) if out.success() => {
                    tracker.enter(ExecutionState::KeyStaged);
                    return Ok((attempt, endpoint));
                }
                Ok(out) => {
                    return Err(ExecutionError::StepFailed {
                        step: DeployStep::InstallKey,
                        exit_code: out.exit_code,
                        stderr: out.stderr.trim().to_string(),
                    })
                }
                Err(TransportError::Connection(cause)) => {
                    tracker.note(ExecutionEvent::AttemptFailed {
                        host: endpoint.host.clone(),
                        attempt,
                        error: cause.clone(),
                    });
                    if attempt >= max_attempts {
                        return Err(ExecutionError::ConnectionFailed {
                            host: endpoint.host.clone(),
                            attempts: attempt,
                            cause,
                        });
                    }
                    warn!(
                        host = %endpoint.host,
                        attempt,
                        max_attempts,
                        cause = %cause,
                        "connection failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    tracker.enter(ExecutionState::Connecting);
                }
                Err(TransportError::Auth(cause)) => match &prepared.password {
                    Some(password) if !endpoint.uses_password() => {
                        warn!(host = %endpoint.host, "key authentication rejected, falling back to password");
                        endpoint = endpoint.with_password(password);
                        attempt -= 1;
                    }
                    _ => return Err(session_error(TransportError::Auth(cause), &endpoint.host, attempt)),
                },
                Err(e) => return Err(session_error(e, &endpoint.host, attempt)),
            }
        }
    }

    /// Write the session's buffered events off the async workers and hand
    /// back the recorded transitions. A broken log never fails a deployment.
    async fn finish(&self, tracker: StateTracker<'_>) -> Vec<ExecutionState> {
        let StateTracker {
            transitions,
            events,
            ..
        } = tracker;
        let (Some(path), Some(events)) = (self.event_log.clone(), events) else {
            return transitions;
        };

        let written =
            tokio::task::spawn_blocking(move || eventlog::append_events(&path, &events)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "cannot append execution events"),
            Err(e) => warn!(error = %e, "event log writer aborted"),
        }
        transitions
    }
}

/// Output of [`Executor::prepare`]. Holds the staged private key, if any,
/// until the session ends.
struct Prepared {
    plan_id: String,
    script: String,
    endpoint: SshEndpoint,
    password: Option<String>,
    key_step: String,
    script_step: String,
    _key_file: Option<NamedTempFile>,
}

/// Walks the execution state machine, recording every state entered.
/// Events are stamped when they happen and buffered until the session ends.
struct StateTracker<'a> {
    host: &'a str,
    state: ExecutionState,
    transitions: Vec<ExecutionState>,
    events: Option<Vec<TimestampedEvent>>,
}

impl<'a> StateTracker<'a> {
    fn new(host: &'a str, buffer_events: bool) -> Self {
        Self {
            host,
            state: ExecutionState::Idle,
            transitions: vec![ExecutionState::Idle],
            events: buffer_events.then(Vec::new),
        }
    }

    fn note(&mut self, event: ExecutionEvent) {
        if let Some(events) = &mut self.events {
            events.push(eventlog::stamp(event));
        }
    }

    fn enter(&mut self, next: ExecutionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(host = %self.host, from = %self.state, to = %next, "state change");
        self.note(ExecutionEvent::StateChanged {
            host: self.host.to_string(),
            from: self.state,
            to: next,
        });
        self.state = next;
        self.transitions.push(next);
    }
}

/// Map a transport failure outside the retry loop to an execution error.
fn session_error(err: TransportError, host: &str, attempts: u32) -> ExecutionError {
    match err {
        TransportError::Connection(cause) => ExecutionError::ConnectionFailed {
            host: host.to_string(),
            attempts,
            cause,
        },
        TransportError::Auth(cause) => ExecutionError::AuthRejected(format!("{} ({})", host, cause)),
        TransportError::Unavailable(cause) => ExecutionError::NotImplemented(cause),
    }
}

/// Public key installed by the key step.
fn public_key_for(target: &RemoteTarget) -> Result<String, ExecutionError> {
    if let Some(key) = target.public_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    match &target.private_key {
        Some(KeyMaterial::Path(path)) => {
            let pub_path = format!("{}.pub", expand_home(path));
            let key = std::fs::read_to_string(&pub_path).map_err(|e| {
                ExecutionError::InvalidTarget(format!("cannot read public key {}: {}", pub_path, e))
            })?;
            Ok(key.trim().to_string())
        }
        _ => Err(ExecutionError::InvalidTarget(format!(
            "target {} has no public key to install",
            target.host
        ))),
    }
}

/// Identity file for key auth. Inline key material is written to a 0600
/// temporary file that lives as long as the returned handle.
fn identity_for(
    target: &RemoteTarget,
) -> Result<(Option<PathBuf>, Option<NamedTempFile>), ExecutionError> {
    match &target.private_key {
        None => Ok((None, None)),
        Some(KeyMaterial::Path(path)) => Ok((Some(PathBuf::from(expand_home(path))), None)),
        Some(KeyMaterial::Inline(pem)) => {
            let stage_err =
                |e: std::io::Error| ExecutionError::InvalidTarget(format!("cannot stage private key: {}", e));
            let mut file = NamedTempFile::new().map_err(stage_err)?;
            file.write_all(pem.trim_end().as_bytes()).map_err(stage_err)?;
            file.write_all(b"\n").map_err(stage_err)?;
            file.flush().map_err(stage_err)?;
            Ok((Some(file.path().to_path_buf()), Some(file)))
        }
    }
}
