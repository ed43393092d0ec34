//! Execution lifecycle: admission, hydration, supervision, reconciliation.
//!
//! Every admitted execution runs on its own task which walks the session
//! through `Hydrating -> Running -> Reconciling -> terminal`. The working
//! directory is torn down and the admission claim released *before* the
//! terminal event is sent, so a client that immediately re-executes on
//! `complete` never observes the previous session's resources.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::admission::{AdmissionGuard, AdmissionTable};
use super::SessionEvent;
use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::models::execution::{ExecutionResult, ExecutionSession, ExecutionState, ExecutionStatus};
use crate::process::{ProcessEvent, ProcessSupervisor, SpawnConfig};
use crate::sanitize::{validate_project_id, CommandPolicy};
use crate::sync::{SyncEngine, SyncReport};
use crate::{AppError, Result};

/// An execute request after the transport has attached the verified user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    /// Target project.
    pub project_id: String,
    /// Raw command text from the client.
    pub command: String,
    /// Verified identity of the caller.
    pub user_id: String,
}

/// Direction of a manual file sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Store to working directory.
    Download,
    /// Working directory to store.
    Upload,
}

struct LiveSession {
    session: ExecutionSession,
    supervisor: Arc<ProcessSupervisor>,
    cancel: CancellationToken,
}

struct ManagerInner {
    spawn: SpawnConfig,
    policy: Arc<CommandPolicy>,
    sync: Arc<SyncEngine>,
    audit: Arc<dyn AuditLogger>,
    admission: AdmissionTable,
    sessions: Mutex<HashMap<String, LiveSession>>,
    /// Projects hydrated by a manual download, keyed to the downloading user.
    downloads: Mutex<HashMap<String, String>>,
}

/// Owns all live executions. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Construct a manager with no live sessions.
    #[must_use]
    pub fn new(
        spawn: SpawnConfig,
        policy: Arc<CommandPolicy>,
        sync: Arc<SyncEngine>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                spawn,
                policy,
                sync,
                audit,
                admission: AdmissionTable::new(),
                sessions: Mutex::new(HashMap::new()),
                downloads: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate and admit an execution, then run it in the background.
    ///
    /// `execution_started` is sent on `events` before this returns; output
    /// and the terminal event follow from the session task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a bad project id or command and
    /// `AppError::AdmissionRejected` if the project already has a live
    /// session. Nothing is spawned in either case.
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<String> {
        let ExecuteRequest {
            project_id,
            command,
            user_id,
        } = request;

        let admitted = validate_project_id(&project_id)
            .and_then(|_| self.inner.policy.validate(&command))
            .and_then(|command| {
                let session = ExecutionSession::new(project_id.clone(), user_id.clone(), command);
                let guard = self.inner.admission.try_claim(&project_id, &session.id)?;
                Ok((session, guard))
            });

        let (session, guard) = match admitted {
            Ok(admitted) => admitted,
            Err(err) => {
                info!(%project_id, %user_id, %err, "execute rejected");
                self.audit(
                    AuditEntry::new(AuditEventType::ExecutionRejected, &user_id, &project_id)
                        .with_error(err.to_string()),
                );
                return Err(err);
            }
        };

        let execution_id = session.id.clone();
        let supervisor = Arc::new(ProcessSupervisor::new(self.inner.spawn.clone()));
        let cancel = CancellationToken::new();

        lock(&self.inner.downloads).remove(&project_id);
        lock(&self.inner.sessions).insert(
            execution_id.clone(),
            LiveSession {
                session: session.clone(),
                supervisor: Arc::clone(&supervisor),
                cancel: cancel.clone(),
            },
        );

        info!(%project_id, %user_id, %execution_id, "execution admitted");
        self.audit(
            AuditEntry::new(AuditEventType::ExecutionAdmitted, &user_id, &project_id)
                .with_execution(&execution_id)
                .with_command(&session.command),
        );

        emit(
            &events,
            SessionEvent::Started {
                execution_id: execution_id.clone(),
                project_id: project_id.clone(),
            },
        )
        .await;

        let span = info_span!("execute", %project_id, %execution_id);
        let task = SessionTask {
            manager: self.clone(),
            session,
            guard: Some(guard),
            supervisor,
            cancel,
            events,
        };
        tokio::spawn(task.run().instrument(span));

        Ok(execution_id)
    }

    /// Stop an execution owned by `user_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown (or finished) execution,
    /// `AppError::Unauthorized` if `user_id` does not own it, and
    /// `AppError::Runtime` once the process has exited and reconciliation
    /// is under way.
    pub fn stop(&self, execution_id: &str, user_id: &str) -> Result<()> {
        let project_id = {
            let sessions = lock(&self.inner.sessions);
            let live = owned(&sessions, execution_id, user_id)?;
            if live.cancel.is_cancelled() {
                debug!(execution_id, "stop already requested");
                return Ok(());
            }
            // The task only observes the token up to the end of `Running`.
            if !live.session.state.accepts_stop() {
                return Err(AppError::Runtime(format!(
                    "execution {execution_id} has already finished running"
                )));
            }
            live.cancel.cancel();
            live.session.project_id.clone()
        };

        info!(execution_id, user_id, "execution stop requested");
        self.audit(
            AuditEntry::new(AuditEventType::ExecutionStopped, user_id, &project_id)
                .with_execution(execution_id),
        );
        Ok(())
    }

    /// Forward `data` to the execution's stdin, closing it afterwards when
    /// `eof` is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::Unauthorized`, or
    /// `AppError::Runtime` if the process is not accepting input.
    pub async fn send_input(
        &self,
        execution_id: &str,
        user_id: &str,
        data: String,
        eof: bool,
    ) -> Result<()> {
        let supervisor = {
            let sessions = lock(&self.inner.sessions);
            Arc::clone(&owned(&sessions, execution_id, user_id)?.supervisor)
        };

        if !data.is_empty() {
            supervisor.send_input(data).await?;
        }
        if eof {
            supervisor.close_input();
        }
        Ok(())
    }

    /// Manual `file:sync` trigger. Holds the project's admission claim for
    /// the duration of the transfer.
    ///
    /// `Download` hydrates the working directory and reports the downloaded
    /// paths as `changed`. `Upload` reconciles a previously downloaded
    /// directory and tears it down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation`, `AppError::AdmissionRejected`,
    /// `AppError::NotFound` when uploading without a working directory,
    /// `AppError::Unauthorized` when another user downloaded it, or the
    /// underlying sync/store failure.
    pub async fn sync_files(
        &self,
        project_id: &str,
        user_id: &str,
        action: SyncAction,
    ) -> Result<SyncReport> {
        validate_project_id(project_id)?;
        let holder = format!("sync:{user_id}");
        let _guard = self.inner.admission.try_claim(project_id, &holder)?;
        let started = std::time::Instant::now();

        let span = info_span!("sync_files", project_id, user_id, ?action);
        let outcome = self
            .transfer(project_id, user_id, action)
            .instrument(span)
            .await;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut entry = AuditEntry::new(AuditEventType::FileSync, user_id, project_id)
            .with_command(match action {
                SyncAction::Download => "download",
                SyncAction::Upload => "upload",
            })
            .with_duration(duration_ms);
        match &outcome {
            Ok(report) if !report.is_clean() => {
                entry = entry.with_error(format!("{} file(s) failed", report.failures.len()));
            }
            Ok(_) => {}
            Err(err) => entry = entry.with_error(err.to_string()),
        }
        self.audit(entry);

        outcome
    }

    async fn transfer(&self, project_id: &str, user_id: &str, action: SyncAction) -> Result<SyncReport> {
        let sync = &self.inner.sync;
        match action {
            SyncAction::Download => {
                let hydration = sync.download(project_id).await?;
                lock(&self.inner.downloads).insert(project_id.to_owned(), user_id.to_owned());
                info!(files = hydration.files.len(), "manual download finished");
                Ok(SyncReport {
                    changed: hydration.files.into_iter().map(|f| f.path).collect(),
                    ..SyncReport::default()
                })
            }
            SyncAction::Upload => {
                if !sync.workspace().exists(project_id).await {
                    return Err(AppError::NotFound(format!(
                        "no working directory for project {project_id}"
                    )));
                }
                if let Some(owner) = lock(&self.inner.downloads).get(project_id) {
                    if owner != user_id {
                        return Err(AppError::Unauthorized(
                            "working directory belongs to another user".into(),
                        ));
                    }
                }

                let root = sync.workspace().root_for(project_id)?;
                let report = sync.reconcile(project_id, &root).await;
                sync.workspace().teardown(project_id).await;
                lock(&self.inner.downloads).remove(project_id);
                report
            }
        }
    }

    /// Snapshot of every live execution, oldest first.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<ExecutionSession> {
        let mut sessions: Vec<ExecutionSession> = lock(&self.inner.sessions)
            .values()
            .map(|live| live.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Snapshot of one live execution.
    #[must_use]
    pub fn session(&self, execution_id: &str) -> Option<ExecutionSession> {
        lock(&self.inner.sessions)
            .get(execution_id)
            .map(|live| live.session.clone())
    }

    /// Whether `project_id` is claimed by an execution or a manual sync.
    #[must_use]
    pub fn is_active(&self, project_id: &str) -> bool {
        self.inner.admission.is_claimed(project_id)
    }

    /// Stop every live execution and wait up to `timeout` for them to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        let pending: Vec<String> = {
            let sessions = lock(&self.inner.sessions);
            for live in sessions.values() {
                live.cancel.cancel();
            }
            sessions.keys().cloned().collect()
        };
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "stopping live executions");
        let drained = tokio::time::timeout(timeout, async {
            while !lock(&self.inner.sessions).is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("executions still running at shutdown deadline");
        }
    }

    fn publish(&self, session: &ExecutionSession) {
        if let Some(live) = lock(&self.inner.sessions).get_mut(&session.id) {
            live.session = session.clone();
        }
    }

    fn audit(&self, entry: AuditEntry) {
        if let Err(err) = self.inner.audit.log_entry(entry) {
            warn!(%err, "failed to write audit entry");
        }
    }
}

fn owned<'a>(
    sessions: &'a HashMap<String, LiveSession>,
    execution_id: &str,
    user_id: &str,
) -> Result<&'a LiveSession> {
    let live = sessions
        .get(execution_id)
        .ok_or_else(|| AppError::NotFound(format!("execution {execution_id} not found")))?;
    if live.session.user_id != user_id {
        return Err(AppError::Unauthorized(
            "execution belongs to another user".into(),
        ));
    }
    Ok(live)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if events.send(event).await.is_err() {
        debug!("client gone, event discarded");
    }
}

/// How the supervised process ended, as seen by the session.
enum RunOutcome {
    Exited(ProcessEvent),
    Cancelled(Option<i32>),
    Lost,
}

/// State owned by one session's background task.
struct SessionTask {
    manager: SessionManager,
    session: ExecutionSession,
    guard: Option<AdmissionGuard>,
    supervisor: Arc<ProcessSupervisor>,
    cancel: CancellationToken,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionTask {
    async fn run(mut self) {
        let sync = Arc::clone(&self.manager.inner.sync);
        let project_id = self.session.project_id.clone();

        self.advance(ExecutionState::Hydrating);
        let hydration = match sync.download(&project_id).await {
            Ok(hydration) => hydration,
            Err(err) => return self.fail(err).await,
        };

        if self.cancel.is_cancelled() {
            emit(
                &self.events,
                SessionEvent::Stopped {
                    execution_id: self.session.id.clone(),
                },
            )
            .await;
            return self
                .finish(
                    ExecutionState::Cancelled,
                    ExecutionStatus::Cancelled,
                    None,
                    SyncReport::default(),
                    None,
                )
                .await;
        }

        let rx = match self.supervisor.run(&self.session.command, &hydration.root) {
            Ok(rx) => rx,
            Err(err) => return self.fail(err).await,
        };
        self.advance(ExecutionState::Running);

        let outcome = self.forward(rx).await;

        self.advance(ExecutionState::Reconciling);
        let outcome = self.honor_late_stop(outcome).await;
        let reconciled = sync.reconcile(&project_id, &hydration.root).await;
        self.settle(outcome, reconciled).await;
    }

    /// Relay process output until the terminal event.
    async fn forward(&mut self, mut rx: mpsc::Receiver<ProcessEvent>) -> RunOutcome {
        let mut stopped = false;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled(), if !stopped => {
                    stopped = true;
                    self.supervisor.stop();
                    emit(&self.events, SessionEvent::Stopped { execution_id: self.session.id.clone() }).await;
                }
                event = rx.recv() => match event {
                    Some(ProcessEvent::Output(chunk)) => {
                        if stopped {
                            continue;
                        }
                        self.session.output_seq += 1;
                        emit(&self.events, SessionEvent::Output { execution_id: self.session.id.clone(), chunk }).await;
                    }
                    Some(terminal) if stopped => {
                        let exit_code = match terminal {
                            ProcessEvent::Completed { exit_code } => Some(exit_code),
                            ProcessEvent::Failed { exit_code, .. } | ProcessEvent::Terminated { exit_code } => exit_code,
                            ProcessEvent::Output(_) => None,
                        };
                        return RunOutcome::Cancelled(exit_code);
                    }
                    Some(terminal) => return RunOutcome::Exited(terminal),
                    None => return RunOutcome::Lost,
                },
            }
        }
    }

    /// A stop accepted after the process exited but before `Reconciling` was
    /// published is still acknowledged. `publish` and `stop` share the
    /// sessions lock, so no stop can be accepted once this check runs.
    async fn honor_late_stop(&self, outcome: RunOutcome) -> RunOutcome {
        if matches!(outcome, RunOutcome::Cancelled(_)) || !self.cancel.is_cancelled() {
            return outcome;
        }
        debug!("stop arrived as the process exited");
        emit(
            &self.events,
            SessionEvent::Stopped {
                execution_id: self.session.id.clone(),
            },
        )
        .await;
        match outcome {
            RunOutcome::Exited(ProcessEvent::Completed { exit_code }) => {
                RunOutcome::Cancelled(Some(exit_code))
            }
            RunOutcome::Exited(
                ProcessEvent::Failed { exit_code, .. } | ProcessEvent::Terminated { exit_code },
            ) => RunOutcome::Cancelled(exit_code),
            other => other,
        }
    }

    async fn settle(self, outcome: RunOutcome, reconciled: Result<SyncReport>) {
        let (report, sync_error) = match reconciled {
            Ok(report) => (report, None),
            Err(err) => {
                warn!(%err, "reconciliation failed");
                (SyncReport::default(), Some(err.to_string()))
            }
        };

        let (state, status, exit_code, error) = match outcome {
            RunOutcome::Cancelled(exit_code) => {
                (ExecutionState::Cancelled, ExecutionStatus::Cancelled, exit_code, sync_error)
            }
            RunOutcome::Exited(ProcessEvent::Completed { exit_code }) => match sync_error {
                Some(error) => (ExecutionState::Failed, ExecutionStatus::Failed, Some(exit_code), Some(error)),
                None if report.is_clean() => {
                    (ExecutionState::Completed, ExecutionStatus::Success, Some(exit_code), None)
                }
                None => (ExecutionState::Completed, ExecutionStatus::Partial, Some(exit_code), None),
            },
            RunOutcome::Exited(ProcessEvent::Failed { exit_code, error }) => {
                (ExecutionState::Failed, ExecutionStatus::Failed, exit_code, Some(error))
            }
            RunOutcome::Exited(ProcessEvent::Terminated { exit_code }) => {
                (ExecutionState::Cancelled, ExecutionStatus::Cancelled, exit_code, sync_error)
            }
            RunOutcome::Exited(ProcessEvent::Output(_)) | RunOutcome::Lost => (
                ExecutionState::Failed,
                ExecutionStatus::Failed,
                None,
                Some("process event stream closed unexpectedly".to_owned()),
            ),
        };

        self.finish(state, status, exit_code, report, error).await;
    }

    /// Hydration or spawn failure: nothing ran, report the error.
    async fn fail(mut self, err: AppError) {
        warn!(%err, "execution failed before running");
        let sync = Arc::clone(&self.manager.inner.sync);
        sync.workspace().teardown(&self.session.project_id).await;

        self.advance(ExecutionState::Failed);
        self.release();
        self.manager.audit(
            AuditEntry::new(
                AuditEventType::ExecutionCompleted,
                &self.session.user_id,
                &self.session.project_id,
            )
            .with_execution(&self.session.id)
            .with_duration(self.session.duration_ms())
            .with_error(err.to_string()),
        );

        emit(
            &self.events,
            SessionEvent::Failed {
                execution_id: self.session.id.clone(),
                code: err.code(),
                message: err.message().to_owned(),
            },
        )
        .await;
    }

    async fn finish(
        mut self,
        state: ExecutionState,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        report: SyncReport,
        error: Option<String>,
    ) {
        let sync = Arc::clone(&self.manager.inner.sync);
        sync.workspace().teardown(&self.session.project_id).await;

        self.session.exit_code = exit_code;
        self.session.files_changed.clone_from(&report.changed);
        self.advance(state);
        self.release();

        let result = ExecutionResult {
            execution_id: self.session.id.clone(),
            status,
            exit_code,
            files_changed: report.changed,
            files_deleted: report.deleted,
            sync_failures: report.failures,
            duration_ms: self.session.duration_ms(),
            error,
        };

        info!(
            ?status,
            exit_code,
            changed = result.files_changed.len(),
            failures = result.sync_failures.len(),
            duration_ms = result.duration_ms,
            "execution finished"
        );

        let mut entry = AuditEntry::new(
            AuditEventType::ExecutionCompleted,
            &self.session.user_id,
            &self.session.project_id,
        )
        .with_execution(&self.session.id)
        .with_command(&self.session.command)
        .with_duration(result.duration_ms);
        if status != ExecutionStatus::Success {
            entry = entry.with_error(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{status:?}").to_lowercase()),
            );
        }
        self.manager.audit(entry);

        emit(&self.events, SessionEvent::Completed(result)).await;
    }

    fn advance(&mut self, next: ExecutionState) {
        if let Err(err) = self.session.transition(next) {
            warn!(%err, "unexpected state transition");
            self.session.state = next;
        }
        debug!(state = ?next, "execution state changed");
        self.manager.publish(&self.session);
    }

    /// Forget the session and release the project claim.
    fn release(&mut self) {
        lock(&self.manager.inner.sessions).remove(&self.session.id);
        self.guard.take();
    }
}

impl Drop for SessionTask {
    fn drop(&mut self) {
        self.release();
    }
}
