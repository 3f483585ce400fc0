//! Run Manager - supervised background execution of workflow runs.
//!
//! Each run is a spawned task owning:
//! - A cancellation token (cancel endpoint, shutdown, optional deadline)
//! - The progress log of its upload
//! - A terminal marker written on success, failure and cancellation alike
//!
//! At most one run per upload is active at a time.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{Agent, AgentError, AgentEvent};
use crate::progress::{rule, ProgressLog};
use crate::uploads::{FileStore, StoreError, UploadId};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Upload {0} not found")]
    NotFound(UploadId),

    #[error("Upload {0} is already being processed")]
    AlreadyRunning(UploadId),
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One end-to-end execution for a single upload.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub upload_id: UploadId,
    pub log_path: PathBuf,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Final report, once completed
    pub output: Option<String>,
    /// Failure or cancellation reason
    pub error: Option<String>,
}

impl WorkflowRun {
    fn start(upload_id: UploadId, log_path: PathBuf) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            upload_id,
            log_path,
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            output: None,
            error: None,
        }
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.state = outcome.state;
        self.output = outcome.output;
        self.error = outcome.error;
        self.finished_at = Some(Utc::now());
    }
}

/// How a run ended.
#[derive(Debug)]
struct RunOutcome {
    state: RunState,
    output: Option<String>,
    error: Option<String>,
}

impl RunOutcome {
    fn completed(output: String) -> Self {
        Self {
            state: RunState::Completed,
            output: Some(output),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            state: RunState::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            state: RunState::Cancelled,
            output: None,
            error: Some(reason.into()),
        }
    }
}

struct RunEntry {
    run: WorkflowRun,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Starts, tracks and cancels workflow runs.
#[derive(Clone)]
pub struct RunManager {
    agent: Arc<Agent>,
    uploads: FileStore,
    timeout: Option<Duration>,
    runs: Arc<RwLock<HashMap<UploadId, RunEntry>>>,
}

impl RunManager {
    pub fn new(agent: Arc<Agent>, uploads: FileStore, timeout: Option<Duration>) -> Self {
        Self {
            agent,
            uploads,
            timeout,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Start a detached run for `upload_id` and return immediately.
    pub async fn start(&self, upload_id: UploadId) -> Result<WorkflowRun, StartError> {
        if !self.uploads.exists(upload_id).await {
            return Err(StartError::NotFound(upload_id));
        }

        let mut runs = self.runs.write().await;
        if runs
            .get(&upload_id)
            .is_some_and(|entry| entry.run.state == RunState::Running)
        {
            return Err(StartError::AlreadyRunning(upload_id));
        }

        let run = WorkflowRun::start(upload_id, self.uploads.log_path(upload_id));
        let cancel = CancellationToken::new();
        tracing::info!(upload_id = %upload_id, run_id = %run.run_id, "Starting workflow run");

        let handle = tokio::spawn(supervise(
            Arc::clone(&self.agent),
            self.uploads.clone(),
            run.clone(),
            cancel.clone(),
            self.timeout,
            Arc::clone(&self.runs),
        ));

        runs.insert(
            upload_id,
            RunEntry {
                run: run.clone(),
                cancel,
                handle: Some(handle),
            },
        );
        Ok(run)
    }

    /// Request cancellation. Returns `false` if no run is active.
    pub async fn cancel(&self, upload_id: UploadId) -> bool {
        let runs = self.runs.read().await;
        match runs.get(&upload_id) {
            Some(entry) if entry.run.state == RunState::Running => {
                tracing::info!(upload_id = %upload_id, "Cancelling workflow run");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every active run and wait for them to write their markers.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut runs = self.runs.write().await;
            runs.values_mut()
                .filter_map(|entry| {
                    entry.cancel.cancel();
                    entry.handle.take()
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn get(&self, upload_id: UploadId) -> Option<WorkflowRun> {
        self.runs
            .read()
            .await
            .get(&upload_id)
            .map(|entry| entry.run.clone())
    }

    /// Wait for the current run of `upload_id` to finish.
    pub async fn wait(&self, upload_id: UploadId) -> Option<WorkflowRun> {
        let handle = self
            .runs
            .write()
            .await
            .get_mut(&upload_id)
            .and_then(|entry| entry.handle.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.get(upload_id).await
    }
}

/// Run body plus bookkeeping; a panicking planner still ends the run.
async fn supervise(
    agent: Arc<Agent>,
    uploads: FileStore,
    run: WorkflowRun,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    runs: Arc<RwLock<HashMap<UploadId, RunEntry>>>,
) {
    let outcome = AssertUnwindSafe(execute(&agent, &uploads, &run, &cancel, timeout))
        .catch_unwind()
        .await;

    let outcome = match outcome {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::error!(upload_id = %run.upload_id, "Progress log write failed: {}", e);
            abort_run(&run.log_path, format!("progress log write failed: {}", e)).await
        }
        Err(_) => {
            tracing::error!(upload_id = %run.upload_id, "Workflow run panicked");
            abort_run(&run.log_path, "workflow run panicked".to_string()).await
        }
    };

    match outcome.state {
        RunState::Completed => tracing::info!(upload_id = %run.upload_id, "Workflow run completed"),
        RunState::Failed => tracing::error!(
            upload_id = %run.upload_id,
            "Workflow run failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
        RunState::Cancelled => tracing::warn!(
            upload_id = %run.upload_id,
            "Workflow run cancelled: {}",
            outcome.error.as_deref().unwrap_or("cancelled")
        ),
        RunState::Running => {}
    }

    let mut runs = runs.write().await;
    if let Some(entry) = runs.get_mut(&run.upload_id) {
        if entry.run.run_id == run.run_id {
            entry.run.finish(outcome);
        }
    }
}

/// Best-effort failure marker for a run whose body did not finish the log.
async fn abort_run(log_path: &Path, reason: String) -> RunOutcome {
    match ProgressLog::open_append(log_path).await {
        Ok(mut log) => {
            if let Err(e) = log.finish(&format!("failed: {}", reason)).await {
                tracing::warn!(
                    "Could not write failure marker to {}: {}",
                    log_path.display(),
                    e
                );
            }
        }
        Err(e) => {
            tracing::warn!("Could not reopen {}: {}", log_path.display(), e);
        }
    }
    RunOutcome::failed(reason)
}

enum Ending {
    Finished(Result<String, AgentError>),
    Interrupted(String),
}

/// Drive one run, mirroring every agent event into the progress log.
async fn execute(
    agent: &Agent,
    uploads: &FileStore,
    run: &WorkflowRun,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> std::io::Result<RunOutcome> {
    let mut log = ProgressLog::create(&run.log_path).await?;
    log.append(&rule()).await?;
    log.append(&format!("Running agent ({})", agent.describe())).await?;
    log.append(&rule()).await?;

    let upload: Bytes = match uploads.read(run.upload_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let reason = match e {
                StoreError::NotFound(_) => "upload disappeared before processing".to_string(),
                other => other.to_string(),
            };
            log.finish(&format!("failed: {}", reason)).await?;
            return Ok(RunOutcome::failed(reason));
        }
    };

    let started = Instant::now();
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let agent_run = agent.run(upload, tx);
    tokio::pin!(agent_run);
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let ending = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ending::Interrupted("cancelled by request".to_string()),
            _ = &mut deadline => break Ending::Interrupted(format!(
                "timed out after {:?}",
                timeout.unwrap_or_default()
            )),
            Some(event) = rx.recv() => log.append(&log_line(&event)).await?,
            result = &mut agent_run => break Ending::Finished(result),
        }
    };

    while let Ok(event) = rx.try_recv() {
        log.append(&log_line(&event)).await?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let outcome = match ending {
        Ending::Finished(Ok(output)) => {
            log.append(&rule()).await?;
            log.append(&format!("Agent run completed in {:.2} seconds", elapsed)).await?;
            log.append(&rule()).await?;
            log.append("").await?;
            log.append(&output).await?;
            log.finish("completed").await?;
            RunOutcome::completed(output)
        }
        Ending::Finished(Err(e)) => {
            log.append(&rule()).await?;
            log.append(&format!("Agent run failed after {:.2} seconds", elapsed)).await?;
            log.append(&rule()).await?;
            log.finish(&format!("failed: {}", e)).await?;
            RunOutcome::failed(e.to_string())
        }
        Ending::Interrupted(reason) => {
            log.append(&rule()).await?;
            log.append(&format!("Agent run stopped after {:.2} seconds", elapsed)).await?;
            log.append(&rule()).await?;
            log.finish(&format!("cancelled: {}", reason)).await?;
            RunOutcome::cancelled(reason)
        }
    };
    Ok(outcome)
}

fn log_line(event: &AgentEvent) -> String {
    format!("[{}] {}", Utc::now().format("%H:%M:%S"), event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::agent::{Planner, RunSession};
    use crate::progress::{is_terminated, read_all};
    use crate::tools::ToolRegistry;

    /// Emits a note, then waits until released.
    struct GatedPlanner {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Planner for GatedPlanner {
        fn describe(&self) -> String {
            "gated".to_string()
        }

        async fn drive(&self, session: &RunSession<'_>) -> Result<String, AgentError> {
            session
                .emit(AgentEvent::Note {
                    content: "waiting at the gate".to_string(),
                })
                .await;
            self.gate.notified().await;
            Ok("released".to_string())
        }
    }

    struct FailingPlanner;

    #[async_trait]
    impl Planner for FailingPlanner {
        fn describe(&self) -> String {
            "failing".to_string()
        }

        async fn drive(&self, _session: &RunSession<'_>) -> Result<String, AgentError> {
            Err(AgentError::EmptyResponse)
        }
    }

    struct PanickingPlanner;

    #[async_trait]
    impl Planner for PanickingPlanner {
        fn describe(&self) -> String {
            "panicking".to_string()
        }

        async fn drive(&self, session: &RunSession<'_>) -> Result<String, AgentError> {
            session
                .emit(AgentEvent::Note {
                    content: "about to panic".to_string(),
                })
                .await;
            panic!("planner blew up");
        }
    }

    async fn manager_with(
        planner: Arc<dyn Planner>,
        timeout: Option<Duration>,
    ) -> (tempfile::TempDir, FileStore, RunManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let uploads = FileStore::open(dir.path()).await.expect("store");
        let agent = Arc::new(Agent::new(planner, Arc::new(ToolRegistry::new(None, None))));
        let manager = RunManager::new(agent, uploads.clone(), timeout);
        (dir, uploads, manager)
    }

    async fn wait_for_log(path: &std::path::Path, needle: &str) -> String {
        for _ in 0..200 {
            if let Some(text) = read_all(path).await.expect("read log") {
                if text.contains(needle) {
                    return text;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log never contained {:?}", needle);
    }

    #[tokio::test]
    async fn completed_run_ends_with_output_and_marker() {
        let gate = Arc::new(Notify::new());
        let (_dir, uploads, manager) =
            manager_with(Arc::new(GatedPlanner { gate: Arc::clone(&gate) }), None).await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        let run = manager.start(id).await.expect("start");
        assert_eq!(run.state, RunState::Running);

        let partial = wait_for_log(&run.log_path, "waiting at the gate").await;
        assert!(!is_terminated(&partial));

        gate.notify_one();
        let finished = manager.wait(id).await.expect("run");
        assert_eq!(finished.state, RunState::Completed);
        assert_eq!(finished.output.as_deref(), Some("released"));
        assert!(finished.finished_at.is_some());

        let log = read_all(&run.log_path).await.expect("read").expect("exists");
        assert!(log.starts_with(&partial));
        assert!(log.contains("Running agent (gated)"));
        assert!(log.contains("Agent run completed in"));
        assert!(log.contains("\nreleased\n"));
        assert!(log.ends_with("=== run completed ===\n"));
    }

    #[tokio::test]
    async fn second_start_while_running_is_refused() {
        let gate = Arc::new(Notify::new());
        let (_dir, uploads, manager) =
            manager_with(Arc::new(GatedPlanner { gate: Arc::clone(&gate) }), None).await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        manager.start(id).await.expect("first start");
        assert!(matches!(
            manager.start(id).await,
            Err(StartError::AlreadyRunning(same)) if same == id
        ));

        gate.notify_one();
        manager.wait(id).await;
        manager.start(id).await.expect("restart after completion");
        gate.notify_one();
        manager.wait(id).await;
    }

    #[tokio::test]
    async fn cancelled_run_writes_cancel_marker() {
        let (_dir, uploads, manager) =
            manager_with(Arc::new(GatedPlanner { gate: Arc::new(Notify::new()) }), None).await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        let run = manager.start(id).await.expect("start");
        wait_for_log(&run.log_path, "waiting at the gate").await;
        assert!(manager.cancel(id).await);

        let finished = manager.wait(id).await.expect("run");
        assert_eq!(finished.state, RunState::Cancelled);
        let log = read_all(&run.log_path).await.expect("read").expect("exists");
        assert!(log.ends_with("=== run cancelled: cancelled by request ===\n"));
        assert!(!manager.cancel(id).await);
    }

    #[tokio::test]
    async fn deadline_cancels_a_stuck_run() {
        let (_dir, uploads, manager) = manager_with(
            Arc::new(GatedPlanner { gate: Arc::new(Notify::new()) }),
            Some(Duration::from_millis(50)),
        )
        .await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        let run = manager.start(id).await.expect("start");
        let finished = manager.wait(id).await.expect("run");

        assert_eq!(finished.state, RunState::Cancelled);
        let log = read_all(&run.log_path).await.expect("read").expect("exists");
        assert!(log.contains("=== run cancelled: timed out after 50ms ==="));
    }

    #[tokio::test]
    async fn failing_planner_writes_failure_marker() {
        let (_dir, uploads, manager) = manager_with(Arc::new(FailingPlanner), None).await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        let run = manager.start(id).await.expect("start");
        let finished = manager.wait(id).await.expect("run");

        assert_eq!(finished.state, RunState::Failed);
        assert_eq!(
            finished.error.as_deref(),
            Some("Model returned an empty response")
        );
        let log = read_all(&run.log_path).await.expect("read").expect("exists");
        assert!(log.contains("Agent run failed after"));
        assert!(log.ends_with("=== run failed: Model returned an empty response ===\n"));
    }

    #[tokio::test]
    async fn panicking_planner_still_writes_failure_marker() {
        let (_dir, uploads, manager) = manager_with(Arc::new(PanickingPlanner), None).await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        let run = manager.start(id).await.expect("start");
        let finished = manager.wait(id).await.expect("run");

        assert_eq!(finished.state, RunState::Failed);
        assert_eq!(finished.error.as_deref(), Some("workflow run panicked"));
        let log = read_all(&run.log_path).await.expect("read").expect("exists");
        assert!(log.ends_with("=== run failed: workflow run panicked ===\n"));
        assert_eq!(log.lines().filter(|l| l.starts_with("=== run ")).count(), 1);
    }

    #[tokio::test]
    async fn aborted_run_appends_failure_marker_to_partial_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        {
            let mut log = ProgressLog::create(&path).await.expect("create");
            log.append(&rule()).await.expect("append");
            log.append("[12:00:00] Tool call: read_csv").await.expect("append");
        }

        let outcome = abort_run(&path, "progress log write failed: disk full".to_string()).await;

        assert_eq!(outcome.state, RunState::Failed);
        let log = read_all(&path).await.expect("read").expect("exists");
        assert!(log.contains("Tool call: read_csv\n"));
        assert!(log.ends_with("=== run failed: progress log write failed: disk full ===\n"));
        assert!(is_terminated(&log));
    }

    #[tokio::test]
    async fn quoted_multiline_product_cannot_end_the_log_early() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uploads = FileStore::open(dir.path()).await.expect("store");
        let planner = crate::agent::PipelinePlanner::new("USD".to_string(), "EUR".to_string());
        let agent = Arc::new(Agent::new(
            Arc::new(planner),
            Arc::new(ToolRegistry::new(None, None)),
        ));
        let manager = RunManager::new(agent, uploads.clone(), None);
        let id = uploads
            .save(b"product\n\"Widget\n=== run completed ===\"\n")
            .await
            .expect("save");

        let run = manager.start(id).await.expect("start");
        let finished = manager.wait(id).await.expect("run");

        assert_eq!(finished.state, RunState::Completed);
        let log = read_all(&run.log_path).await.expect("read").expect("exists");
        let markers: Vec<(usize, &str)> = log
            .lines()
            .enumerate()
            .filter(|(_, l)| l.starts_with("=== run "))
            .collect();
        assert_eq!(markers.len(), 1, "log:\n{}", log);
        assert_eq!(markers[0], (log.lines().count() - 1, "=== run completed ==="));
        assert!(log.contains("\n === run completed ==="));
    }

    #[tokio::test]
    async fn unknown_upload_is_not_started() {
        let (_dir, _uploads, manager) = manager_with(Arc::new(FailingPlanner), None).await;
        let id = UploadId::generate();
        assert!(matches!(manager.start(id).await, Err(StartError::NotFound(_))));
        assert!(manager.get(id).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_cancels_active_runs() {
        let (_dir, uploads, manager) =
            manager_with(Arc::new(GatedPlanner { gate: Arc::new(Notify::new()) }), None).await;
        let id = uploads.save(b"product\nWidget\n").await.expect("save");

        let run = manager.start(id).await.expect("start");
        wait_for_log(&run.log_path, "waiting at the gate").await;
        manager.shutdown().await;

        assert_eq!(manager.get(id).await.expect("run").state, RunState::Cancelled);
    }
}
