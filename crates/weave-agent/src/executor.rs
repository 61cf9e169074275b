//! Parallel task execution
//!
//! Fans a batch of independent tool-call tasks out onto a [`JoinSet`],
//! collects their results in completion order and reduces them with a
//! caller-supplied finalize step. A failing task is captured and dropped;
//! a failure outside task-local execution aborts everything still pending.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use weave_ai::{Message, ToolCall};

use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::router::{Phase, Router};
use crate::state::AgentState;
use crate::tool::{Artifact, ProgressSender, ToolContext};
use crate::toolkit::Toolkit;

/// Executor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on tasks running at once; `None` runs the whole batch at once
    pub max_concurrency: Option<usize>,
}

/// Outcome status of a settled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Output of one task, in the completion-ordered result list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub call_id: String,
    pub tool_name: String,
    pub result: String,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub status: TaskStatus,
}

impl TaskResult {
    /// The ToolResult message answering this task's call
    pub fn to_message(&self) -> Message {
        Message::tool_result(
            &self.call_id,
            &self.tool_name,
            &self.result,
            self.status == TaskStatus::Failed,
        )
    }
}

/// What a task's unit of work returns
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub result: String,
    pub artifacts: Vec<Artifact>,
    pub status: TaskStatus,
}

impl TaskOutput {
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            artifacts: vec![],
            status: TaskStatus::Completed,
        }
    }

    /// A task that ran to the end but reports a failed outcome.
    ///
    /// Unlike an `Err`, it stays in the result list.
    pub fn failed(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            artifacts: vec![],
            status: TaskStatus::Failed,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

type TaskFn =
    Box<dyn FnOnce(ToolCall, ToolContext) -> BoxFuture<'static, Result<TaskOutput>> + Send>;

/// One unit of parallel work: an immutable call plus the future answering it
pub struct Task {
    call: ToolCall,
    work: TaskFn,
}

impl Task {
    /// Create a task from any async closure
    pub fn new<F, Fut>(call: ToolCall, work: F) -> Self
    where
        F: FnOnce(ToolCall, ToolContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        Self {
            call,
            work: Box::new(move |call, ctx| work(call, ctx).boxed()),
        }
    }

    /// Run a toolkit handler as a task
    pub fn tool(call: ToolCall, toolkit: Arc<Toolkit>) -> Self {
        Self::new(call, move |call, ctx| async move {
            let (_, result) = toolkit.execute(&call, ctx).await?;
            let status = if result.is_error {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            Ok(TaskOutput {
                result: result.content,
                artifacts: result.artifacts,
                status,
            })
        })
    }

    /// Run a nested ReAct loop as a task.
    ///
    /// The call's `prompt` argument (or the raw arguments) becomes a human
    /// message appended to `state`; the sub-loop's final output is the result.
    pub fn react(call: ToolCall, router: Arc<Router>, state: AgentState) -> Self {
        Self::new(call, move |call, ctx| async move {
            let mut state = state;
            if !ctx.artifacts.is_empty() {
                state.messages.push(Message::context_injection(format!(
                    "Artifacts from earlier tasks:\n{}",
                    serde_json::to_string(&ctx.artifacts).unwrap_or_default()
                )));
            }
            let prompt = call
                .arguments
                .get("prompt")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| call.arguments.to_string());
            state.messages.push(Message::human(prompt));

            ctx.progress.send("reasoning");
            let done = router.run(state).await?;
            match done.phase {
                Phase::FinalAnswer => Ok(TaskOutput::completed(
                    done.state.final_answer_text().unwrap_or_default(),
                )),
                Phase::Interrupted => Ok(TaskOutput::failed("Sub-task needs user input")),
                Phase::MaxIterationsExceeded => {
                    Ok(TaskOutput::failed("Sub-task exceeded its iteration budget"))
                }
                other => Err(Error::Other(format!(
                    "Sub-task stopped in non-terminal phase {:?}",
                    other
                ))),
            }
        })
    }

    pub fn call(&self) -> &ToolCall {
        &self.call
    }
}

/// Observability hook invoked once per task-local failure
pub trait FailureCapture: Send + Sync {
    fn capture(&self, call_id: &str, error: &Error);
}

/// Default capture: log through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCapture;

impl FailureCapture for TracingCapture {
    fn capture(&self, call_id: &str, error: &Error) {
        tracing::error!(call_id, error = %error, "task failed");
    }
}

/// Runs batches of independent tasks concurrently
#[derive(Clone)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
    events: Option<broadcast::Sender<AgentEvent>>,
    capture: Arc<dyn FailureCapture>,
    cancel: CancellationToken,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            events: None,
            capture: Arc::new(TracingCapture),
            cancel: CancellationToken::new(),
        }
    }

    /// Emit progress and completion events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Replace the failure capture hook
    pub fn with_capture(mut self, capture: Arc<dyn FailureCapture>) -> Self {
        self.capture = capture;
        self
    }

    /// Cancelling `token` aborts any batch in flight
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run every task concurrently and reduce the results with `finalize`.
    ///
    /// Results reach `finalize` in completion order. Failed tasks are absent.
    /// `finalize` runs exactly once, after the last task settled. If it fails,
    /// or the executor is cancelled, all pending tasks are aborted and awaited
    /// before the error is returned.
    pub async fn execute<S, F>(&self, tasks: Vec<(Task, Vec<Artifact>)>, finalize: F) -> Result<S>
    where
        F: FnOnce(Vec<TaskResult>) -> Result<S>,
    {
        if tasks.is_empty() {
            return Err(Error::NoTasksProvided);
        }
        let mut seen = HashSet::new();
        for (task, _) in &tasks {
            if !seen.insert(task.call.id.as_str()) {
                return Err(Error::DuplicateCallId(task.call.id.clone()));
            }
        }

        let notify = tasks.len() > 1;
        let semaphore = self
            .config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let task_cancel = self.cancel.child_token();
        let mut join_set = JoinSet::new();

        tracing::debug!(tasks = tasks.len(), "submitting task batch");
        for (task, artifacts) in tasks {
            let Task { call, work } = task;
            let progress = match (&self.events, notify) {
                (Some(tx), true) => ProgressSender::new(tx.clone(), &call.id, &call.name),
                _ => ProgressSender::muted(&call.id, &call.name),
            };
            let ctx = ToolContext {
                call_id: call.id.clone(),
                artifacts,
                progress: progress.clone(),
                cancel: task_cancel.clone(),
            };
            let semaphore = semaphore.clone();
            let call_id = call.id.clone();
            let tool_name = call.name.clone();

            join_set.spawn(async move {
                let run = async move {
                    let _permit = match semaphore {
                        Some(sem) => Some(sem.acquire_owned().await.map_err(|_| Error::Cancelled)?),
                        None => None,
                    };
                    progress.send("started");
                    work(call, ctx).await
                };
                let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::TaskFailed {
                        call_id: call_id.clone(),
                        message: "task panicked".into(),
                    }),
                };
                (call_id, tool_name, outcome)
            });
        }

        let mut results: Vec<TaskResult> = Vec::new();
        let settled: Result<()> = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Err(Error::Cancelled),
                joined = join_set.join_next() => match joined {
                    None => break Ok(()),
                    Some(Ok((call_id, tool_name, Ok(output)))) => {
                        tracing::debug!(call_id = %call_id, status = ?output.status, "task settled");
                        let result = TaskResult {
                            call_id,
                            tool_name,
                            result: output.result,
                            artifacts: output.artifacts,
                            status: output.status,
                        };
                        self.emit(AgentEvent::TaskCompleted {
                            message: result.to_message(),
                        });
                        results.push(result);
                    }
                    Some(Ok((call_id, _, Err(error)))) => {
                        self.capture.capture(&call_id, &error);
                        self.emit(AgentEvent::TaskFailed {
                            tool_call_id: call_id,
                            error: error.to_string(),
                        });
                    }
                    Some(Err(join_error)) => {
                        tracing::warn!(error = %join_error, "task aborted before settling");
                    }
                },
            }
        };

        let outcome = settled.and_then(|()| finalize(results));
        if outcome.is_err() {
            cancel_pending(&mut join_set, &task_cancel).await;
        }
        outcome
    }
}

/// Abort every task still in `join_set` and wait until each one has settled.
async fn cancel_pending<T: 'static>(join_set: &mut JoinSet<T>, cancel: &CancellationToken) {
    cancel.cancel();
    if join_set.is_empty() {
        return;
    }
    tracing::debug!(pending = join_set.len(), "cancelling pending tasks");
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingCapture {
        failed: Mutex<Vec<String>>,
    }

    impl FailureCapture for RecordingCapture {
        fn capture(&self, call_id: &str, _error: &Error) {
            self.failed.lock().push(call_id.to_string());
        }
    }

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "run_query", serde_json::json!({}))
    }

    fn sleeping(id: &str, millis: u64) -> (Task, Vec<Artifact>) {
        let task = Task::new(call(id), move |call, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(TaskOutput::completed(format!("{} done", call.id)))
        });
        (task, vec![])
    }

    fn failing(id: &str) -> (Task, Vec<Artifact>) {
        let task = Task::new(call(id), |call, _ctx| async move {
            Err(Error::TaskFailed {
                call_id: call.id,
                message: "query timed out".into(),
            })
        });
        (task, vec![])
    }

    fn ids(results: &[TaskResult]) -> Vec<String> {
        results.iter().map(|r| r.call_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let executor = ParallelExecutor::default();
        let err = executor
            .execute(vec![], |results| Ok(results.len()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTasksProvided));
    }

    #[tokio::test]
    async fn test_duplicate_call_ids_rejected() {
        let executor = ParallelExecutor::default();
        let err = executor
            .execute(vec![sleeping("a", 1), sleeping("a", 1)], |r| Ok(r.len()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCallId(id) if id == "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_order_and_failure_isolation() {
        let capture = Arc::new(RecordingCapture::default());
        let executor = ParallelExecutor::default().with_capture(capture.clone());

        let results = executor
            .execute(
                vec![sleeping("A", 150), sleeping("B", 50), failing("C")],
                Ok,
            )
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["B", "A"]);
        assert!(results.iter().all(|r| r.status == TaskStatus::Completed));
        assert_eq!(*capture.failed.lock(), vec!["C".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_drops_exactly_one_result() {
        for n in 1..=6usize {
            for failing_idx in 0..n {
                let tasks = (0..n)
                    .map(|i| {
                        let id = format!("t{}", i);
                        if i == failing_idx {
                            failing(&id)
                        } else {
                            sleeping(&id, (i as u64 + 1) * 10)
                        }
                    })
                    .collect();
                let results = ParallelExecutor::default()
                    .execute(tasks, Ok)
                    .await
                    .unwrap();
                assert_eq!(results.len(), n - 1);
                let failed_id = format!("t{}", failing_idx);
                assert!(results.iter().all(|r| r.call_id != failed_id));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_order_does_not_change_result_set() {
        let durations = [("a", 30), ("b", 10), ("c", 20), ("d", 10)];
        let forward: Vec<_> = durations.iter().map(|(id, ms)| sleeping(id, *ms)).collect();
        let backward: Vec<_> = durations
            .iter()
            .rev()
            .map(|(id, ms)| sleeping(id, *ms))
            .collect();

        let executor = ParallelExecutor::default();
        let first: BTreeSet<String> = executor
            .execute(forward, |r| Ok(ids(&r).into_iter().collect()))
            .await
            .unwrap();
        let second: BTreeSet<String> = executor
            .execute(backward, |r| Ok(ids(&r).into_iter().collect()))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_is_isolated() {
        let capture = Arc::new(RecordingCapture::default());
        let panicking = Task::new(call("boom"), |_call, _ctx| async move {
            if true {
                panic!("handler bug");
            }
            Ok(TaskOutput::completed("unreachable"))
        });

        let results = ParallelExecutor::default()
            .with_capture(capture.clone())
            .execute(vec![(panicking, vec![]), sleeping("ok", 5)], Ok)
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["ok"]);
        assert_eq!(*capture.failed.lock(), vec!["boom".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_runs_once_after_all_settled() {
        let finalize_calls = AtomicU32::new(0);
        let result: Result<()> = ParallelExecutor::default()
            .execute(vec![sleeping("a", 10), sleeping("b", 20)], |results| {
                finalize_calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(results.len(), 2);
                Err(Error::Other("reduce failed".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::Other(msg)) if msg == "reduce failed"));
        assert_eq!(finalize_calls.load(Ordering::SeqCst), 1);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_pending_tasks() {
        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let finalized = Arc::new(AtomicBool::new(false));

        let slow = {
            let dropped = dropped.clone();
            let finished = finished.clone();
            Task::new(call("slow"), move |_call, _ctx| async move {
                let _guard = DropFlag(dropped);
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(TaskOutput::completed("late"))
            })
        };

        let token = CancellationToken::new();
        let executor = ParallelExecutor::default().with_cancel_token(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let finalized_flag = finalized.clone();
        let result = executor
            .execute(vec![(slow, vec![]), sleeping("fast", 5)], move |r| {
                finalized_flag.store(true, Ordering::SeqCst);
                Ok(r)
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(dropped.load(Ordering::SeqCst), "pending task must be torn down");
        assert!(!finished.load(Ordering::SeqCst));
        assert!(!finalized.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_progress_only_for_multi_task_batches() {
        let (tx, mut rx) = broadcast::channel(64);
        let executor = ParallelExecutor::default().with_events(tx);

        executor
            .execute(vec![sleeping("solo", 1)], Ok)
            .await
            .unwrap();
        let mut solo_updates = 0;
        let mut solo_completed = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::ToolExecutionUpdate { .. } => solo_updates += 1,
                AgentEvent::TaskCompleted { .. } => solo_completed += 1,
                _ => {}
            }
        }
        assert_eq!(solo_updates, 0);
        assert_eq!(solo_completed, 1);

        executor
            .execute(vec![sleeping("a", 1), sleeping("b", 1)], Ok)
            .await
            .unwrap();
        let mut started = BTreeSet::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::ToolExecutionUpdate {
                tool_call_id,
                content,
                ..
            } = event
            {
                assert_eq!(content, "started");
                started.insert(tool_call_id);
            }
        }
        assert_eq!(started.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_concurrency_limits_parallelism() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..4)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                let task = Task::new(call(&format!("t{}", i)), move |_call, _ctx| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(TaskOutput::completed("ok"))
                });
                (task, vec![])
            })
            .collect();

        let results = ParallelExecutor::new(ExecutorConfig {
            max_concurrency: Some(1),
        })
        .execute(tasks, Ok)
        .await
        .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependency_artifacts_reach_the_task() {
        let chart = Artifact::new("chart", serde_json::json!({"id": 42}));
        let task = Task::new(call("render"), |_call, ctx| async move {
            let kinds: Vec<String> = ctx.artifacts.iter().map(|a| a.kind.clone()).collect();
            Ok(TaskOutput::completed(kinds.join(","))
                .with_artifacts(vec![Artifact::new("table", serde_json::json!({}))]))
        });

        let results = ParallelExecutor::default()
            .execute(vec![(task, vec![chart])], Ok)
            .await
            .unwrap();
        assert_eq!(results[0].result, "chart");
        assert_eq!(results[0].artifacts[0].kind, "table");
    }
}
