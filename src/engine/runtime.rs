// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dag::{DagGraph, Task, TaskName};
use crate::errors::{Result, ScanflowError};

use super::RunOptions;
use super::registry::{DispatchOutcome, Registry, RegistrySnapshot};

/// A validated, runnable set of dependency-ordered tasks.
///
/// Construction checks the task set once (unique ids, known dependencies,
/// no cycles). Each call to [`Workflow::run`] creates a fresh [`Registry`],
/// so a workflow can be run repeatedly as long as the task bodies tolerate
/// it.
pub struct Workflow<S> {
    graph: DagGraph,
    /// Tasks in topological order.
    tasks: Vec<Arc<dyn Task<S>>>,
    options: RunOptions,
    runs: AtomicU64,
}

impl<S> fmt::Debug for Workflow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("order", &self.graph.order())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S> Workflow<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Build a workflow with default [`RunOptions`].
    pub fn new<I, T>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Task<S> + 'static,
    {
        Self::with_options(tasks, RunOptions::default())
    }

    /// Build a workflow, failing on duplicate ids, unknown dependencies or
    /// dependency cycles.
    pub fn with_options<I, T>(tasks: I, options: RunOptions) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Task<S> + 'static,
    {
        let tasks: Vec<Arc<dyn Task<S>>> = tasks
            .into_iter()
            .map(|t| Arc::new(t) as Arc<dyn Task<S>>)
            .collect();

        let graph = DagGraph::build(
            tasks
                .iter()
                .map(|t| (t.id().to_string(), t.dependencies().to_vec())),
        )?;

        let mut by_id: HashMap<TaskName, Arc<dyn Task<S>>> = tasks
            .into_iter()
            .map(|t| (t.id().to_string(), t))
            .collect();

        let ordered = graph
            .order()
            .iter()
            .map(|id| {
                by_id
                    .remove(id)
                    .ok_or_else(|| ScanflowError::TaskNotFound(id.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(order = ?graph.order(), "workflow constructed");

        Ok(Self {
            graph,
            tasks: ordered,
            options,
            runs: AtomicU64::new(0),
        })
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Topological order the scheduler admits tasks in.
    pub fn order(&self) -> &[TaskName] {
        self.graph.order()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task once against `state`.
    ///
    /// Returns when all tasks finished, as soon as any task failed, or when
    /// `cancel` fires (or the configured timeout passes). Task bodies still
    /// executing at that point keep running in the background unless they
    /// observe their cancellation token.
    pub async fn run(&self, cancel: &CancellationToken, state: S) -> Result<()> {
        self.run_until(cancel, state, self.options.timeout).await.0
    }

    /// Like [`Workflow::run`] with an explicit deadline measured from now.
    pub async fn run_with_timeout(
        &self,
        cancel: &CancellationToken,
        state: S,
        timeout: Duration,
    ) -> Result<()> {
        self.run_until(cancel, state, Some(timeout)).await.0
    }

    /// Like [`Workflow::run`], also returning the final status of every task.
    pub async fn run_with_snapshot(
        &self,
        cancel: &CancellationToken,
        state: S,
    ) -> (Result<()>, RegistrySnapshot) {
        self.run_until(cancel, state, self.options.timeout).await
    }

    async fn run_until(
        &self,
        cancel: &CancellationToken,
        state: S,
        timeout: Option<Duration>,
    ) -> (Result<()>, RegistrySnapshot) {
        let run_id = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let (registry, mut wake_rx) =
            Registry::new(run_id, self.graph.order().iter().cloned(), self.options.gating);

        // Handed to task bodies; cancelled on deadline so bodies can observe
        // it like any other cancellation.
        let task_token = cancel.child_token();

        let deadline = timeout.map(|t| Instant::now() + t);
        let deadline_reached = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_reached);

        info!(
            run_id,
            tasks = self.tasks.len(),
            ?timeout,
            gating = ?self.options.gating,
            "workflow run started"
        );

        let mut cursor = 0;

        let outcome: Result<()> = loop {
            if registry.finished() {
                break Ok(());
            }
            if cancel.is_cancelled() {
                break Err(ScanflowError::Cancelled);
            }
            if deadline.is_some_and(|at| Instant::now() >= at) {
                task_token.cancel();
                break Err(ScanflowError::DeadlineExceeded(timeout.unwrap_or_default()));
            }

            cursor = match self.admit_from(cursor, &registry, &task_token, &state) {
                Ok(next) => next,
                Err(err) => break Err(err),
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(run_id, "workflow run cancelled; no further tasks will be started");
                    break Err(ScanflowError::Cancelled);
                }
                _ = &mut deadline_reached => {
                    warn!(run_id, ?timeout, "workflow run deadline exceeded; cancelling task token");
                    task_token.cancel();
                    break Err(ScanflowError::DeadlineExceeded(timeout.unwrap_or_default()));
                }
                _ = wake_rx.recv() => {
                    trace!(run_id, "woken by task completion");
                }
                _ = sleep(self.options.effective_poll_interval()) => {
                    trace!(run_id, "poll interval elapsed");
                }
            }
        };

        registry.shutdown();
        if self.options.cancel_in_flight_on_exit {
            task_token.cancel();
        }

        let snapshot = registry.snapshot();
        debug!(run_id, registry = %snapshot, "registry at run exit");

        let result = outcome.and_then(|()| registry.result());
        match &result {
            Ok(()) => info!(run_id, stats = %snapshot.stats, "workflow run finished"),
            Err(err) => warn!(run_id, stats = %snapshot.stats, error = %err, "workflow run finished with error"),
        }

        (result, snapshot)
    }

    /// Try to admit every task from `cursor` onward, in topological order.
    ///
    /// Returns the index of the first task that is still waiting; everything
    /// before it has been admitted and never needs another attempt.
    fn admit_from(
        &self,
        cursor: usize,
        registry: &Arc<Registry>,
        token: &CancellationToken,
        state: &S,
    ) -> Result<usize> {
        let mut next_cursor = None;

        for (idx, task) in self.tasks.iter().enumerate().skip(cursor) {
            let outcome = registry.dispatch(task, token, state)?;
            if outcome == DispatchOutcome::NotReady && next_cursor.is_none() {
                next_cursor = Some(idx);
            }
        }

        Ok(next_cursor.unwrap_or(self.tasks.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::dag::{FnTask, RunState};
    use crate::types::DependencyGating;

    type Log = Arc<Mutex<Vec<String>>>;

    fn logging_task(id: &'static str, deps: &[&str]) -> FnTask<Log> {
        FnTask::new(
            id,
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            move |_cancel, log: Log| async move {
                log.lock().unwrap().push(id.to_string());
                Ok(())
            },
        )
    }

    #[test]
    fn construction_orders_tasks_topologically() {
        let workflow: Workflow<Log> = Workflow::new(vec![
            logging_task("c", &["b"]),
            logging_task("b", &["a"]),
            logging_task("a", &[]),
        ])
        .unwrap();

        assert_eq!(workflow.order(), &["a", "b", "c"]);
        assert_eq!(workflow.len(), 3);
    }

    #[test]
    fn construction_errors_surface() {
        let dup = Workflow::<Log>::new(vec![logging_task("a", &[]), logging_task("a", &[])]);
        assert!(matches!(dup, Err(ScanflowError::DuplicateTask(_))));

        let cyclic = Workflow::<Log>::new(vec![logging_task("a", &["b"]), logging_task("b", &["a"])]);
        assert!(cyclic.unwrap_err().is_construction_error());
    }

    #[tokio::test]
    async fn empty_workflow_finishes_immediately() {
        let workflow: Workflow<Log> = Workflow::new(Vec::<FnTask<Log>>::new()).unwrap();
        let log: Log = Arc::default();
        workflow.run(&CancellationToken::new(), log).await.unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_token_starts_nothing() {
        let workflow: Workflow<Log> = Workflow::new(vec![logging_task("a", &[])]).unwrap();
        let log: Log = Arc::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, snapshot) = workflow.run_with_snapshot(&cancel, Arc::clone(&log)).await;
        assert!(matches!(result, Err(ScanflowError::Cancelled)));
        assert_eq!(snapshot.state_of("a"), Some(RunState::Pending));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_runs_use_fresh_registries() {
        let workflow: Workflow<Log> =
            Workflow::new(vec![logging_task("a", &[]), logging_task("b", &["a"])]).unwrap();
        let log: Log = Arc::default();
        let cancel = CancellationToken::new();

        workflow.run(&cancel, Arc::clone(&log)).await.unwrap();
        workflow.run(&cancel, Arc::clone(&log)).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn terminal_gating_still_fails_fast() {
        let failing: FnTask<Log> = FnTask::new("a", Vec::<String>::new(), |_c, _log: Log| async {
            Err(anyhow::anyhow!("a failed"))
        });
        let workflow = Workflow::with_options(
            vec![failing, logging_task("b", &["a"])],
            RunOptions::default().with_gating(DependencyGating::Terminal),
        )
        .unwrap();

        let log: Log = Arc::default();
        let err = workflow
            .run(&CancellationToken::new(), Arc::clone(&log))
            .await
            .unwrap_err();
        assert!(err.task_failures().unwrap().contains_task("a"));
        // The loop observes the failure before it would admit "b".
        assert!(log.lock().unwrap().is_empty());
    }
}
