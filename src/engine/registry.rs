// src/engine/registry.rs

//! Authoritative per-run task status store.
//!
//! One [`Registry`] is created for every workflow run and dropped when the
//! run returns. Every read goes through the read lock and every write (status
//! updates and the admission check-and-mark in [`Registry::dispatch`]) goes
//! through the write lock. The lock is never held across an `.await`.
//!
//! Completions are signalled to the scheduler loop through a single-slot
//! channel. A completion that finds the slot already full is dropped: the
//! loop re-scans every task on each wake-up, so one pending signal covers
//! any number of completions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::dag::{RunState, Stats, Task, TaskName, TaskStatus};
use crate::errors::{Result, ScanflowError, TaskFailure, TaskFailures};
use crate::types::DependencyGating;

/// Result of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The task was marked `Running` and its body spawned.
    Started,
    /// At least one dependency has not reached an admitting state yet.
    NotReady,
    /// The task is already running or finished; nothing was done.
    AlreadyHandled,
}

#[derive(Debug)]
struct RegistryState {
    statuses: HashMap<TaskName, TaskStatus>,
    /// Seeding order; failures are reported in this order.
    order: Vec<TaskName>,
    stats: Stats,
}

impl RegistryState {
    fn status(&self, id: &str) -> Result<&TaskStatus> {
        self.statuses
            .get(id)
            .ok_or_else(|| ScanflowError::TaskNotFound(id.to_string()))
    }

    /// Overwrite the status of `id`, folding the transition into `stats`.
    fn transition(&mut self, id: &str, status: TaskStatus) -> Result<RunState> {
        let current = self
            .statuses
            .get_mut(id)
            .ok_or_else(|| ScanflowError::TaskNotFound(id.to_string()))?;

        let from = current.state;
        let to = status.state;
        if !from.can_transition_to(to) {
            return Err(ScanflowError::InvalidTransition {
                task: id.to_string(),
                from,
                to,
            });
        }

        *current = status;
        self.stats.apply(from, to);
        Ok(from)
    }
}

/// Per-run status registry.
pub struct Registry {
    run_id: u64,
    gating: DependencyGating,
    state: RwLock<RegistryState>,
    wake_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
}

impl Registry {
    /// Create a registry with every id `Pending`.
    ///
    /// Returns the registry together with the receiving end of its wake-up
    /// channel, which belongs to the scheduler loop.
    pub fn new<I>(run_id: u64, ids: I, gating: DependencyGating) -> (Arc<Self>, mpsc::Receiver<()>)
    where
        I: IntoIterator<Item = TaskName>,
    {
        let order: Vec<TaskName> = ids.into_iter().collect();
        let statuses: HashMap<TaskName, TaskStatus> = order
            .iter()
            .map(|id| (id.clone(), TaskStatus::pending()))
            .collect();
        let stats = Stats::seeded(statuses.len());

        let (wake_tx, wake_rx) = mpsc::channel(1);

        let registry = Arc::new(Self {
            run_id,
            gating,
            state: RwLock::new(RegistryState {
                statuses,
                order,
                stats,
            }),
            wake_tx,
            shutdown: CancellationToken::new(),
        });

        (registry, wake_rx)
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Current status of `id`.
    pub fn get(&self, id: &str) -> Result<TaskStatus> {
        self.read().status(id).cloned()
    }

    /// Overwrite the status of `id`.
    ///
    /// Regressions (`Running -> Pending`, leaving a terminal state) are
    /// rejected with [`ScanflowError::InvalidTransition`].
    pub fn set(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut guard = self.write();
        let to = status.state;
        let from = guard.transition(id, status)?;
        trace!(run_id = self.run_id, task = %id, %from, %to, stats = %guard.stats, "status updated");
        Ok(())
    }

    /// Like [`Registry::set`], and wake the scheduler loop when the new
    /// status is terminal.
    pub fn update(&self, id: &str, status: TaskStatus) -> Result<()> {
        let terminal = status.state.is_terminal();
        self.set(id, status)?;
        if terminal {
            self.notify();
        }
        Ok(())
    }

    /// Admission control: start `task` if it is `Pending` and every
    /// dependency admits it.
    ///
    /// The readiness check and the `Pending -> Running` mark happen in one
    /// write-locked critical section, so concurrent or repeated calls never
    /// start a task twice. The body is spawned onto the Tokio runtime and
    /// its result folded back through [`Registry::update`]; this method
    /// never waits for it.
    pub fn dispatch<S>(
        self: &Arc<Self>,
        task: &Arc<dyn Task<S>>,
        cancel: &CancellationToken,
        state: &S,
    ) -> Result<DispatchOutcome>
    where
        S: Clone + Send + 'static,
    {
        let id = task.id().to_string();

        {
            let mut guard = self.write();

            if guard.status(&id)?.state != RunState::Pending {
                return Ok(DispatchOutcome::AlreadyHandled);
            }

            for dep in task.dependencies() {
                let dep_state = guard.status(dep)?.state;
                if !self.gating.satisfied_by(dep_state) {
                    trace!(
                        run_id = self.run_id,
                        task = %id,
                        dep = %dep,
                        dep_state = %dep_state,
                        "dependency not satisfied; task stays pending"
                    );
                    return Ok(DispatchOutcome::NotReady);
                }
            }

            guard.transition(&id, TaskStatus::running())?;
            debug!(
                run_id = self.run_id,
                task = %id,
                stats = %guard.stats,
                "dependencies satisfied; marking Running"
            );
        }

        info!(run_id = self.run_id, task = %id, "starting task");
        self.spawn_body(id, Arc::clone(task), cancel.clone(), state.clone());

        Ok(DispatchOutcome::Started)
    }

    fn spawn_body<S>(
        self: &Arc<Self>,
        id: TaskName,
        task: Arc<dyn Task<S>>,
        cancel: CancellationToken,
        state: S,
    ) where
        S: Send + 'static,
    {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let started = Instant::now();

            // The body runs in its own Tokio task so a panic surfaces as a
            // `JoinError` instead of leaving the task `Running` forever.
            let body = tokio::spawn(async move { task.run(cancel, state).await });

            let status = match body.await {
                Ok(Ok(())) => {
                    info!(
                        run_id = registry.run_id,
                        task = %id,
                        elapsed = ?started.elapsed(),
                        "task completed successfully"
                    );
                    TaskStatus::done()
                }
                Ok(Err(err)) => {
                    warn!(
                        run_id = registry.run_id,
                        task = %id,
                        elapsed = ?started.elapsed(),
                        error = %format!("{err:#}"),
                        "task failed"
                    );
                    TaskStatus::failed(err)
                }
                Err(join_err) => {
                    error!(
                        run_id = registry.run_id,
                        task = %id,
                        error = %join_err,
                        "task body did not complete"
                    );
                    if join_err.is_panic() {
                        TaskStatus::failed(anyhow!("task panicked"))
                    } else {
                        TaskStatus::failed(anyhow!("task aborted: {join_err}"))
                    }
                }
            };

            if let Err(err) = registry.update(&id, status) {
                error!(
                    run_id = registry.run_id,
                    task = %id,
                    error = %err,
                    "failed to record task completion"
                );
            }
        });
    }

    /// `true` once any task failed, or nothing is pending or running.
    pub fn finished(&self) -> bool {
        let stats = self.read().stats;
        stats.failed > 0 || stats.drained()
    }

    /// Join every recorded task error, in seeding order.
    pub fn result(&self) -> Result<()> {
        let guard = self.read();

        let failures: Vec<TaskFailure> = guard
            .order
            .iter()
            .filter_map(|id| {
                let status = guard.statuses.get(id)?;
                status.error.as_ref().map(|error| TaskFailure {
                    task: id.clone(),
                    error: Arc::clone(error),
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ScanflowError::TasksFailed(TaskFailures(failures)))
        }
    }

    pub fn stats(&self) -> Stats {
        self.read().stats
    }

    /// Point-in-time copy of every task status.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let guard = self.read();

        let tasks = guard
            .order
            .iter()
            .filter_map(|id| {
                guard.statuses.get(id).map(|status| TaskSnapshot {
                    name: id.clone(),
                    state: status.state,
                    error: status.error.clone(),
                })
            })
            .collect();

        RegistrySnapshot {
            tasks,
            stats: guard.stats,
        }
    }

    /// Stop publishing wake-ups. Completions arriving afterwards are still
    /// recorded but no longer signalled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Non-blocking, coalescing wake-up.
    fn notify(&self) {
        if self.shutdown.is_cancelled() {
            trace!(run_id = self.run_id, "run shut down; dropping wake-up");
            return;
        }

        match self.wake_tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                trace!(run_id = self.run_id, "wake-up already pending; coalesced");
            }
            Err(TrySendError::Closed(())) => {
                trace!(run_id = self.run_id, "scheduler loop gone; dropping wake-up");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("run_id", &self.run_id)
            .field("gating", &self.gating)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.snapshot())
    }
}

/// Status of one task inside a [`RegistrySnapshot`].
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub name: TaskName,
    pub state: RunState,
    pub error: Option<Arc<anyhow::Error>>,
}

/// Copy of a registry's statuses, in topological order.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub tasks: Vec<TaskSnapshot>,
    pub stats: Stats,
}

impl RegistrySnapshot {
    pub fn state_of(&self, name: &str) -> Option<RunState> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.state)
    }

    /// Names of tasks in the given state.
    pub fn in_state(&self, state: RunState) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.state == state)
            .map(|t| t.name.as_str())
            .collect()
    }
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.stats)?;
        for task in &self.tasks {
            match &task.error {
                Some(err) => writeln!(f, "  {}: {} ({:#})", task.name, task.state, err)?,
                None => writeln!(f, "  {}: {}", task.name, task.state)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Notify;

    use crate::dag::FnTask;

    fn ids(names: &[&str]) -> Vec<TaskName> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn noop(id: &str, deps: &[&str]) -> Arc<dyn Task<()>> {
        Arc::new(FnTask::new(
            id,
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            |_cancel, _state: ()| async { Ok(()) },
        ))
    }

    async fn next_wake(rx: &mut mpsc::Receiver<()>) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no wake-up within 5s")
            .expect("wake channel closed");
    }

    #[test]
    fn unknown_task_is_an_error() {
        let (registry, _rx) = Registry::new(1, ids(&["a"]), DependencyGating::Success);
        assert!(matches!(
            registry.get("ghost"),
            Err(ScanflowError::TaskNotFound(ref id)) if id == "ghost"
        ));
        assert!(registry.set("ghost", TaskStatus::running()).is_err());
    }

    #[test]
    fn regressions_are_rejected() {
        let (registry, _rx) = Registry::new(1, ids(&["a"]), DependencyGating::Success);
        registry.set("a", TaskStatus::running()).unwrap();
        registry.set("a", TaskStatus::done()).unwrap();

        let err = registry.set("a", TaskStatus::pending()).unwrap_err();
        assert!(matches!(
            err,
            ScanflowError::InvalidTransition {
                from: RunState::Done,
                to: RunState::Pending,
                ..
            }
        ));
        assert_eq!(registry.get("a").unwrap().state, RunState::Done);
        assert_eq!(registry.stats().done, 1);
    }

    #[test]
    fn finished_on_drain_or_first_failure() {
        let (registry, _rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Success);
        assert!(!registry.finished());

        registry.set("a", TaskStatus::running()).unwrap();
        registry.set("a", TaskStatus::done()).unwrap();
        assert!(!registry.finished());

        registry.set("b", TaskStatus::running()).unwrap();
        registry
            .set("b", TaskStatus::failed(anyhow!("boom")))
            .unwrap();
        assert!(registry.finished());

        let (empty, _rx) = Registry::new(2, Vec::new(), DependencyGating::Success);
        assert!(empty.finished());
        assert!(empty.result().is_ok());
    }

    #[test]
    fn failure_in_flight_finishes_the_run() {
        let (registry, _rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Success);
        registry.set("a", TaskStatus::running()).unwrap();
        registry.set("b", TaskStatus::running()).unwrap();
        registry
            .set("b", TaskStatus::failed(anyhow!("boom")))
            .unwrap();

        assert_eq!(registry.stats().running, 1);
        assert!(registry.finished());
    }

    #[test]
    fn result_joins_errors_in_order() {
        let (registry, _rx) =
            Registry::new(1, ids(&["a", "b", "c"]), DependencyGating::Success);
        for id in ["a", "b", "c"] {
            registry.set(id, TaskStatus::running()).unwrap();
        }
        registry.set("c", TaskStatus::failed(anyhow!("c broke"))).unwrap();
        registry.set("b", TaskStatus::done()).unwrap();
        registry.set("a", TaskStatus::failed(anyhow!("a broke"))).unwrap();

        let err = registry.result().unwrap_err();
        let failures = err.task_failures().unwrap();
        let names: Vec<&str> = failures.iter().map(|f| f.task.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(
            err.to_string(),
            "task 'a' failed: a broke\ntask 'c' failed: c broke"
        );
    }

    #[test]
    fn wake_ups_coalesce() {
        let (registry, mut rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Success);
        for id in ["a", "b"] {
            registry.update(id, TaskStatus::running()).unwrap();
        }
        // Non-terminal updates never wake.
        assert!(rx.try_recv().is_err());

        registry.update("a", TaskStatus::done()).unwrap();
        registry.update("b", TaskStatus::done()).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_wake_ups_after_shutdown() {
        let (registry, mut rx) = Registry::new(1, ids(&["a"]), DependencyGating::Success);
        registry.shutdown();
        assert!(registry.is_shut_down());

        registry.update("a", TaskStatus::running()).unwrap();
        registry.update("a", TaskStatus::done()).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.get("a").unwrap().state, RunState::Done);
    }

    #[test]
    fn update_after_loop_is_gone_is_dropped() {
        let (registry, rx) = Registry::new(1, ids(&["a"]), DependencyGating::Success);
        drop(rx);

        registry.update("a", TaskStatus::running()).unwrap();
        registry.update("a", TaskStatus::done()).unwrap();
        assert!(registry.finished());
    }

    #[tokio::test]
    async fn dispatch_waits_for_dependencies() {
        let (registry, mut rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Success);
        let cancel = CancellationToken::new();

        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let a: Arc<dyn Task<()>> = Arc::new(FnTask::new("a", Vec::<String>::new(), move |_c, _s: ()| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(())
            }
        }));
        let b = noop("b", &["a"]);

        assert_eq!(
            registry.dispatch(&b, &cancel, &()).unwrap(),
            DispatchOutcome::NotReady
        );
        assert_eq!(registry.get("b").unwrap().state, RunState::Pending);

        assert_eq!(
            registry.dispatch(&a, &cancel, &()).unwrap(),
            DispatchOutcome::Started
        );
        assert_eq!(
            registry.dispatch(&a, &cancel, &()).unwrap(),
            DispatchOutcome::AlreadyHandled
        );
        // Running dependency is not enough.
        assert_eq!(
            registry.dispatch(&b, &cancel, &()).unwrap(),
            DispatchOutcome::NotReady
        );

        release.notify_one();
        next_wake(&mut rx).await;
        assert_eq!(registry.get("a").unwrap().state, RunState::Done);

        assert_eq!(
            registry.dispatch(&b, &cancel, &()).unwrap(),
            DispatchOutcome::Started
        );
        next_wake(&mut rx).await;
        assert_eq!(registry.get("b").unwrap().state, RunState::Done);
        assert_eq!(
            registry.dispatch(&b, &cancel, &()).unwrap(),
            DispatchOutcome::AlreadyHandled
        );
        assert!(registry.finished());
        assert!(registry.result().is_ok());
    }

    #[tokio::test]
    async fn failed_dependency_blocks_under_success_gating() {
        let (registry, mut rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Success);
        let cancel = CancellationToken::new();
        let a: Arc<dyn Task<()>> = Arc::new(FnTask::new("a", Vec::<String>::new(), |_c, _s: ()| async {
            Err(anyhow!("upstream broke"))
        }));
        let b = noop("b", &["a"]);

        registry.dispatch(&a, &cancel, &()).unwrap();
        next_wake(&mut rx).await;

        assert_eq!(registry.get("a").unwrap().state, RunState::Failed);
        assert_eq!(
            registry.dispatch(&b, &cancel, &()).unwrap(),
            DispatchOutcome::NotReady
        );
        assert!(registry.finished());
    }

    #[tokio::test]
    async fn failed_dependency_admits_under_terminal_gating() {
        let (registry, mut rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Terminal);
        let cancel = CancellationToken::new();
        let a: Arc<dyn Task<()>> = Arc::new(FnTask::new("a", Vec::<String>::new(), |_c, _s: ()| async {
            Err(anyhow!("upstream broke"))
        }));
        let b = noop("b", &["a"]);

        registry.dispatch(&a, &cancel, &()).unwrap();
        next_wake(&mut rx).await;

        assert_eq!(
            registry.dispatch(&b, &cancel, &()).unwrap(),
            DispatchOutcome::Started
        );
    }

    #[tokio::test]
    async fn panicking_body_is_recorded_as_failed() {
        let (registry, mut rx) = Registry::new(1, ids(&["a"]), DependencyGating::Success);
        let a: Arc<dyn Task<()>> = Arc::new(FnTask::new("a", Vec::<String>::new(), |_c, _s: ()| async {
            let crashed = true;
            if crashed {
                panic!("scanner crashed");
            }
            Ok(())
        }));

        registry.dispatch(&a, &CancellationToken::new(), &()).unwrap();
        next_wake(&mut rx).await;

        let status = registry.get("a").unwrap();
        assert_eq!(status.state, RunState::Failed);
        assert!(registry.result().unwrap_err().to_string().contains("panicked"));
    }

    #[test]
    fn snapshot_lists_tasks_in_order() {
        let (registry, _rx) = Registry::new(1, ids(&["a", "b"]), DependencyGating::Success);
        registry.set("a", TaskStatus::running()).unwrap();
        registry.set("a", TaskStatus::failed(anyhow!("nope"))).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.state_of("a"), Some(RunState::Failed));
        assert_eq!(snapshot.in_state(RunState::Pending), vec!["b"]);

        let rendered = registry.to_string();
        assert!(rendered.contains("a: failed (nope)"));
        assert!(rendered.contains("b: pending"));
    }
}
