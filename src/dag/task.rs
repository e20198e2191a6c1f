// src/dag/task.rs

//! The unit of work scheduled by the engine.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dag::TaskName;

/// Outcome of a task body. Any error marks the task Failed.
pub type TaskResult = anyhow::Result<()>;

/// Boxed future returned by [`Task::run`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>>;

/// A named unit of work with declared dependencies.
///
/// `S` is the caller's shared state. The engine clones the handle into every
/// task and never synchronizes access to it; tasks that mutate shared data
/// must coordinate among themselves (e.g. `Arc<Mutex<_>>` inside `S`).
///
/// Bodies should observe `cancel` on every blocking operation. The engine
/// only stops admitting new tasks when a run is cancelled; it never aborts a
/// body that is already executing.
pub trait Task<S>: Send + Sync {
    /// Stable identifier, unique within a workflow.
    fn id(&self) -> &str;

    /// Ids that must finish before this task may start. Empty for roots.
    fn dependencies(&self) -> &[TaskName];

    /// Execute the task.
    fn run(&self, cancel: CancellationToken, state: S) -> TaskFuture<'_>;
}

impl<S, T> Task<S> for Arc<T>
where
    T: Task<S> + ?Sized,
{
    fn id(&self) -> &str {
        (**self).id()
    }

    fn dependencies(&self) -> &[TaskName] {
        (**self).dependencies()
    }

    fn run(&self, cancel: CancellationToken, state: S) -> TaskFuture<'_> {
        (**self).run(cancel, state)
    }
}

type BoxedBody<S> = Box<dyn Fn(CancellationToken, S) -> TaskFuture<'static> + Send + Sync>;

/// A task whose body is a closure returning a future.
///
/// ```ignore
/// let task = FnTask::new("sbom", Vec::<String>::new(), |cancel, report: Report| async move {
///     report.add("sbom");
///     Ok(())
/// });
/// ```
pub struct FnTask<S> {
    id: TaskName,
    deps: Vec<TaskName>,
    body: BoxedBody<S>,
}

impl<S> FnTask<S> {
    pub fn new<I, D, F, Fut>(id: impl Into<TaskName>, deps: I, body: F) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskName>,
        F: Fn(CancellationToken, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            id: id.into(),
            deps: deps.into_iter().map(Into::into).collect(),
            body: Box::new(move |cancel, state| Box::pin(body(cancel, state))),
        }
    }
}

impl<S> fmt::Debug for FnTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

impl<S> Task<S> for FnTask<S>
where
    S: Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[TaskName] {
        &self.deps
    }

    fn run(&self, cancel: CancellationToken, state: S) -> TaskFuture<'_> {
        (self.body)(cancel, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn fn_task_forwards_state_and_result() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let task = FnTask::new("a", ["b", "c"], |_cancel, state: Arc<Mutex<Vec<String>>>| async move {
            state.lock().unwrap().push("a".to_string());
            Ok(())
        });

        assert_eq!(Task::<Arc<Mutex<Vec<String>>>>::id(&task), "a");
        assert_eq!(
            Task::<Arc<Mutex<Vec<String>>>>::dependencies(&task),
            &["b".to_string(), "c".to_string()]
        );

        task.run(CancellationToken::new(), Arc::clone(&seen))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn arc_wrapped_task_delegates() {
        let task: Arc<dyn Task<()>> = Arc::new(FnTask::new("boom", Vec::<String>::new(), |_c, _s: ()| async {
            Err(anyhow::anyhow!("boom"))
        }));

        assert_eq!(task.id(), "boom");
        let err = task.run(CancellationToken::new(), ()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
