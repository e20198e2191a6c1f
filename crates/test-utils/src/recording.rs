//! Task bodies that record when they start, for asserting execution order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use scanflow::dag::FnTask;
use tokio_util::sync::CancellationToken;

/// Shared state for recording tasks: the order in which bodies started and
/// the order in which they completed.
#[derive(Debug, Clone, Default)]
pub struct OrderRecorder {
    started: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<Vec<String>>>,
}

impl OrderRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self, task: &str) {
        self.started.lock().unwrap().push(task.to_string());
    }

    pub fn record_finish(&self, task: &str) {
        self.finished.lock().unwrap().push(task.to_string());
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn position(&self, task: &str) -> Option<usize> {
        self.started.lock().unwrap().iter().position(|t| t == task)
    }

    pub fn was_started(&self, task: &str) -> bool {
        self.position(task).is_some()
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> anyhow::Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(anyhow!("cancelled")),
    }
}

/// Records its start, then completes immediately.
pub fn recording_task(id: &'static str, deps: &[&str]) -> FnTask<OrderRecorder> {
    sleeping_task(id, deps, Duration::ZERO)
}

/// Records its start, sleeps for `duration` (or until cancelled), records
/// its completion.
pub fn sleeping_task(
    id: &'static str,
    deps: &[&str],
    duration: Duration,
) -> FnTask<OrderRecorder> {
    FnTask::new(
        id,
        deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        move |cancel, rec: OrderRecorder| async move {
            rec.record_start(id);
            sleep_or_cancel(&cancel, duration).await?;
            rec.record_finish(id);
            Ok(())
        },
    )
}

/// Like [`sleeping_task`], but returns an error after sleeping.
pub fn failing_task(
    id: &'static str,
    deps: &[&str],
    duration: Duration,
) -> FnTask<OrderRecorder> {
    FnTask::new(
        id,
        deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        move |cancel, rec: OrderRecorder| async move {
            rec.record_start(id);
            sleep_or_cancel(&cancel, duration).await?;
            rec.record_finish(id);
            Err(anyhow!("{id} failed on purpose"))
        },
    )
}

/// Sleeps for `duration` without ever looking at its cancellation token.
pub fn stubborn_task(
    id: &'static str,
    deps: &[&str],
    duration: Duration,
) -> FnTask<OrderRecorder> {
    FnTask::new(
        id,
        deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        move |_cancel, rec: OrderRecorder| async move {
            rec.record_start(id);
            tokio::time::sleep(duration).await;
            rec.record_finish(id);
            Ok(())
        },
    )
}
