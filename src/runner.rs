use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::FutureExt;

use crate::config::clamp_concurrency;
use crate::error::TaskError;
use crate::types::Progress;

/// Run deferred tasks with at most `concurrency` in flight (clamped to 1..=256).
///
/// - Slot `i` of the output holds task `i`'s result regardless of completion order.
/// - A task returning `Err` or panicking fills its slot with a `TaskError`;
///   other tasks are unaffected.
/// - `on_progress` is called after every settled task; `completed` only grows
///   and reaches `total` once, on the last settle.
///
/// Workers are cooperative futures polled on the caller's task. Each claims the
/// next index through a shared atomic counter, so no index is run twice.
pub async fn run_bounded<T, F, Fut, P>(
    concurrency: usize,
    tasks: Vec<F>,
    on_progress: P,
) -> Vec<Result<T, TaskError>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    P: Fn(Progress),
{
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }

    let queue: Vec<Mutex<Option<F>>> = tasks.into_iter().map(|t| Mutex::new(Some(t))).collect();
    let next = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let workers = clamp_concurrency(concurrency).min(total);

    let batches = futures::future::join_all(
        (0..workers).map(|_| worker(&queue, &next, &completed, &on_progress)),
    )
    .await;

    let mut slots: Vec<Option<Result<T, TaskError>>> = (0..total).map(|_| None).collect();
    for (idx, outcome) in batches.into_iter().flatten() {
        slots[idx] = Some(outcome);
    }
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(TaskError::Failed("task never ran".into()))))
        .collect()
}

/// Claim indexes until the queue is drained; returns `(index, outcome)` pairs.
async fn worker<T, F, Fut, P>(
    queue: &[Mutex<Option<F>>],
    next: &AtomicUsize,
    completed: &AtomicUsize,
    on_progress: &P,
) -> Vec<(usize, Result<T, TaskError>)>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    P: Fn(Progress),
{
    let total = queue.len();
    let mut produced = Vec::new();
    loop {
        let idx = next.fetch_add(1, Ordering::SeqCst);
        if idx >= total {
            break;
        }
        let task = queue[idx].lock().ok().and_then(|mut slot| slot.take());
        let outcome = match task {
            Some(task) => settle(task).await,
            None => Err(TaskError::Failed("task already taken".into())),
        };
        produced.push((idx, outcome));
        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        on_progress(Progress {
            completed: done,
            total,
        });
    }
    produced
}

async fn settle<T, F, Fut>(task: F) -> Result<T, TaskError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(async move { task().await }).catch_unwind().await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(TaskError::Failed(format!("{e:#}"))),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let tasks: Vec<fn() -> std::future::Ready<anyhow::Result<u8>>> = Vec::new();
        let out = run_bounded(4, tasks, |_| panic!("no progress expected")).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn never_exceeds_worker_limit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let in_flight = &in_flight;
                let peak = &peak;
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5 + (i % 3) as u64)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(i)
                }
            })
            .collect();
        let out = run_bounded(3, tasks, |_| {}).await;
        assert_eq!(out.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_task_is_captured() {
        let calls = RefCell::new(Vec::new());
        let tasks: Vec<_> = (0..3)
            .map(|i| {
                move || async move {
                    if i == 1 {
                        panic!("boom");
                    }
                    Ok::<_, anyhow::Error>(i)
                }
            })
            .collect();
        let out = run_bounded(2, tasks, |p| calls.borrow_mut().push(p.completed)).await;
        assert_eq!(out[0], Ok(0));
        assert_eq!(out[1], Err(TaskError::Panicked("boom".into())));
        assert_eq!(out[2], Ok(2));
        assert_eq!(calls.into_inner(), vec![1, 2, 3]);
    }
}
