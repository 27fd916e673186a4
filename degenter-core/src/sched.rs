//! Bounded-concurrency task draining with per-task timing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::{stream, StreamExt};

#[derive(Debug, Clone)]
pub struct TaskSpan {
    pub label: String,
    pub elapsed: Duration,
    pub ok: bool,
}

/// Collects spans for one block pipeline run.
#[derive(Debug, Default)]
pub struct TaskTimer {
    spans: Mutex<Vec<TaskSpan>>,
}

impl TaskTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: String, elapsed: Duration, ok: bool) {
        self.spans
            .lock()
            .expect("task timer lock poisoned")
            .push(TaskSpan { label, elapsed, ok });
    }

    pub fn failures(&self) -> usize {
        self.spans
            .lock()
            .expect("task timer lock poisoned")
            .iter()
            .filter(|s| !s.ok)
            .count()
    }

    /// One-line digest for the height log.
    pub fn summary(&self) -> String {
        let spans = self.spans.lock().expect("task timer lock poisoned");
        let total: Duration = spans.iter().map(|s| s.elapsed).sum();
        let slowest = spans.iter().max_by_key(|s| s.elapsed);
        let failed = spans.iter().filter(|s| !s.ok).count();
        match slowest {
            Some(s) => format!(
                "{} tasks, {} failed, busy {:?}, slowest {} at {:?}",
                spans.len(),
                failed,
                total,
                s.label,
                s.elapsed
            ),
            None => "0 tasks".to_string(),
        }
    }
}

/// Runs every task with at most `limit` in flight, returning once all have
/// finished. Failures are recorded in the timer and logged; they never
/// cancel sibling tasks.
pub async fn run_with_concurrency<T, F, Fut>(
    tasks: Vec<T>,
    limit: usize,
    timer: &TaskTimer,
    label: &str,
    run: F,
) where
    F: Fn(T) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let run = &run;
    stream::iter(tasks.into_iter().enumerate())
        .map(|(idx, task)| {
            let span_label = format!("{label}#{idx}");
            async move {
                let start = Instant::now();
                let result = run(task).await;
                let ok = result.is_ok();
                if let Err(err) = result {
                    tracing::warn!(task = %span_label, "task failed: {err:#}");
                }
                timer.record(span_label, start.elapsed(), ok);
            }
        })
        .buffer_unordered(limit.max(1))
        .collect::<()>()
        .await;
}
