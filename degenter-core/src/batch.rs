//! Generic coalescing writer: items enqueue and return immediately, a
//! background worker flushes whenever `max_items` accumulate or `max_wait`
//! elapses, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, Notify};

type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct BatchQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    buf: Mutex<Vec<T>>,
    notify: Notify,
    max_items: usize,
    flush: FlushFn<T>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> BatchQueue<T> {
    pub fn new<F, Fut>(max_items: usize, max_wait: Duration, flush: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let flush: FlushFn<T> = Arc::new(move |items| Box::pin(flush(items)));
        let inner = Arc::new(Inner {
            buf: Mutex::new(Vec::new()),
            notify: Notify::new(),
            max_items: max_items.max(1),
            flush,
        });

        let worker = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker.notify.notified() => {}
                    _ = tokio::time::sleep(max_wait) => {}
                }
                if let Err(err) = Self::flush_inner(&worker).await {
                    tracing::error!("batch flush failed, items retained: {err:#}");
                }
            }
        });

        Self { inner }
    }

    /// Enqueues one item. Wakes the flusher early once the batch is full.
    pub async fn push(&self, item: T) {
        let full = {
            let mut buf = self.inner.buf.lock().await;
            buf.push(item);
            buf.len() >= self.inner.max_items
        };
        if full {
            self.inner.notify.notify_one();
        }
    }

    pub async fn pending(&self) -> usize {
        self.inner.buf.lock().await.len()
    }

    /// Flushes everything currently queued and reports the outcome. On
    /// failure the batch is restored ahead of any newer items, so nothing is
    /// silently dropped.
    pub async fn drain(&self) -> Result<()> {
        Self::flush_inner(&self.inner).await
    }

    async fn flush_inner(inner: &Arc<Inner<T>>) -> Result<()> {
        let batch = {
            let mut buf = inner.buf.lock().await;
            std::mem::take(&mut *buf)
        };
        if batch.is_empty() {
            return Ok(());
        }

        match (inner.flush)(batch.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut buf = inner.buf.lock().await;
                let newer = std::mem::take(&mut *buf);
                let mut restored = batch;
                restored.extend(newer);
                *buf = restored;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn flushes_when_batch_fills() {
        let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let queue = BatchQueue::new(3, Duration::from_secs(60), move |items: Vec<u32>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(items.len());
                Ok(())
            }
        });

        for i in 0..3u32 {
            queue.push(i).await;
        }
        // the worker flushes on notify, well before the 60s deadline
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(batches.lock().await.as_slice(), &[3]);
        assert_eq!(queue.pending().await, 0);
    }

    #[tokio::test]
    async fn flushes_on_deadline() {
        let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let queue = BatchQueue::new(100, Duration::from_millis(20), move |items: Vec<u32>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(items.len());
                Ok(())
            }
        });

        queue.push(1).await;
        queue.push(2).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(batches.lock().await.as_slice(), &[2]);
    }

    #[tokio::test]
    async fn drain_reports_failure_and_keeps_items() {
        let fail = Arc::new(AtomicBool::new(true));
        let toggle = Arc::clone(&fail);
        let queue = BatchQueue::new(100, Duration::from_secs(60), move |items: Vec<u32>| {
            let toggle = Arc::clone(&toggle);
            async move {
                if toggle.load(Ordering::SeqCst) {
                    anyhow::bail!("sink down");
                }
                assert_eq!(items, vec![7, 8]);
                Ok(())
            }
        });

        queue.push(7).await;
        queue.push(8).await;

        assert!(queue.drain().await.is_err());
        assert_eq!(queue.pending().await, 2);

        fail.store(false, Ordering::SeqCst);
        assert!(queue.drain().await.is_ok());
        assert_eq!(queue.pending().await, 0);
    }
}
