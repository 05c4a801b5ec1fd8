//! Rate-limited outbound request queue.
//!
//! Every provider call goes through one FIFO worker which dispatches strictly
//! one request at a time and never more than `cap` requests inside a rolling
//! window (60 s by default). When the window is full the worker sleeps until
//! it expires, so callers see latency rather than provider 429s.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::error::QueueError;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Requests dispatched since `window_start`.
///
/// `request_count` never exceeds the queue's cap while the window is open.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub request_count: u32,
    pub window_start: Instant,
}

impl RateWindow {
    fn open(now: Instant) -> Self {
        Self {
            request_count: 0,
            window_start: now,
        }
    }
}

/// Counters exposed by [`RateLimitedQueue::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub dispatched: u64,
    /// Submissions whose caller went away before dispatch.
    pub skipped: u64,
    /// Times the worker had to wait for the window to expire.
    pub throttled: u64,
    pub window_count: u32,
}

/// Type-erased queued request.
trait Pending: Send {
    fn is_abandoned(&self) -> bool;
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
}

struct Submission<F, T> {
    request: F,
    reply: oneshot::Sender<T>,
}

impl<F, Fut, T> Pending for Submission<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Submission { request, mut reply } = *self;
        async move {
            // A caller that drops its future mid-flight aborts the request.
            let output = tokio::select! {
                output = request() => Some(output),
                _ = reply.closed() => None,
            };
            match output {
                Some(output) => {
                    let _ = reply.send(output);
                }
                None => debug!("caller went away; in-flight request aborted"),
            }
        }
        .boxed()
    }
}

struct Shared {
    window: Mutex<RateWindow>,
    submitted: AtomicU64,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    throttled: AtomicU64,
}

/// Handle to the queue worker. Clones share the same worker and window.
#[derive(Clone)]
pub struct RateLimitedQueue {
    tx: mpsc::UnboundedSender<Box<dyn Pending>>,
    shared: Arc<Shared>,
}

impl RateLimitedQueue {
    /// Queue allowing `requests_per_minute` dispatches per 60 s window.
    ///
    /// Spawns the worker, so this must be called inside a tokio runtime.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, DEFAULT_WINDOW)
    }

    pub fn with_window(cap: u32, period: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            window: Mutex::new(RateWindow::open(Instant::now())),
            submitted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        });
        tokio::spawn(worker(rx, cap.max(1), period, Arc::clone(&shared)));
        Self { tx, shared }
    }

    /// Enqueue `request` and wait for its own output.
    pub async fn submit<F, Fut, T>(&self, request: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Box::new(Submission { request, reply }))
            .map_err(|_| QueueError::Closed)?;
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        rx.await.map_err(|_| QueueError::Dropped)
    }

    pub fn stats(&self) -> QueueStats {
        let window = *self.shared.window.lock().unwrap_or_else(PoisonError::into_inner);
        QueueStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            throttled: self.shared.throttled.load(Ordering::Relaxed),
            window_count: window.request_count,
        }
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<Box<dyn Pending>>,
    cap: u32,
    period: Duration,
    shared: Arc<Shared>,
) {
    while let Some(pending) = rx.recv().await {
        if pending.is_abandoned() {
            shared.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let resume_at = {
            let mut window = shared.window.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if now.duration_since(window.window_start) > period {
                *window = RateWindow::open(now);
            }
            (window.request_count >= cap).then(|| window.window_start + period)
        };

        if let Some(resume_at) = resume_at {
            shared.throttled.fetch_add(1, Ordering::Relaxed);
            debug!(
                wait_ms = resume_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                cap,
                "rate window full; waiting"
            );
            tokio::time::sleep_until(resume_at).await;
            *shared.window.lock().unwrap_or_else(PoisonError::into_inner) =
                RateWindow::open(Instant::now());
            if pending.is_abandoned() {
                shared.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        }

        shared
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request_count += 1;
        shared.dispatched.fetch_add(1, Ordering::Relaxed);
        pending.run().await;
    }
    debug!("request queue closed");
}
