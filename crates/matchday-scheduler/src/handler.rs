use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use matchday_core::SyncOutcome;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// Work performed by a job.
///
/// `cancel` fires when the execution engine gives up on the run (timeout or
/// shutdown). The run future is also dropped at that point, so handlers only
/// need to watch the token for work they spawned themselves.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, cancel: CancellationToken) -> Result<SyncOutcome, JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SyncOutcome, JobError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SyncOutcome, JobError>> + Send + 'static,
{
    async fn run(&self, cancel: CancellationToken) -> Result<SyncOutcome, JobError> {
        (self.0)(cancel).await
    }
}
