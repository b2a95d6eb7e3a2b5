//! Fixed-size worker pool that drives blocks through a [`Transport`].
//!
//! Fresh blocks arrive on a bounded queue (so the producer never reads far
//! ahead of the network); failed blocks go to a separate retry queue that
//! workers drain first. A block leaves the pool only once the transport
//! has acknowledged it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::completion::{CompletionMap, Recorded};
use crate::config::{RetryPolicy, TransferConfig};
use crate::progress::ProgressSink;
use crate::{BlockError, TransferError};

/// Failures after which a retried block is logged at `warn`.
const WARN_EVERY: u32 = 5;

/// Opaque per-block acknowledgement issued by the remote side.
pub type CompletionToken = String;

/// Boxed future returned by the engine's injected traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of work the pool can schedule.
pub trait WorkItem: Send + Sync + 'static {
    /// 1-based block index.
    fn index(&self) -> u32;

    /// Payload size in bytes, reported to the progress sink on success.
    fn len(&self) -> u64;
}

/// Performs the network operation for one block.
///
/// Implemented by the HTTP client for block PUTs and range GETs. Every
/// error is treated as transient.
pub trait Transport<B>: Send + Sync + 'static {
    fn transfer<'a>(&'a self, block: &'a B) -> BoxFuture<'a, Result<CompletionToken, BlockError>>;
}

struct Job<B> {
    block: B,
    failures: u32,
}

struct Inbox<B> {
    retry: mpsc::UnboundedReceiver<Job<B>>,
    fresh: mpsc::Receiver<Job<B>>,
}

impl<B> Inbox<B> {
    /// Next job, preferring retries. `None` once the pool shuts down or
    /// no more work can arrive.
    async fn next(&mut self, shutdown: &CancellationToken) -> Option<Job<B>> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            Some(job) = self.retry.recv() => Some(job),
            Some(job) = self.fresh.recv() => Some(job),
            else => None,
        }
    }
}

struct Shared<B> {
    inbox: tokio::sync::Mutex<Inbox<B>>,
    retry_tx: mpsc::UnboundedSender<Job<B>>,
    outstanding: watch::Sender<usize>,
    completions: Arc<CompletionMap>,
    policy: RetryPolicy,
    progress: Option<ProgressSink>,
    shutdown: CancellationToken,
    failure: Mutex<Option<TransferError>>,
}

impl<B> Shared<B> {
    fn fail(&self, err: TransferError) {
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        failure.get_or_insert(err);
        self.shutdown.cancel();
    }

    fn take_failure(&self) -> Option<TransferError> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Bounded set of workers sharing one completion map.
///
/// `submit` every block, then `finish` to wait until all of them are
/// acknowledged. Dropping the pool early stops its workers.
pub struct WorkerPool<B> {
    shared: Arc<Shared<B>>,
    fresh_tx: Option<mpsc::Sender<Job<B>>>,
    workers: JoinSet<()>,
}

impl<B: WorkItem> WorkerPool<B> {
    /// Spawns `config.concurrency` workers on the current tokio runtime.
    pub fn start<T: Transport<B>>(
        transport: Arc<T>,
        completions: Arc<CompletionMap>,
        config: &TransferConfig,
        progress: Option<ProgressSink>,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let (fresh_tx, fresh_rx) = mpsc::channel(config.concurrency);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);

        let shared = Arc::new(Shared {
            inbox: tokio::sync::Mutex::new(Inbox {
                retry: retry_rx,
                fresh: fresh_rx,
            }),
            retry_tx,
            outstanding,
            completions,
            policy: config.retry.clone(),
            progress,
            shutdown: CancellationToken::new(),
            failure: Mutex::new(None),
        });

        let mut workers = JoinSet::new();
        for id in 0..config.concurrency {
            workers.spawn(run_worker(
                id,
                Arc::clone(&shared),
                Arc::clone(&transport),
            ));
        }

        Ok(Self {
            shared,
            fresh_tx: Some(fresh_tx),
            workers,
        })
    }

    /// Queues a block, waiting while every worker is busy.
    pub async fn submit(&mut self, block: B) -> Result<(), TransferError> {
        let index = block.index();
        if !self.shared.completions.contains_index(index) {
            return Err(TransferError::InvalidBlock(index));
        }
        let Some(tx) = self.fresh_tx.as_ref() else {
            return Err(TransferError::Aborted);
        };

        self.shared.outstanding.send_modify(|n| *n += 1);
        let job = Job { block, failures: 0 };

        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => {
                Err(self.shared.take_failure().unwrap_or(TransferError::Aborted))
            }
            sent = tx.send(job) => sent.map_err(|_| TransferError::Aborted),
        }
    }

    /// Waits until every submitted block is acknowledged, then stops the
    /// workers.
    ///
    /// A worker that panics takes its block with it, so the first panic
    /// fails the pool with [`TransferError::Join`].
    pub async fn finish(mut self) -> Result<(), TransferError> {
        // No more fresh work.
        self.fresh_tx.take();

        let mut outstanding = self.shared.outstanding.subscribe();
        let drained = async {
            let _ = outstanding.wait_for(|n| *n == 0).await;
        };
        tokio::pin!(drained);

        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                _ = &mut drained => break,
                Some(joined) = self.workers.join_next() => {
                    if let Err(e) = joined {
                        self.shared.fail(TransferError::Join(e.to_string()));
                        break;
                    }
                }
            }
        }
        self.shared.shutdown.cancel();

        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                self.shared.fail(TransferError::Join(e.to_string()));
            }
        }

        if let Some(err) = self.shared.take_failure() {
            return Err(err);
        }
        Ok(())
    }
}

impl<B> Drop for WorkerPool<B> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run_worker<B: WorkItem, T: Transport<B>>(
    id: usize,
    shared: Arc<Shared<B>>,
    transport: Arc<T>,
) {
    loop {
        let job = {
            let mut inbox = shared.inbox.lock().await;
            inbox.next(&shared.shutdown).await
        };
        let Some(mut job) = job else {
            break;
        };
        let index = job.block.index();

        match transport.transfer(&job.block).await {
            Ok(token) => match shared.completions.record(index, token) {
                Recorded::New => {
                    debug!(worker = id, block = index, "block acknowledged");
                    if let Some(progress) = &shared.progress {
                        progress(job.block.len());
                    }
                    shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                }
                Recorded::Duplicate => {
                    debug!(worker = id, block = index, "duplicate acknowledgement ignored");
                    shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                }
                Recorded::OutOfRange => {
                    shared.fail(TransferError::InvalidBlock(index));
                    break;
                }
            },
            Err(e) => {
                job.failures += 1;
                if shared.policy.exhausted(job.failures) {
                    shared.fail(TransferError::RetriesExhausted {
                        index,
                        attempts: job.failures,
                    });
                    break;
                }

                if job.failures % WARN_EVERY == 0 {
                    warn!(block = index, attempt = job.failures, error = %e, "block still failing, retrying");
                } else {
                    debug!(block = index, attempt = job.failures, error = %e, "block failed, retrying");
                }

                if !shared.policy.backoff.is_zero() {
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(shared.policy.backoff) => {}
                    }
                }
                if shared.retry_tx.send(job).is_err() {
                    break;
                }
            }
        }
    }
}
