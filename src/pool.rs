//! Actor-style worker pool for the parallel ingestion stages.
//!
//! A [`WorkerPool`] owns `N` actors. Each actor holds one stateful
//! [`Worker`] (a chunker, a loaded embedding model, ...) and receives work
//! over an mpsc channel, replying on a oneshot. The worker itself always
//! runs on tokio's blocking pool, so CPU-bound model inference never stalls
//! the async runtime.
//!
//! [`WorkerPool::run_all`] assigns inputs round-robin (input `i` goes to
//! actor `i % N`) and yields outputs in completion order. The first failure
//! ends the call; remaining in-flight work is abandoned, not drained.
//!
//! Teardown is [`WorkerPool::shutdown`], and dropping a pool aborts its
//! actors as well, so a pool never outlives the stage that created it.
//! [`ActorGauge`] counts live actors across pools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use context_pipeline_core::{PipelineError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A unit of stateful, blocking work.
pub trait Worker: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn process(&mut self, input: Self::Input) -> Result<Self::Output>;
}

/// Live actor counter shared by every pool built with it.
#[derive(Debug, Clone, Default)]
pub struct ActorGauge(Arc<AtomicUsize>);

impl ActorGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of actors currently alive.
    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActorGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActorGuard(self.0.clone())
    }
}

struct ActorGuard(Arc<AtomicUsize>);

impl Drop for ActorGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum WorkerMsg<I, O> {
    Process {
        input: I,
        respond_to: oneshot::Sender<Result<O>>,
    },
}

struct WorkerActor<W: Worker> {
    stage: &'static str,
    id: usize,
    worker: Option<W>,
    rx: mpsc::UnboundedReceiver<WorkerMsg<W::Input, W::Output>>,
    _guard: ActorGuard,
}

impl<W: Worker> WorkerActor<W> {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                WorkerMsg::Process { input, respond_to } => {
                    let Some(mut worker) = self.worker.take() else {
                        let _ = respond_to.send(Err(worker_lost(self.stage, self.id)));
                        break;
                    };
                    let outcome = tokio::task::spawn_blocking(move || {
                        let result = worker.process(input);
                        (worker, result)
                    })
                    .await;

                    match outcome {
                        Ok((worker, result)) => {
                            self.worker = Some(worker);
                            let _ = respond_to.send(result);
                        }
                        Err(e) => {
                            warn!(stage = self.stage, worker = self.id, error = %e, "worker crashed");
                            let _ = respond_to.send(Err(PipelineError::WorkerFailed {
                                stage: self.stage.to_string(),
                                message: format!("worker {} crashed: {}", self.id, e),
                            }));
                            break;
                        }
                    }
                }
            }
        }
        debug!(stage = self.stage, worker = self.id, "worker stopped");
    }
}

struct WorkerHandle<I, O> {
    tx: mpsc::UnboundedSender<WorkerMsg<I, O>>,
    task: JoinHandle<()>,
}

/// A fixed-size pool of [`Worker`] actors for one pipeline stage.
pub struct WorkerPool<W: Worker> {
    stage: &'static str,
    handles: Vec<WorkerHandle<W::Input, W::Output>>,
}

impl<W: Worker> WorkerPool<W> {
    /// Build `size` workers with `factory` (on the blocking pool, since
    /// construction may load a model) and start one actor per worker.
    ///
    /// If any worker fails to build, the ones already started are torn
    /// down and the error is returned.
    pub async fn spawn<F>(stage: &'static str, size: usize, gauge: &ActorGauge, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<W> + Send + Sync + 'static,
    {
        let size = size.max(1);
        let factory = Arc::new(factory);
        let mut pool = WorkerPool {
            stage,
            handles: Vec::with_capacity(size),
        };

        for id in 0..size {
            let build = factory.clone();
            let worker = tokio::task::spawn_blocking(move || build())
                .await
                .map_err(|e| PipelineError::WorkerFailed {
                    stage: stage.to_string(),
                    message: format!("worker {} panicked during startup: {}", id, e),
                })??;

            let (tx, rx) = mpsc::unbounded_channel();
            let actor = WorkerActor {
                stage,
                id,
                worker: Some(worker),
                rx,
                _guard: gauge.enter(),
            };
            let task = tokio::spawn(actor.run());
            pool.handles.push(WorkerHandle { tx, task });
        }

        debug!(stage, workers = size, "worker pool started");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Process every input, returning outputs in completion order.
    ///
    /// `on_complete(done, total)` is called after each successful unit.
    pub async fn run_all<P>(&self, inputs: Vec<W::Input>, mut on_complete: P) -> Result<Vec<W::Output>>
    where
        P: FnMut(usize, usize),
    {
        let total = inputs.len();
        if self.handles.is_empty() {
            return Err(worker_lost(self.stage, 0));
        }

        let mut pending = FuturesUnordered::new();
        for (i, input) in inputs.into_iter().enumerate() {
            let id = i % self.handles.len();
            let (respond_to, rx) = oneshot::channel();
            self.handles[id]
                .tx
                .send(WorkerMsg::Process { input, respond_to })
                .map_err(|_| worker_lost(self.stage, id))?;
            pending.push(async move { (id, rx.await) });
        }

        let mut outputs = Vec::with_capacity(total);
        while let Some((id, reply)) = pending.next().await {
            match reply {
                Ok(Ok(output)) => {
                    outputs.push(output);
                    on_complete(outputs.len(), total);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(worker_lost(self.stage, id)),
            }
        }
        Ok(outputs)
    }

    /// Stop every actor and wait until each one is gone.
    pub async fn shutdown(mut self) {
        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        for handle in &handles {
            handle.task.abort();
        }
        for handle in handles {
            drop(handle.tx);
            let _ = handle.task.await;
        }
        debug!(stage = self.stage, workers = count, "worker pool torn down");
    }
}

impl<W: Worker> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.task.abort();
        }
    }
}

fn worker_lost(stage: &str, id: usize) -> PipelineError {
    PipelineError::WorkerFailed {
        stage: stage.to_string(),
        message: format!("worker {} is no longer running", id),
    }
}
