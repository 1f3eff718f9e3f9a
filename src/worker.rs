// ABOUTME: Worker threads that each run a single-threaded runtime serving connection loops
// ABOUTME: Accepted streams are handed to workers round-robin; each worker owns its own subscription
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Worker pool
//!
//! Every worker is an OS thread running a current-thread tokio runtime and a
//! `LocalSet`. A worker owns one [`SubscriptionRegistry`] and spawns one local
//! task per accepted client, so all loops on a worker share one subscription
//! connection and never need locks. Workers are independent of each other:
//! each subscribes on its own.

use crate::connection_loop::{ConnectionLoop, LoopContext, LoopState};
use crate::endpoints::Endpoints;
use crate::handler::ConnectParams;
use crate::stream::IntoDuplexStream;
use crate::subscription::{ConnectionFactory, SubscriptionRegistry};
use fanout_core::errors::{AppError, AppResult};
use fanout_core::models::Channel;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::{JoinSet, LocalSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// A client stream waiting for a worker
pub struct Accepted {
    /// Channel the client asked for
    pub channel: Channel,
    /// Handler open parameters
    pub params: ConnectParams,
    /// The upgraded stream
    pub stream: Box<dyn IntoDuplexStream>,
}

/// Pool sizing and loop timing
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Number of worker threads
    pub workers: usize,
    /// Idle window for every loop
    pub idle_timeout: Duration,
}

/// Fixed set of worker threads
pub struct WorkerPool {
    queues: Mutex<Vec<mpsc::UnboundedSender<Accepted>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    next: AtomicUsize,
    workers: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Worker pool mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl WorkerPool {
    /// Start `settings.workers` threads
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for zero workers, or an internal error if a
    /// runtime or thread cannot be created
    pub fn spawn(
        settings: WorkerSettings,
        factory: Arc<dyn ConnectionFactory>,
        endpoints: Arc<Endpoints>,
    ) -> AppResult<Self> {
        if settings.workers == 0 {
            return Err(AppError::config("Worker pool needs at least one worker"));
        }

        let mut queues = Vec::with_capacity(settings.workers);
        let mut threads = Vec::with_capacity(settings.workers);
        for worker_id in 0..settings.workers {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| AppError::internal(format!("Failed to create worker runtime: {e}")))?;
            let (tx, rx) = mpsc::unbounded_channel();
            let factory = Arc::clone(&factory);
            let endpoints = Arc::clone(&endpoints);

            let handle = thread::Builder::new()
                .name(format!("fanout-worker-{worker_id}"))
                .spawn(move || {
                    run_worker(&runtime, worker_id, settings, factory, endpoints, rx);
                })
                .map_err(|e| AppError::internal(format!("Failed to spawn worker thread: {e}")))?;

            queues.push(tx);
            threads.push(handle);
        }

        info!(
            workers = settings.workers,
            idle_timeout = ?settings.idle_timeout,
            "Worker pool started"
        );
        Ok(Self {
            queues: Mutex::new(queues),
            threads: Mutex::new(threads),
            next: AtomicUsize::new(0),
            workers: settings.workers,
        })
    }

    /// Number of workers
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Hand `accepted` to the next worker
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` after shutdown or if the worker has exited
    pub fn dispatch(&self, accepted: Accepted) -> AppResult<usize> {
        let queues = lock(&self.queues);
        if queues.is_empty() {
            return Err(AppError::unavailable("Worker pool is shut down"));
        }
        let worker_id = self.next.fetch_add(1, Ordering::Relaxed) % queues.len();
        queues[worker_id]
            .send(accepted)
            .map_err(|_| AppError::unavailable(format!("Worker {worker_id} has stopped")))?;
        drop(queues);
        debug!(worker_id, "Dispatched connection");
        Ok(worker_id)
    }

    /// Close every queue and wait for the threads to exit
    ///
    /// Loops still running on a worker are aborted; they release their
    /// handles on drop without calling the handler's `close`.
    pub fn shutdown(&self) {
        lock(&self.queues).clear();
        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        lock(&self.queues).clear();
    }
}

fn run_worker(
    runtime: &Runtime,
    worker_id: usize,
    settings: WorkerSettings,
    factory: Arc<dyn ConnectionFactory>,
    endpoints: Arc<Endpoints>,
    queue: mpsc::UnboundedReceiver<Accepted>,
) {
    let local = LocalSet::new();
    local.block_on(runtime, async move {
        let context = LoopContext {
            registry: Rc::new(SubscriptionRegistry::new(factory, endpoints.channels())),
            worker_id,
            idle_timeout: settings.idle_timeout,
        };
        serve(context, endpoints, queue).await;
    });
}

async fn serve(
    context: LoopContext,
    endpoints: Arc<Endpoints>,
    mut queue: mpsc::UnboundedReceiver<Accepted>,
) {
    let mut loops: JoinSet<Option<LoopState>> = JoinSet::new();
    debug!(worker_id = context.worker_id, "Worker ready");

    loop {
        tokio::select! {
            accepted = queue.recv() => {
                let Some(accepted) = accepted else { break };
                let span = info_span!(
                    "connection",
                    worker_id = context.worker_id,
                    channel = %accepted.channel
                );
                let connection = serve_connection(context.clone(), Arc::clone(&endpoints), accepted);
                loops.spawn_local(connection.instrument(span));
            }
            Some(finished) = loops.join_next(), if !loops.is_empty() => {
                if let Err(e) = finished {
                    error!(worker_id = context.worker_id, error = %e, "Connection loop task failed");
                }
            }
        }
    }

    loops.shutdown().await;
    context.registry.shutdown();
    debug!(worker_id = context.worker_id, "Worker stopped");
}

async fn serve_connection(
    context: LoopContext,
    endpoints: Arc<Endpoints>,
    accepted: Accepted,
) -> Option<LoopState> {
    let Accepted {
        channel,
        params,
        stream,
    } = accepted;
    let mut stream = stream.into_duplex();

    let handler = match endpoints.instantiate(&channel) {
        Ok(handler) => handler,
        Err(e) => {
            warn!(error = %e, "No handler for channel");
            if let Err(release) = stream.release() {
                debug!(error = %release, "Ignoring stream release failure");
            }
            return None;
        }
    };

    match ConnectionLoop::open(&context, channel, handler, stream, &params).await {
        Ok(connection) => Some(connection.run().await),
        Err(e) => {
            warn!(error = %e, "Connection loop could not start");
            None
        }
    }
}
