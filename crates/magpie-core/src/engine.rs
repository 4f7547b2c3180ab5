//! Worker-pool supervisor.
//!
//! One worker task per configured network identity, coordinated purely by
//! message passing: a shared task queue, a single result channel drained
//! by the aggregator, and one control plus one failure channel per worker.
//! The supervisor polls at a fixed interval, classifies worker failures as
//! fatal (stop the whole pool) or restart-eligible (relaunch only the
//! offending identity), and drives orderly shutdown.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, DocumentSink};
use crate::aggregator::{JsonAggregator, SinkMessage, aggregator_loop};
use crate::error::CrawlError;
use crate::events::{EngineEvent, EngineReporter, TracingReporter};
use crate::identity::WorkerIdentity;
use crate::queue::{TaskQueue, WorkItem};

/// Command pushed by the supervisor, consumed by a worker between tasks.
/// Cancellation is cooperative: an in-flight task finishes first.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Stop,
}

/// A failure that escaped a worker's task loop, together with the task it
/// was processing so a restart can redeliver it.
#[derive(Debug)]
pub struct WorkerFailure<T> {
    pub error: CrawlError,
    pub task: Option<T>,
}

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the driver should invoke [`Engine::poll_routine`].
    pub poll_interval: Duration,
    /// Pause after relaunching a worker, so a site that is actively
    /// blocking is not hot-looped against.
    pub restart_cooldown: Duration,
    /// Bounded wait for a terminated worker or the draining aggregator.
    pub drain_timeout: Duration,
    /// Result channel capacity.
    pub result_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            restart_cooldown: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(1),
            result_capacity: 1024,
        }
    }
}

struct WorkerHandle<T> {
    identity: WorkerIdentity,
    handle: JoinHandle<()>,
    control: mpsc::Sender<Command>,
    failures: mpsc::Receiver<WorkerFailure<T>>,
}

/// The worker-pool supervisor.
pub struct Engine<A: Adapter, R: EngineReporter = TracingReporter> {
    task_name: String,
    adapter: A,
    config: EngineConfig,
    queue: TaskQueue<A::Task>,
    workers: Vec<WorkerHandle<A::Task>>,
    results_tx: mpsc::Sender<SinkMessage>,
    results_rx: Option<mpsc::Receiver<SinkMessage>>,
    aggregator: Option<JoinHandle<()>>,
    reporter: R,
}

impl<A: Adapter> Engine<A, TracingReporter> {
    pub fn new(task_name: impl Into<String>, adapter: A, config: EngineConfig) -> Self {
        let (results_tx, results_rx) = mpsc::channel(config.result_capacity);
        Self {
            task_name: task_name.into(),
            adapter,
            config,
            queue: TaskQueue::new(),
            workers: Vec::new(),
            results_tx,
            results_rx: Some(results_rx),
            aggregator: None,
            reporter: TracingReporter,
        }
    }
}

impl<A: Adapter, R: EngineReporter> Engine<A, R> {
    /// Swap the event reporter (e.g. for alerting or test assertions).
    pub fn with_reporter<R2: EngineReporter>(self, reporter: R2) -> Engine<A, R2> {
        Engine {
            task_name: self.task_name,
            adapter: self.adapter,
            config: self.config,
            queue: self.queue,
            workers: self.workers,
            results_tx: self.results_tx,
            results_rx: self.results_rx,
            aggregator: self.aggregator,
            reporter,
        }
    }

    /// Launch the single-consumer aggregator task draining the result
    /// channel. May be called at most once.
    ///
    /// Must be called before workers whose adapters push documents: with
    /// no consumer, the bounded result channel eventually fills and every
    /// pushing worker blocks.
    pub fn launch_aggregator(&mut self, aggregator: JsonAggregator) -> Result<(), CrawlError> {
        let rx = self
            .results_rx
            .take()
            .ok_or_else(|| CrawlError::Config("aggregator already launched".into()))?;
        self.aggregator = Some(tokio::spawn(aggregator_loop(rx, aggregator)));
        Ok(())
    }

    /// Launch one worker per identity. Identity is 1:1 with a worker for
    /// its entire lifetime, including across restarts.
    pub fn launch_workers(&mut self, identities: Vec<WorkerIdentity>) {
        for identity in identities {
            self.reporter.report(EngineEvent::WorkerLaunched {
                worker: &identity.label(),
                rank: identity.rank,
            });
            let handle = self.spawn_worker(identity);
            self.workers.push(handle);
        }
        self.reporter.report(EngineEvent::Started {
            task_name: &self.task_name,
            workers: self.workers.len(),
        });
    }

    pub fn enqueue_task(&self, task: A::Task) {
        self.queue.push(task);
    }

    pub fn enqueue_tasks(&self, tasks: impl IntoIterator<Item = A::Task>) {
        for task in tasks {
            self.queue.push(task);
        }
    }

    /// Push one stop sentinel per worker so each exits exactly once after
    /// the backlog drains. Call after `launch_workers`.
    pub fn enqueue_stop_work(&self) {
        for _ in &self.workers {
            self.queue.push_stop();
        }
    }

    /// Remaining task-queue depth, stop sentinels included.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Broadcast stop to every worker's control channel, wake any worker
    /// blocked on the task queue, and tell the aggregator to drain.
    pub async fn stop_all_workers(&mut self) {
        for worker in &self.workers {
            let _ = worker.control.try_send(Command::Stop);
            self.queue.push_stop();
        }
        if self.aggregator.is_some() {
            let _ = self.results_tx.send(SinkMessage::Stop).await;
        }
    }

    /// One supervision pass. Returns true once the whole engine should
    /// stop: on a fatal worker error, or after every worker has exited and
    /// the aggregator (if launched) has drained.
    pub async fn poll_routine(&mut self) -> bool {
        // 1. Exception scan: classify at most one failure per worker.
        for i in 0..self.workers.len() {
            let Ok(failure) = self.workers[i].failures.try_recv() else {
                continue;
            };
            let worker = self.workers[i].identity.label();

            if failure.error.is_fatal() {
                self.reporter.report(EngineEvent::Fatal {
                    worker: &worker,
                    error: &failure.error,
                });
                self.stop_all_workers().await;
                return true;
            }

            self.reporter.report(EngineEvent::WorkerRestarted {
                worker: &worker,
                error: &failure.error,
            });
            // Redeliver the in-flight task ahead of any stop sentinels.
            if let Some(task) = failure.task {
                self.queue.requeue(task);
            }

            let replacement = self.spawn_worker(self.workers[i].identity.clone());
            let old = std::mem::replace(&mut self.workers[i], replacement);
            if !old.handle.is_finished() {
                old.handle.abort();
            }
            let _ = tokio::time::timeout(self.config.drain_timeout, old.handle).await;

            // Cooldown before touching the site again from this identity.
            tokio::time::sleep(self.config.restart_cooldown).await;
        }

        // 2. Backlog check: unconsumed work still queued ahead of drain.
        if self.queue.len() > self.workers.len() {
            return false;
        }

        // 3. Liveness check: reap exited workers.
        self.workers.retain(|worker| {
            if worker.handle.is_finished() {
                self.reporter.report(EngineEvent::WorkerExited {
                    worker: &worker.identity.label(),
                });
                false
            } else {
                true
            }
        });
        if !self.workers.is_empty() {
            return false;
        }

        // 4. Drain: all workers are gone; wait for the aggregator.
        let Some(handle) = self.aggregator.as_mut() else {
            return true;
        };
        let _ = self.results_tx.try_send(SinkMessage::Stop);
        match tokio::time::timeout(self.config.drain_timeout, &mut *handle).await {
            Ok(_) => {
                self.aggregator = None;
                self.reporter.report(EngineEvent::AggregatorStopped);
                true
            }
            // Not yet exited; report stop on a later poll cycle.
            Err(_) => false,
        }
    }

    /// Drive the poll loop until completion or external cancellation.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let mut stop_requested = false;
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                () = cancel.cancelled(), if !stop_requested => {
                    tracing::warn!("Cancellation requested, stopping all workers");
                    self.stop_all_workers().await;
                    stop_requested = true;
                }
            }
            if self.poll_routine().await {
                break;
            }
        }
        self.reporter.report(EngineEvent::Stopped {
            task_name: &self.task_name,
        });
    }

    fn spawn_worker(&self, identity: WorkerIdentity) -> WorkerHandle<A::Task> {
        let (control_tx, control_rx) = mpsc::channel(4);
        let (failure_tx, failure_rx) = mpsc::channel(4);
        let sink = DocumentSink::new(self.results_tx.clone());
        let handle = tokio::spawn(worker_loop(
            self.adapter.clone(),
            identity.clone(),
            self.queue.clone(),
            sink,
            control_rx,
            failure_tx,
        ));
        WorkerHandle {
            identity,
            handle,
            control: control_tx,
            failures: failure_rx,
        }
    }
}

/// The per-worker task loop.
///
/// Checks the control channel once per iteration, block-pops one task,
/// exits on a stop sentinel, and otherwise invokes the site adapter. Any
/// adapter error escapes the loop: it is pushed (with the in-flight task)
/// onto the failure channel and the worker exits.
async fn worker_loop<A: Adapter>(
    adapter: A,
    identity: WorkerIdentity,
    queue: TaskQueue<A::Task>,
    sink: DocumentSink,
    mut control: mpsc::Receiver<Command>,
    failures: mpsc::Sender<WorkerFailure<A::Task>>,
) {
    let label = identity.label();
    tracing::info!(worker = %label, "Worker started");
    loop {
        match control.try_recv() {
            Ok(Command::Stop) | Err(TryRecvError::Disconnected) => {
                tracing::warn!(worker = %label, "Received stop command");
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        let task = match queue.pop().await {
            WorkItem::Stop => {
                tracing::warn!(worker = %label, "Received stop sentinel");
                break;
            }
            WorkItem::Task(task) => task,
        };

        tracing::info!(worker = %label, %task, "Processing task");
        if let Err(error) = adapter.run(task.clone(), &identity, &sink).await {
            tracing::error!(worker = %label, %task, %error, "Task failed, worker exiting");
            let _ = failures
                .send(WorkerFailure {
                    error,
                    task: Some(task),
                })
                .await;
            break;
        }
    }
    tracing::info!(worker = %label, "Worker exited");
}
