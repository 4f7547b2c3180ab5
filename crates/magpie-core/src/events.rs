use crate::error::CrawlError;

/// Events emitted by the engine for monitoring and alerting.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    Started {
        task_name: &'a str,
        workers: usize,
    },
    WorkerLaunched {
        worker: &'a str,
        rank: usize,
    },
    /// A restart-eligible failure: only the named worker is relaunched.
    WorkerRestarted {
        worker: &'a str,
        error: &'a CrawlError,
    },
    /// A fatal failure: the whole pool is being stopped.
    Fatal {
        worker: &'a str,
        error: &'a CrawlError,
    },
    WorkerExited {
        worker: &'a str,
    },
    AggregatorStopped,
    Stopped {
        task_name: &'a str,
    },
}

/// Receives engine events (decoupled logging/alerting seam).
pub trait EngineReporter: Send + Sync {
    fn report(&self, event: EngineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl EngineReporter for TracingReporter {
    fn report(&self, event: EngineEvent<'_>) {
        match event {
            EngineEvent::Started { task_name, workers } => {
                tracing::info!(%task_name, %workers, "Engine started");
            }
            EngineEvent::WorkerLaunched { worker, rank } => {
                tracing::info!(%worker, %rank, "Worker launched");
            }
            EngineEvent::WorkerRestarted { worker, error } => {
                tracing::warn!(%worker, %error, "Worker died, restarting");
            }
            EngineEvent::Fatal { worker, error } => {
                tracing::error!(%worker, %error, "Fatal error, stopping all workers");
            }
            EngineEvent::WorkerExited { worker } => {
                tracing::info!(%worker, "Worker exited");
            }
            EngineEvent::AggregatorStopped => {
                tracing::info!("Aggregator stopped");
            }
            EngineEvent::Stopped { task_name } => {
                tracing::info!(%task_name, "Engine stopped");
            }
        }
    }
}
