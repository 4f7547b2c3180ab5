use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use crate::aggregator::SinkMessage;
use crate::error::CrawlError;
use crate::identity::WorkerIdentity;

/// Handle a site adapter uses to hand finished documents to the
/// aggregator. Ownership of the document transfers on push.
///
/// The channel is bounded; `push` blocks once it fills, so the engine
/// must have an aggregator draining it before documents flow.
#[derive(Clone)]
pub struct DocumentSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl DocumentSink {
    pub fn new(tx: mpsc::Sender<SinkMessage>) -> Self {
        Self { tx }
    }

    pub async fn push(&self, document: String) -> Result<(), CrawlError> {
        self.tx
            .send(SinkMessage::Document(document))
            .await
            .map_err(|_| CrawlError::Adapter("result channel closed".into()))
    }
}

/// Site-specific scrape logic, invoked once per task by a worker.
///
/// Implementations must consult the checkpoint store before doing network
/// work and must not fail for ordinary "nothing found" conditions. Only
/// errors that mean the worker itself is compromised (banned egress,
/// exhausted retries, rate limiting) should be returned; per-item failures
/// are logged and skipped so a partial result is still a result.
pub trait Adapter: Send + Sync + Clone + 'static {
    type Task: Send + Clone + fmt::Display + 'static;

    fn run(
        &self,
        task: Self::Task,
        identity: &WorkerIdentity,
        sink: &DocumentSink,
    ) -> impl Future<Output = Result<(), CrawlError>> + Send;
}

/// Loads the task backlog and per-worker identities for one crawl.
/// Implemented by crawl configurations.
pub trait Configurable {
    type Task;

    fn load_tasks(&self) -> Result<(Vec<Self::Task>, Vec<WorkerIdentity>), CrawlError>;
}
