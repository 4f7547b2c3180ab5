//! Test utilities: scripted adapter and counting reporter.
//!
//! Handwritten mocks for engine tests. Interior mutability through
//! `Arc<Mutex<_>>` so tests can assert on recorded behavior.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapter::{Adapter, DocumentSink};
use crate::error::CrawlError;
use crate::events::{EngineEvent, EngineReporter};
use crate::identity::WorkerIdentity;

/// What a [`ScriptedAdapter`] should do for one invocation of a task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Succeed, emitting the given documents.
    Emit(Vec<String>),
    /// Return the error, killing the worker.
    Fail(CrawlError),
}

/// Adapter whose behavior is scripted per task.
///
/// Outcomes registered via [`on`](Self::on) are consumed in order; once a
/// task's script is exhausted (or was never set) the adapter succeeds and
/// emits a single `{"task": …}` document. That default makes
/// fail-once-then-succeed restart scenarios one-liners.
#[derive(Clone)]
pub struct ScriptedAdapter {
    script: Arc<Mutex<HashMap<String, VecDeque<TaskOutcome>>>>,
    /// Tasks that ran to completion, in completion order.
    pub completed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(HashMap::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue the next outcome for `task`.
    pub fn on(self, task: &str, outcome: TaskOutcome) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .push_back(outcome);
        self
    }
}

impl Adapter for ScriptedAdapter {
    type Task = String;

    async fn run(
        &self,
        task: String,
        _identity: &WorkerIdentity,
        sink: &DocumentSink,
    ) -> Result<(), CrawlError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .get_mut(&task)
            .and_then(VecDeque::pop_front);

        match outcome {
            Some(TaskOutcome::Fail(error)) => Err(error),
            Some(TaskOutcome::Emit(documents)) => {
                for document in documents {
                    sink.push(document).await?;
                }
                self.completed.lock().unwrap().push(task);
                Ok(())
            }
            None => {
                sink.push(format!("{{\"task\":\"{task}\"}}")).await?;
                self.completed.lock().unwrap().push(task);
                Ok(())
            }
        }
    }
}

/// Reporter that counts fatal and restart events.
#[derive(Clone, Default)]
pub struct CountingReporter {
    fatals: Arc<AtomicUsize>,
    restarts: Arc<AtomicUsize>,
}

impl CountingReporter {
    pub fn fatals(&self) -> usize {
        self.fatals.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl EngineReporter for CountingReporter {
    fn report(&self, event: EngineEvent<'_>) {
        match event {
            EngineEvent::Fatal { .. } => {
                self.fatals.fetch_add(1, Ordering::SeqCst);
            }
            EngineEvent::WorkerRestarted { .. } => {
                self.restarts.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
