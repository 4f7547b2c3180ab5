pub mod adapter;
pub mod aggregator;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod queue;
pub mod testutil;

pub use adapter::{Adapter, Configurable, DocumentSink};
pub use aggregator::{JsonAggregator, SinkMessage};
pub use checkpoint::{CheckpointRecord, CheckpointStore, SubUnitProgress};
pub use engine::{Engine, EngineConfig};
pub use error::CrawlError;
pub use events::{EngineEvent, EngineReporter, TracingReporter};
pub use identity::WorkerIdentity;
