//! Infrastructure Adapters
//!
//! Implementations of the domain ports.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Ports (crate::domain)                     │
//! │  ShardStore │ MetadataStore │ ReachabilityProbe │ Publisher   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (this module)                     │
//! │  LocalDiskStore      - shards as files under each mount       │
//! │  JsonMetadataStore   - pools and catalog as JSON documents    │
//! │  InMemory*           - test doubles with fault injection      │
//! │  *EventPublisher     - tracing sink, in-memory collector      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod event_publisher;
mod json_store;
mod local_disk;
mod memory;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use json_store::JsonMetadataStore;
pub use local_disk::{LocalDiskStore, SHARD_DIR};
pub use memory::{InMemoryMetadataStore, InMemoryShardStore};
