//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for disks, metadata storage,
//!   reachability probes, topology observers and event sinks
//! - **Events** (`events.rs`) - Domain events for audit and decoupling

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{
    EventPublisher, MetadataStore, ReachabilityProbe, ShardKey, ShardStore, TopologyObserver,
};
