/// Settings loading (defaults, `tidebus.toml`, `TIDEBUS__*` environment).
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Pub/Sub: Broker, Listener, Event.
pub mod pubsub;
/// Delivery queue: push/pull reconciliation for one consumer.
pub mod queue;
/// One-shot removal of expired entries.
pub mod retention;
/// Ordered event stores (in-memory and file-backed).
pub mod store;
/// Topic name validation.
pub mod topic;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::{Settings, StoreKind};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Pub/Sub API.
pub use pubsub::{Broker, BrokerOptions, Event, Listener, PubSubEngine, SubscriptionId};
/// Delivery queue.
pub use queue::{DeliveryQueue, QueueOptions};
/// Retention.
pub use retention::{sweep, SweepReport};
/// Stores.
pub use store::{Envelope, EventStore, FileStore, MemoryStore, StoredEntry, SyncPolicy};
/// Errors.
pub use tidebus_error::{StackError, StatusCode, TidebusResult};
/// Topics.
pub use topic::{validate_topic, Topics};
