pub mod cancellation;
pub mod event_bus;
pub mod keyed_lock;
pub mod logging;
pub mod retry;

pub use cancellation::CancellationToken;
pub use event_bus::{DomainEvent, EventBus, EventEnvelope, EventHandler, InMemoryEventBus};
pub use keyed_lock::KeyedLock;
pub use retry::{repeat_until, retry_async, RetryConfig, RetryError};
