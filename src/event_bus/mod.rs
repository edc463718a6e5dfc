// ============================================================================
// Event Bus - typed, synchronous, priority-ordered dispatch
// ============================================================================
//
// Generic infrastructure: no order or ledger types live here.
// Domain events implement `DomainEvent`; listeners subscribe to an event
// kind with a fixed priority and are invoked lowest priority first.
//
// ============================================================================

mod event;
mod dispatcher;

pub use event::{DomainEvent, EventEnvelope, serialize_event};
pub use dispatcher::{DispatchError, EventBus, EventListener, DEFAULT_MAX_DEPTH};
