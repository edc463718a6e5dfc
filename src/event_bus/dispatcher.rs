use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, ThreadId};

use uuid::Uuid;

use super::event::{DomainEvent, EventEnvelope};

// ============================================================================
// Event Bus - explicit replacement for ambient hook registration
// ============================================================================
//
// Listeners are registered per event kind with a priority. Publishing runs
// every matching listener to completion, lowest priority first, ties in
// registration order. A listener may publish further events through the
// bus it is handed; those nest inside the current dispatch and inherit its
// correlation id.
//
// ============================================================================

/// Nesting limit for handler-published events.
pub const DEFAULT_MAX_DEPTH: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch depth {depth} exceeded while publishing {event_type}")]
    DepthExceeded { depth: u32, event_type: &'static str },
}

/// A subscriber on an [`EventBus`].
pub trait EventListener<E: DomainEvent, Err>: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, envelope: &EventEnvelope<E>, bus: &EventBus<E, Err>) -> Result<(), Err>;
}

struct Registration<E: DomainEvent, Err> {
    kind: E::Kind,
    priority: i32,
    sequence: usize,
    listener: Arc<dyn EventListener<E, Err>>,
}

#[derive(Clone, Copy)]
struct Frame {
    event_id: Uuid,
    correlation_id: Uuid,
    depth: u32,
}

pub struct EventBus<E: DomainEvent, Err> {
    registrations: RwLock<Vec<Registration<E, Err>>>,
    frames: Mutex<HashMap<ThreadId, Vec<Frame>>>,
    max_depth: u32,
}

impl<E, Err> EventBus<E, Err>
where
    E: DomainEvent,
    Err: From<DispatchError>,
{
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: u32) -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            max_depth,
        }
    }

    /// Register `listener` for events of `kind`.
    pub fn subscribe(&self, kind: E::Kind, priority: i32, listener: Arc<dyn EventListener<E, Err>>) {
        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        let sequence = registrations.len();

        tracing::debug!(
            listener = listener.name(),
            kind = ?kind,
            priority = priority,
            "Registered event listener"
        );

        registrations.push(Registration { kind, priority, sequence, listener });
        registrations.sort_by_key(|r| (r.priority, r.sequence));
    }

    /// Names of the listeners for `kind`, in dispatch order.
    pub fn listeners_for(&self, kind: E::Kind) -> Vec<&'static str> {
        self.matching(kind).iter().map(|l| l.name()).collect()
    }

    /// Publish `event` and run all its listeners before returning.
    ///
    /// The first listener error aborts the dispatch and is returned.
    pub fn publish(&self, event: E) -> Result<Uuid, Err> {
        let parent = self.current_frame();
        let envelope = match parent {
            Some(frame) => EventEnvelope::new(event, frame.correlation_id)
                .caused_by(frame.event_id, frame.depth + 1),
            None => EventEnvelope::new(event, Uuid::new_v4()),
        };

        if envelope.depth > self.max_depth {
            tracing::error!(
                event_type = %envelope.event_type,
                depth = envelope.depth,
                "Event dispatch depth exceeded"
            );
            return Err(DispatchError::DepthExceeded {
                depth: envelope.depth,
                event_type: envelope.event_data.event_type(),
            }
            .into());
        }

        let listeners = self.matching(envelope.event_data.kind());

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            depth = envelope.depth,
            listeners = listeners.len(),
            "Dispatching event"
        );

        let _frame = FrameGuard::push(
            self,
            Frame {
                event_id: envelope.event_id,
                correlation_id: envelope.correlation_id,
                depth: envelope.depth,
            },
        );

        for listener in listeners {
            listener.handle(&envelope, self)?;
        }

        Ok(envelope.event_id)
    }

    fn matching(&self, kind: E::Kind) -> Vec<Arc<dyn EventListener<E, Err>>> {
        let registrations = self.registrations.read().unwrap_or_else(|e| e.into_inner());
        registrations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.listener.clone())
            .collect()
    }

    fn current_frame(&self) -> Option<Frame> {
        let frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.get(&thread::current().id()).and_then(|stack| stack.last().copied())
    }
}

impl<E, Err> Default for EventBus<E, Err>
where
    E: DomainEvent,
    Err: From<DispatchError>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Pops the dispatch frame when the publishing call unwinds or returns.
struct FrameGuard<'a, E: DomainEvent, Err> {
    bus: &'a EventBus<E, Err>,
    thread: ThreadId,
}

impl<'a, E: DomainEvent, Err> FrameGuard<'a, E, Err> {
    fn push(bus: &'a EventBus<E, Err>, frame: Frame) -> Self {
        let thread = thread::current().id();
        let mut frames = bus.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.entry(thread).or_default().push(frame);
        Self { bus, thread }
    }
}

impl<E: DomainEvent, Err> Drop for FrameGuard<'_, E, Err> {
    fn drop(&mut self) {
        let mut frames = self.bus.frames.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stack) = frames.get_mut(&self.thread) {
            stack.pop();
            if stack.is_empty() {
                frames.remove(&self.thread);
            }
        }
    }
}
