//! Typed port handles on the two sides of an edge.
//!
//! An [`Inbox`] is the consumer side, an [`Outbox`] the producer side. Both
//! are thin non-owning handles over the edge's queue; a port is "present"
//! once the engine has bound it. Operations are non-blocking and wait-free
//! on the uncontended fast path.

use std::sync::Arc;

use crate::spsc::SpscQueue;

/// Marker for message types that may flow through an edge.
///
/// Envelopes are value-copied through queues, so they must be plain data:
/// `Copy`, no interior pointers, and embed their trace carrier as a field.
pub trait Envelope: Copy + Send + 'static {}

/// Consumer-side port handle with non-blocking receive.
pub struct Inbox<T> {
    queue: Option<Arc<SpscQueue<T>>>,
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self { queue: None }
    }
}

impl<T: Envelope> Inbox<T> {
    /// Creates a bound inbox. Normally done by the engine during binding.
    #[must_use]
    pub fn bound(queue: Arc<SpscQueue<T>>) -> Self {
        Self { queue: Some(queue) }
    }

    /// Returns true once the port is bound to an edge queue.
    #[must_use]
    pub fn present(&self) -> bool {
        self.queue.is_some()
    }

    /// Receives the next envelope if one is queued.
    ///
    /// Returns `None` on an empty queue or an unbound port.
    pub fn try_recv(&mut self) -> Option<T> {
        self.queue.as_ref()?.pop()
    }
}

impl<T> std::fmt::Debug for Inbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox").field("present", &self.queue.is_some()).finish()
    }
}

/// Producer-side port handle with non-blocking send.
pub struct Outbox<T> {
    queue: Option<Arc<SpscQueue<T>>>,
}

impl<T> Default for Outbox<T> {
    fn default() -> Self {
        Self { queue: None }
    }
}

impl<T: Envelope> Outbox<T> {
    /// Creates a bound outbox. Normally done by the engine during binding.
    #[must_use]
    pub fn bound(queue: Arc<SpscQueue<T>>) -> Self {
        Self { queue: Some(queue) }
    }

    /// Returns true once the port is bound to an edge queue.
    #[must_use]
    pub fn present(&self) -> bool {
        self.queue.is_some()
    }

    /// Sends an envelope, returning it back when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(msg)` when the queue is full or the port is unbound.
    pub fn try_send(&self, msg: T) -> Result<(), T> {
        match &self.queue {
            Some(queue) => queue.push(msg),
            None => Err(msg),
        }
    }
}

impl<T> std::fmt::Debug for Outbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").field("present", &self.queue.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BumpArena;

    impl Envelope for u64 {}

    #[test]
    fn test_unbound_ports() {
        let mut inbox: Inbox<u64> = Inbox::default();
        let outbox: Outbox<u64> = Outbox::default();

        assert!(!inbox.present());
        assert!(!outbox.present());
        assert_eq!(inbox.try_recv(), None);
        assert_eq!(outbox.try_send(7), Err(7));
    }

    #[test]
    fn test_bound_round_trip() {
        let arena = Arc::new(BumpArena::new(4096));
        let queue = Arc::new(SpscQueue::with_arena(4, &arena).unwrap());

        let mut inbox = Inbox::bound(Arc::clone(&queue));
        let outbox = Outbox::bound(queue);

        assert!(inbox.present());
        assert!(outbox.present());

        outbox.try_send(1).unwrap();
        outbox.try_send(2).unwrap();
        assert_eq!(inbox.try_recv(), Some(1));
        assert_eq!(inbox.try_recv(), Some(2));
        assert_eq!(inbox.try_recv(), None);
    }

    #[test]
    fn test_send_reports_full() {
        let arena = Arc::new(BumpArena::new(4096));
        let queue = Arc::new(SpscQueue::with_arena(2, &arena).unwrap());
        let outbox = Outbox::bound(queue);

        // 4 slots, 3 usable
        assert!(outbox.try_send(1).is_ok());
        assert!(outbox.try_send(2).is_ok());
        assert!(outbox.try_send(3).is_ok());
        assert_eq!(outbox.try_send(4), Err(4));
    }
}
