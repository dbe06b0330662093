//! The four per-receive-thread queued operations (spec.md §4.1).
//!
//! API calls never join/leave/bind/close directly; they enqueue here, and
//! the receive thread drains the queues at the top of every loop
//! iteration. This keeps every socket syscall on one thread, matching the
//! lock-discipline rule in spec.md §5 ("send and recv syscalls are issued
//! with the respective lock released").

use std::net::IpAddr;

use parking_lot::Mutex;

use super::interfaces::InterfaceId;
use super::socket::SocketId;
use crate::universe::UniverseId;

/// Identifies one multicast subscription: a socket, the interface it's
/// joined on, and the group address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub socket_id: SocketId,
    pub interface: InterfaceId,
    pub group: IpAddr,
    pub universe: UniverseId,
}

/// The four queues drained once per receive-thread loop iteration.
#[derive(Default)]
pub struct OperationQueues {
    pending_subscribe: Mutex<Vec<SubscriptionKey>>,
    pending_unsubscribe: Mutex<Vec<SubscriptionKey>>,
    pending_new_sockets: Mutex<Vec<SocketId>>,
    dead_sockets: Mutex<Vec<SocketId>>,
}

impl OperationQueues {
    /// Creates empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a subscribe. If a matching unsubscribe for the same key is
    /// already pending, both are dropped and no syscall is ever made
    /// (spec.md §4.1 cancellation rule).
    pub fn enqueue_subscribe(&self, key: SubscriptionKey) {
        let mut unsub = self.pending_unsubscribe.lock();
        if let Some(pos) = unsub.iter().position(|k| *k == key) {
            unsub.swap_remove(pos);
            return;
        }
        drop(unsub);
        self.pending_subscribe.lock().push(key);
    }

    /// Enqueues an unsubscribe, applying the same cancellation rule in
    /// reverse.
    pub fn enqueue_unsubscribe(&self, key: SubscriptionKey) {
        let mut sub = self.pending_subscribe.lock();
        if let Some(pos) = sub.iter().position(|k| *k == key) {
            sub.swap_remove(pos);
            return;
        }
        drop(sub);
        self.pending_unsubscribe.lock().push(key);
    }

    /// Enqueues a newly-created socket for the receive thread to register.
    pub fn enqueue_new_socket(&self, id: SocketId) {
        self.pending_new_sockets.lock().push(id);
    }

    /// Enqueues a refcount-zero socket for the receive thread to close.
    pub fn enqueue_dead_socket(&self, id: SocketId) {
        self.dead_sockets.lock().push(id);
    }

    /// Drains every queue. Called once at the top of each receive-thread
    /// loop iteration.
    pub fn drain(&self) -> DrainedOps {
        DrainedOps {
            subscribe: std::mem::take(&mut *self.pending_subscribe.lock()),
            unsubscribe: std::mem::take(&mut *self.pending_unsubscribe.lock()),
            new_sockets: std::mem::take(&mut *self.pending_new_sockets.lock()),
            dead_sockets: std::mem::take(&mut *self.dead_sockets.lock()),
        }
    }
}

/// The contents of [OperationQueues] at one drain.
#[derive(Debug, Default)]
pub struct DrainedOps {
    pub subscribe: Vec<SubscriptionKey>,
    pub unsubscribe: Vec<SubscriptionKey>,
    pub new_sockets: Vec<SocketId>,
    pub dead_sockets: Vec<SocketId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(universe: UniverseId) -> SubscriptionKey {
        SubscriptionKey {
            socket_id: 0,
            interface: 0,
            group: crate::universe::multicast_group_v4(universe).into(),
            universe,
        }
    }

    #[test]
    fn matching_subscribe_and_unsubscribe_cancel_out() {
        let queues = OperationQueues::new();
        queues.enqueue_subscribe(key(1));
        queues.enqueue_unsubscribe(key(1));

        let drained = queues.drain();
        assert!(drained.subscribe.is_empty());
        assert!(drained.unsubscribe.is_empty());
    }

    #[test]
    fn non_matching_ops_both_survive_to_drain() {
        let queues = OperationQueues::new();
        queues.enqueue_subscribe(key(1));
        queues.enqueue_unsubscribe(key(2));

        let drained = queues.drain();
        assert_eq!(drained.subscribe.len(), 1);
        assert_eq!(drained.unsubscribe.len(), 1);
    }
}
