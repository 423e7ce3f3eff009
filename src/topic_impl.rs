//! Shared per-topic base state.
//!
//! `PublisherImpl` and `SubscriberImpl` each embed one of these rather than
//! inheriting from it (Rust has no class inheritance); this holds the
//! bookkeeping common to both directions: name, descriptor, connection
//! list, close state and reference count.

use crate::connection::ConnectionList;
use crate::message::Descriptor;
use crate::transport::{ConnectionRef, ConnectionStatsInfo};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug)]
pub struct TopicImpl {
    pub resolved_name: String,
    pub descriptor: Descriptor,
    pub connections: ConnectionList,
    closed: AtomicBool,
    ref_count: AtomicUsize,
    seq: AtomicU64,
}

impl TopicImpl {
    pub fn new(resolved_name: String, descriptor: Descriptor) -> Self {
        TopicImpl {
            resolved_name,
            descriptor,
            connections: ConnectionList::new(),
            closed: AtomicBool::new(false),
            ref_count: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent: closes every live connection (logging and swallowing
    /// per-connection failures) and clears the live list. The dead list is
    /// retained for statistics.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connections.close_all();
    }

    pub fn has_connection(&self, endpoint_id: &str) -> bool {
        self.connections.has_connection(endpoint_id)
    }

    pub fn has_connections(&self) -> bool {
        self.connections.has_connections()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.count()
    }

    /// Returns the connection currently reachable at `endpoint_id`, if any.
    pub fn find_connection(&self, endpoint_id: &str) -> Option<ConnectionRef> {
        self.connections
            .snapshot()
            .iter()
            .find(|c| c.endpoint_id() == endpoint_id)
            .cloned()
    }

    /// `(id, endpoint_id, direction, transport_type, topic_name, connected)`
    /// for every live connection, then every dead one.
    pub fn get_stats_info(&self) -> Vec<ConnectionStatsInfo> {
        let live = self.connections.snapshot();
        let dead = self.connections.dead_snapshot();
        live.iter()
            .map(|c| ConnectionStatsInfo {
                id: c.id(),
                endpoint_id: c.endpoint_id(),
                direction: c.direction(),
                transport_type: c.transport_type(),
                topic_name: self.resolved_name.clone(),
                connected: true,
            })
            .chain(dead.iter().map(|c| ConnectionStatsInfo {
                id: c.id,
                endpoint_id: c.endpoint_id.clone(),
                direction: c.direction,
                transport_type: c.transport_type.clone(),
                topic_name: self.resolved_name.clone(),
                connected: false,
            }))
            .collect()
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_ref_count(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the reference count, asserting it never goes negative,
    /// and returns the new value.
    pub(crate) fn decrement_ref_count(&self) -> usize {
        let prev = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "topic impl's reference count has gone below zero");
        prev - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AnyMessage, Descriptor};

    #[test]
    fn close_is_idempotent() {
        let impl_ = TopicImpl::new("/chat".to_string(), Descriptor::of::<AnyMessage>());
        impl_.close();
        assert!(impl_.is_closed());
        impl_.close(); // must not panic
        assert!(impl_.is_closed());
    }

    #[test]
    fn ref_count_tracks_acquire_release() {
        let impl_ = TopicImpl::new("/chat".to_string(), Descriptor::of::<AnyMessage>());
        assert_eq!(impl_.increment_ref_count(), 1);
        assert_eq!(impl_.increment_ref_count(), 2);
        assert_eq!(impl_.decrement_ref_count(), 1);
        assert_eq!(impl_.decrement_ref_count(), 0);
        assert_eq!(impl_.ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "gone below zero")]
    fn ref_count_below_zero_panics() {
        let impl_ = TopicImpl::new("/chat".to_string(), Descriptor::of::<AnyMessage>());
        impl_.decrement_ref_count();
    }
}
