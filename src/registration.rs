//! The graph-registration listener contract.
//!
//! A real deployment wires this to a master/registry client that announces
//! topic advertise/subscribe events to the rest of the graph. This crate
//! only declares the boundary and the default no-op used when nothing
//! outside the process cares.

use crate::transport::Direction;

/// Callback API a `TopicManager` notifies on every topic add/remove.
///
/// `added`/`removed` may be invoked while the manager lock is held and may
/// be slow (an RPC to a master process, say); callers providing a real
/// implementation should keep that in mind, or queue work internally
/// rather than blocking here.
pub trait RegistrationListener: Send + Sync {
    fn added(&self, resolved_name: &str, type_name: &str, direction: Direction);
    fn removed(&self, resolved_name: &str, type_name: &str, direction: Direction);
}

/// A listener that does nothing, for standalone use and tests.
#[derive(Debug, Default)]
pub struct NullRegistrationListener;

impl RegistrationListener for NullRegistrationListener {
    fn added(&self, _resolved_name: &str, _type_name: &str, _direction: Direction) {}
    fn removed(&self, _resolved_name: &str, _type_name: &str, _direction: Direction) {}
}
