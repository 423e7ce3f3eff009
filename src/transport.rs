//! The transport contract consumed by the rest of this crate.
//!
//! Framing, handshakes and socket I/O belong to whatever concrete transport
//! a deployment plugs in; this module only declares the trait it must
//! implement and the bookkeeping types ([`DeadConnection`], [`Direction`])
//! the topic core builds around it.

use std::sync::Arc;

/// Whether a connection carries data out of this node ("o", a publisher's
/// connection to a subscriber) or into it ("i", a subscriber's connection
/// to a publisher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "i",
            Direction::Outbound => "o",
        }
    }
}

/// A duplex byte channel to one peer, owned by a topic impl.
///
/// Implementors are expected to invoke the cleanup callback registered via
/// [`Transport::set_cleanup_callback`] exactly once, after [`Transport::close`]
/// has completed. This is how a topic impl learns a connection died so it
/// can move it from the live list to the dead list.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Stable identifier for this connection, unique within the process.
    fn id(&self) -> u64;

    /// Identifier of the peer node/endpoint this connection talks to.
    fn endpoint_id(&self) -> String;

    fn direction(&self) -> Direction;

    /// A short tag identifying the transport implementation, e.g. `"TCPROS"`.
    fn transport_type(&self) -> String;

    /// Total bytes moved over this connection so far.
    fn stat_bytes(&self) -> u64;

    /// Total messages moved over this connection so far.
    fn stat_num_msg(&self) -> u64;

    /// True once the connection has been closed.
    fn done(&self) -> bool;

    /// Last value received on an inbound, latching connection, if any.
    /// Always `None` for outbound connections.
    fn latch(&self) -> Option<Vec<u8>>;

    /// Writes `data` to the peer. Implementations should treat failures as
    /// transport termination; the caller evicts the connection on error
    /// rather than treating it as fatal to the broadcast as a whole.
    fn write_data(&self, data: &[u8]) -> std::io::Result<()>;

    /// Closes the transport. Idempotent.
    fn close(&self);

    /// Registers a callback to run exactly once, after `close` completes.
    fn set_cleanup_callback(&self, cb: Box<dyn Fn() + Send + Sync>);
}

/// A reference-counted handle to a live transport, as stored in a
/// [`crate::connection::ConnectionList`].
pub type ConnectionRef = Arc<dyn Transport>;

/// A frozen statistical snapshot of a formerly live connection, retained
/// after removal solely for stats.
#[derive(Debug, Clone)]
pub struct DeadConnection {
    pub id: u64,
    pub endpoint_id: String,
    pub direction: Direction,
    pub transport_type: String,
    pub stat_bytes: u64,
    pub stat_num_msg: u64,
}

impl DeadConnection {
    /// Freezes a live connection's current stats into a [`DeadConnection`].
    pub fn freeze(conn: &ConnectionRef) -> Self {
        DeadConnection {
            id: conn.id(),
            endpoint_id: conn.endpoint_id(),
            direction: conn.direction(),
            transport_type: conn.transport_type(),
            stat_bytes: conn.stat_bytes(),
            stat_num_msg: conn.stat_num_msg(),
        }
    }
}

/// One row of `get_stats_info()`'s output: `(id, endpoint_id, direction,
/// transport_type, topic_name, connected)`.
#[derive(Debug, Clone)]
pub struct ConnectionStatsInfo {
    pub id: u64,
    pub endpoint_id: String,
    pub direction: Direction,
    pub transport_type: String,
    pub topic_name: String,
    pub connected: bool,
}
