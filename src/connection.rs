//! Copy-on-write connection bookkeeping.
//!
//! Writers (`add`/`remove`) serialize through a short-held mutex and publish
//! a brand new `Arc<Vec<_>>`; readers (`snapshot`) clone that `Arc` under the
//! same mutex, a cheap, constant-time operation, and then iterate the
//! clone without holding any lock. Mutation never invalidates a snapshot
//! already handed out.

use crate::transport::{ConnectionRef, DeadConnection};
use parking_lot::Mutex;
use std::sync::Arc;

/// The live/dead connection bookkeeping shared by every topic impl.
#[derive(Debug)]
pub struct ConnectionList {
    live: Mutex<Arc<Vec<ConnectionRef>>>,
    dead: Mutex<Arc<Vec<DeadConnection>>>,
}

impl Default for ConnectionList {
    fn default() -> Self {
        ConnectionList {
            live: Mutex::new(Arc::new(Vec::new())),
            dead: Mutex::new(Arc::new(Vec::new())),
        }
    }
}

impl ConnectionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `conn` to the live list. Callers are responsible for wiring
    /// the connection's cleanup callback; it should carry a weak reference
    /// to the owning impl, which this list has no knowledge of, so a dead
    /// transport never keeps the impl alive.
    pub fn add(&self, conn: ConnectionRef) {
        let mut live = self.live.lock();
        let mut new_live = (**live).clone();
        new_live.push(conn);
        *live = Arc::new(new_live);
    }

    /// Removes the connection with the given id from the live list, if
    /// present, freezing it into the dead list. Returns `true` if a
    /// connection was actually removed.
    pub fn remove(&self, id: u64) -> bool {
        let mut live = self.live.lock();
        let Some(idx) = live.iter().position(|c| c.id() == id) else {
            return false;
        };
        let mut new_live = (**live).clone();
        let removed = new_live.remove(idx);
        *live = Arc::new(new_live);
        drop(live);

        let frozen = DeadConnection::freeze(&removed);
        let mut dead = self.dead.lock();
        let mut new_dead = (**dead).clone();
        new_dead.push(frozen);
        *dead = Arc::new(new_dead);
        true
    }

    /// Returns a snapshot of the live connections, safe to iterate without
    /// holding any lock.
    pub fn snapshot(&self) -> Arc<Vec<ConnectionRef>> {
        self.live.lock().clone()
    }

    /// Returns a snapshot of the dead (frozen) connections.
    pub fn dead_snapshot(&self) -> Arc<Vec<DeadConnection>> {
        self.dead.lock().clone()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn has_connection(&self, endpoint_id: &str) -> bool {
        self.snapshot().iter().any(|c| c.endpoint_id() == endpoint_id)
    }

    pub fn has_connections(&self) -> bool {
        !self.live.lock().is_empty()
    }

    /// Closes and clears every live connection, swallowing per-connection
    /// errors. Dead connections are left untouched.
    pub fn close_all(&self) {
        let mut live = self.live.lock();
        for c in live.iter() {
            // Transport::close() has no failure mode to swallow in this
            // crate's trait (the real transport's I/O errors are its own
            // concern); log::error! here would fire if a future transport
            // exposed a fallible close.
            c.close();
        }
        *live = Arc::new(Vec::new());
    }
}
