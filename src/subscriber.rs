//! Subscriber-side topic implementation and user handle.

use crate::error::{Error, Result};
use crate::manager::get_topic_manager;
use crate::message::{deserialize_message, Descriptor, MessageType};
use crate::resolver::{is_legal_graph_name, NameResolver};
use crate::shutdown;
use crate::topic_impl::TopicImpl;
use crate::transport::ConnectionRef;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default receive buffer size hint passed down to the transport layer.
pub const DEFAULT_BUFF_SIZE: usize = 65536;

type ErasedCallback = dyn Fn(&[u8]) + Send + Sync;

/// Per-topic-name shared subscriber backend.
pub struct SubscriberImpl {
    base: TopicImpl,
    callbacks: Mutex<Vec<(u64, Arc<ErasedCallback>)>>,
    next_callback_id: AtomicU64,
    queue_size: Mutex<Option<usize>>,
    buff_size: AtomicUsize,
    tcp_nodelay: std::sync::atomic::AtomicBool,
}

#[derive(Debug, Clone)]
pub struct SubscriberStats {
    pub resolved_name: String,
    pub connections: Vec<(u64, u64, u64, bool)>,
}

impl SubscriberImpl {
    pub(crate) fn new(base: TopicImpl) -> Arc<Self> {
        Arc::new(SubscriberImpl {
            base,
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            queue_size: Mutex::new(None),
            buff_size: AtomicUsize::new(DEFAULT_BUFF_SIZE),
            tcp_nodelay: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn resolved_name(&self) -> &str {
        &self.base.resolved_name
    }

    pub fn descriptor(&self) -> Descriptor {
        self.base.descriptor
    }

    pub fn num_connections(&self) -> usize {
        self.base.num_connections()
    }

    pub fn is_closed(&self) -> bool {
        self.base.is_closed()
    }

    pub(crate) fn increment_ref_count(&self) -> usize {
        self.base.increment_ref_count()
    }

    pub(crate) fn decrement_ref_count(&self) -> usize {
        self.base.decrement_ref_count()
    }

    /// Registers a raw, type-erased callback and returns an id usable with
    /// [`SubscriberImpl::remove_callback`]. [`Subscriber::register_callback`]
    /// is the typed entry point most callers should use instead.
    ///
    /// After the new callback is in place, every currently connected peer
    /// with a non-empty latch slot replays its latched value to this
    /// callback alone, exactly once, so a late-joining callback still
    /// observes state a peer latched before the callback existed.
    pub(crate) fn add_callback_erased(&self, cb: Arc<ErasedCallback>) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().push((id, cb.clone()));

        for conn in self.base.connections.snapshot().iter() {
            if let Some(latched) = conn.latch() {
                cb(&latched);
            }
        }
        id
    }

    /// Removes a previously registered callback. Returns an error if `id`
    /// is not currently registered.
    pub fn remove_callback(&self, id: u64) -> Result<()> {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        if callbacks.len() == before {
            return Err(Error::NoSuchCallback);
        }
        Ok(())
    }

    pub fn set_queue_size(&self, queue_size: Option<usize>) -> Result<()> {
        if let Some(0) = queue_size {
            return Err(Error::InvalidArgument("queue_size must be positive or None for unbounded".to_string()));
        }
        *self.queue_size.lock() = queue_size;
        Ok(())
    }

    pub fn queue_size(&self) -> Option<usize> {
        *self.queue_size.lock()
    }

    pub fn set_buff_size(&self, buff_size: usize) -> Result<()> {
        if buff_size == 0 {
            return Err(Error::InvalidArgument("buff_size must be positive".to_string()));
        }
        self.buff_size.store(buff_size, Ordering::SeqCst);
        Ok(())
    }

    pub fn buff_size(&self) -> usize {
        self.buff_size.load(Ordering::SeqCst)
    }

    pub fn set_tcp_nodelay(&self, nodelay: bool) {
        self.tcp_nodelay.store(nodelay, Ordering::SeqCst);
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.base.close();
        self.callbacks.lock().clear();
    }

    /// Registers a newly established connection with this subscriber. The
    /// owning transport layer (out of scope for this crate) calls this once
    /// a peer has finished connecting.
    pub fn add_connection(self: &Arc<Self>, conn: ConnectionRef) {
        self.base.connections.add(conn.clone());

        let weak = Arc::downgrade(self);
        let cid = conn.id();
        conn.set_cleanup_callback(Box::new(move || {
            if let Some(strong) = weak.upgrade() {
                strong.remove_connection(cid);
            }
        }));

        // A connection to an already-latching publisher may carry its last
        // value immediately, ahead of any fresh broadcast.
        if let Some(bytes) = conn.latch() {
            self.receive_callback(&bytes);
        }
    }

    pub fn remove_connection(self: &Arc<Self>, id: u64) {
        self.base.connections.remove(id);
    }

    /// Dispatches raw wire bytes to every registered callback, isolating
    /// each callback's failure from the others and from the caller. The
    /// owning transport layer calls this whenever a frame arrives on one of
    /// this subscriber's connections.
    pub fn receive_callback(&self, data: &[u8]) {
        if self.base.is_closed() {
            if !shutdown::is_shutdown() {
                log::debug!(
                    "dropped an incoming message on closed topic [{}]",
                    self.base.resolved_name
                );
            }
            return;
        }

        let callbacks = self.callbacks.lock().clone();
        for (_, cb) in callbacks.iter() {
            cb(data);
        }
    }

    pub fn get_stats(&self) -> SubscriberStats {
        let live = self.base.connections.snapshot();
        let dead = self.base.connections.dead_snapshot();
        let connections = live
            .iter()
            .map(|c| (c.id(), c.stat_bytes(), c.stat_num_msg(), true))
            .chain(dead.iter().map(|c| (c.id, c.stat_bytes, c.stat_num_msg, false)))
            .collect();
        SubscriberStats {
            resolved_name: self.base.resolved_name.clone(),
            connections,
        }
    }

    pub(crate) fn get_stats_info(&self) -> Vec<crate::transport::ConnectionStatsInfo> {
        self.base.get_stats_info()
    }
}

fn erase_callback<T: MessageType>(topic_name: String, callback: Arc<dyn Fn(T) + Send + Sync>) -> Arc<ErasedCallback> {
    Arc::new(move |bytes: &[u8]| match deserialize_message::<T>(bytes) {
        Ok((_, message)) => callback(message),
        Err(e) => {
            if shutdown::is_shutdown() {
                log::debug!("dropping undecodable message on [{topic_name}] during shutdown: {e}");
            } else {
                log::error!("failed to decode message on [{topic_name}]: {e}");
            }
        }
    })
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("topic name is not a non-empty string".to_string()));
    }
    if !is_legal_graph_name(name) {
        log::warn!("'{name}' is not a legal graph resource name. This may cause problems with other tooling");
    }
    Ok(())
}

/// User-facing handle for receiving messages of type `T` from a topic.
pub struct Subscriber<T: MessageType> {
    inner: Option<Arc<SubscriberImpl>>,
    resolved_name: String,
    _marker: PhantomData<T>,
}

impl<T: MessageType> Subscriber<T> {
    pub fn new(name: &str, queue_size: Option<usize>, callback: Arc<dyn Fn(T) + Send + Sync>) -> Result<Self> {
        Self::with_resolver(name, queue_size, callback, &crate::resolver::IdentityResolver)
    }

    pub fn with_resolver(
        name: &str,
        queue_size: Option<usize>,
        callback: Arc<dyn Fn(T) + Send + Sync>,
        resolver: &dyn NameResolver,
    ) -> Result<Self> {
        validate_name(name)?;
        let resolved_name = resolver.resolve(name);
        let descriptor = Descriptor::of::<T>();
        let inner = get_topic_manager().acquire_subscriber(&resolved_name, descriptor)?;
        inner.set_queue_size(queue_size)?;

        inner.add_callback_erased(erase_callback(resolved_name.clone(), callback));

        Ok(Subscriber {
            inner: Some(inner),
            resolved_name,
            _marker: PhantomData,
        })
    }

    /// Registers an additional callback after construction. Returns an id
    /// usable with [`Subscriber::remove_callback`].
    pub fn register_callback(&self, callback: Arc<dyn Fn(T) + Send + Sync>) -> Result<u64> {
        let inner = self.inner.as_ref().ok_or(Error::ClosedTopic)?;
        Ok(inner.add_callback_erased(erase_callback(self.resolved_name.clone(), callback)))
    }

    pub fn remove_callback(&self, id: u64) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::ClosedTopic)?;
        inner.remove_callback(id)
    }

    pub fn get_num_connections(&self) -> usize {
        self.inner.as_ref().map(|i| i.num_connections()).unwrap_or(0)
    }

    pub fn resolved_name(&self) -> &str {
        &self.resolved_name
    }

    pub fn set_queue_size(&self, queue_size: Option<usize>) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::ClosedTopic)?;
        inner.set_queue_size(queue_size)
    }

    pub fn set_buff_size(&self, buff_size: usize) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::ClosedTopic)?;
        inner.set_buff_size(buff_size)
    }

    pub fn unregister(&mut self) {
        if self.inner.take().is_some() {
            get_topic_manager().release_subscriber(&self.resolved_name);
        }
    }
}

impl<T: MessageType> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}
