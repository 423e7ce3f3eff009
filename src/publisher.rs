//! Publisher-side topic implementation and user handle.

use crate::error::{Error, Result};
use crate::manager::get_topic_manager;
use crate::message::{serialize_message, Descriptor, MessageType};
use crate::resolver::{is_legal_graph_name, NameResolver};
use crate::shutdown;
use crate::topic_impl::TopicImpl;
use crate::transport::ConnectionRef;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Callback API for subscription events on a publisher.
///
/// Both methods default to doing nothing; implementors override only the
/// events they care about.
pub trait SubscribeListener<T: MessageType>: Send + Sync {
    /// Invoked when a new peer subscribes. `broadcast` publishes to every
    /// current connection; `single_peer` publishes only to the connection
    /// that just subscribed, useful for sending a peer-specific greeting
    /// ahead of the regular broadcast stream.
    fn peer_subscribe(
        &self,
        _topic_name: &str,
        _broadcast: &dyn Fn(&T) -> Result<bool>,
        _single_peer: &dyn Fn(&T) -> Result<bool>,
    ) {
    }

    /// Invoked when a peer disconnects. `num_remaining` is the number of
    /// connections still attached to the topic after this one left.
    fn peer_unsubscribe(&self, _topic_name: &str, _num_remaining: usize) {}
}

/// Type-erased form of [`SubscribeListener`], so `PublisherImpl` (which must
/// be storable in the topic manager's non-generic maps) can hold a list of
/// listeners registered by differently-typed `Publisher<T>` handles without
/// itself being generic. Constructed only by [`ListenerAdapter`].
pub(crate) trait ErasedSubscribeListener: Send + Sync {
    fn peer_subscribe(&self, topic_name: &str, publisher: &Arc<PublisherImpl>, connection: ConnectionRef);
    fn peer_unsubscribe(&self, topic_name: &str, num_remaining: usize);
}

struct ListenerAdapter<T: MessageType> {
    inner: Arc<dyn SubscribeListener<T>>,
}

impl<T: MessageType> ErasedSubscribeListener for ListenerAdapter<T> {
    fn peer_subscribe(&self, topic_name: &str, publisher: &Arc<PublisherImpl>, connection: ConnectionRef) {
        let broadcast_impl = publisher.clone();
        let broadcast = move |msg: &T| broadcast_impl.publish(msg, None);

        let single_impl = publisher.clone();
        let single_conn = connection;
        let single_peer = move |msg: &T| single_impl.publish(msg, Some(single_conn.clone()));

        self.inner.peer_subscribe(topic_name, &broadcast, &single_peer);
    }

    fn peer_unsubscribe(&self, topic_name: &str, num_remaining: usize) {
        self.inner.peer_unsubscribe(topic_name, num_remaining);
    }
}

struct PublishState {
    buffer: Vec<u8>,
    /// The exact framed bytes last successfully broadcast, replayed verbatim
    /// to newly connecting peers when latching is enabled.
    latch: Option<Vec<u8>>,
}

/// Per-topic-name shared publisher backend.
///
/// One instance is shared by every `Publisher<T>` handle acquired for the
/// same resolved name; see [`crate::manager::TopicManager`].
pub struct PublisherImpl {
    base: TopicImpl,
    publish_lock: ReentrantMutex<RefCell<PublishState>>,
    subscriber_listeners: Mutex<Vec<Arc<dyn ErasedSubscribeListener>>>,
    headers: Mutex<HashMap<String, String>>,
    is_latch: AtomicBool,
    message_data_sent: AtomicU64,
}

/// `(resolved_name, message_data_sent, [(id, bytes, num_msgs, connected)...])`
#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub resolved_name: String,
    pub message_data_sent: u64,
    pub connections: Vec<(u64, u64, u64, bool)>,
}

impl PublisherImpl {
    pub(crate) fn new(base: TopicImpl) -> Arc<Self> {
        Arc::new(PublisherImpl {
            base,
            publish_lock: ReentrantMutex::new(RefCell::new(PublishState {
                buffer: Vec::new(),
                latch: None,
            })),
            subscriber_listeners: Mutex::new(Vec::new()),
            headers: Mutex::new(HashMap::new()),
            is_latch: AtomicBool::new(false),
            message_data_sent: AtomicU64::new(0),
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

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.base.ref_count()
    }

    pub fn enable_latch(&self) {
        self.is_latch.store(true, Ordering::SeqCst);
    }

    pub fn is_latching(&self) -> bool {
        self.is_latch.load(Ordering::SeqCst)
    }

    pub fn add_headers(&self, headers: HashMap<String, String>) {
        self.headers.lock().extend(headers);
    }

    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.lock().clone()
    }

    pub(crate) fn add_subscriber_listener_erased(&self, listener: Arc<dyn ErasedSubscribeListener>) {
        self.subscriber_listeners.lock().push(listener);
    }

    /// Idempotent close, releasing the serialization buffer, listener list
    /// and headers map.
    pub(crate) fn close(&self) {
        self.base.close();
        self.subscriber_listeners.lock().clear();
        self.headers.lock().clear();
        let guard = self.publish_lock.lock();
        let mut state = guard.borrow_mut();
        state.buffer.clear();
        state.buffer.shrink_to_fit();
    }

    /// Registers a newly established connection with this publisher: appends
    /// it to the base connection list, wires its cleanup callback (via a
    /// weak reference, so a dead transport never keeps this impl alive),
    /// notifies subscriber listeners, and replays the latch if enabled. The
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

        let listeners = self.subscriber_listeners.lock().clone();
        for listener in listeners.iter() {
            listener.peer_subscribe(&self.base.resolved_name, self, conn.clone());
        }

        if self.is_latch.load(Ordering::SeqCst) {
            // Hold publish_lock across the write so a concurrent publish()
            // can't slip a newer message to this connection ahead of the
            // latch it's supposed to see first; the lock is reentrant for
            // exactly this self-call.
            let guard = self.publish_lock.lock();
            let latch_bytes = guard.borrow().latch.clone();
            if let Some(bytes) = latch_bytes {
                if let Err(e) = conn.write_data(&bytes) {
                    log::debug!(
                        "failed to send latched value to new connection [{}]: {e}",
                        conn.endpoint_id()
                    );
                }
            }
        }
    }

    pub fn remove_connection(self: &Arc<Self>, id: u64) {
        if self.base.connections.remove(id) {
            let remaining = self.base.num_connections();
            let listeners = self.subscriber_listeners.lock().clone();
            for listener in listeners.iter() {
                listener.peer_unsubscribe(&self.base.resolved_name, remaining);
            }
        }
    }

    /// Publishes `message` to every current connection (or, if
    /// `connection_override` is given, to just that one peer). Updates the
    /// latch if latching is enabled, serializes once under the publish
    /// lock, broadcasts, evicts any connection whose write fails, and
    /// updates the sent-bytes counter.
    pub fn publish<T: MessageType>(&self, message: &T, connection_override: Option<ConnectionRef>) -> Result<bool> {
        if !shutdown::is_initialized() {
            return Err(Error::Uninitialized);
        }

        if self.base.is_closed() {
            return if shutdown::is_shutdown() {
                Ok(false)
            } else {
                Err(Error::ClosedTopic)
            };
        }

        let guard = self.publish_lock.lock();
        let mut state = guard.borrow_mut();

        // Re-check: close() doesn't take publish_lock, so a concurrent
        // unregister() can race us in between the check above and this one.
        if self.base.is_closed() {
            return if shutdown::is_shutdown() {
                Ok(false)
            } else {
                Err(Error::ClosedDuringPublish)
            };
        }

        let targets: Vec<ConnectionRef> = match &connection_override {
            Some(c) => vec![c.clone()],
            None => (*self.base.connections.snapshot()).clone(),
        };

        if !self.is_latch.load(Ordering::SeqCst) && targets.is_empty() {
            return Ok(false);
        }

        state.buffer.clear();
        let seq = self.base.next_seq();
        serialize_message(&mut state.buffer, seq, message)?;

        if self.is_latch.load(Ordering::SeqCst) {
            state.latch = Some(state.buffer.clone());
        }

        if targets.is_empty() {
            state.buffer.clear();
            return Ok(false);
        }

        let mut evicted = Vec::new();
        for c in &targets {
            if shutdown::is_shutdown() {
                break;
            }
            if let Err(e) = c.write_data(&state.buffer) {
                log::debug!(
                    "publisher connection to [{}] terminated, see error for details: {e}",
                    c.endpoint_id()
                );
                evicted.push(c.clone());
            }
        }
        self.message_data_sent
            .fetch_add(state.buffer.len() as u64, Ordering::SeqCst);
        state.buffer.clear();

        drop(state);
        drop(guard);

        for c in evicted {
            c.close();
        }

        Ok(true)
    }

    pub fn get_stats(&self) -> PublisherStats {
        let live = self.base.connections.snapshot();
        let dead = self.base.connections.dead_snapshot();
        let connections = live
            .iter()
            .map(|c| (c.id(), c.stat_bytes(), c.stat_num_msg(), true))
            .chain(dead.iter().map(|c| (c.id, c.stat_bytes, c.stat_num_msg, false)))
            .collect();
        PublisherStats {
            resolved_name: self.base.resolved_name.clone(),
            message_data_sent: self.message_data_sent.load(Ordering::SeqCst),
            connections,
        }
    }

    pub(crate) fn get_stats_info(&self) -> Vec<crate::transport::ConnectionStatsInfo> {
        self.base.get_stats_info()
    }
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

/// User-facing handle for publishing messages of type `T` to a topic.
///
/// Multiple `Publisher<T>` handles for the same resolved name share one
/// [`PublisherImpl`], reference-counted and torn down when the last handle
/// releases it.
pub struct Publisher<T: MessageType> {
    inner: Option<Arc<PublisherImpl>>,
    resolved_name: String,
    _marker: PhantomData<T>,
}

impl<T: MessageType> Publisher<T> {
    /// Creates a publisher against the identity resolver. Use
    /// [`Publisher::with_resolver`] to plug in a real namespace/remapping
    /// layer.
    pub fn new(
        name: &str,
        listener: Option<Arc<dyn SubscribeListener<T>>>,
        latch: bool,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        Self::with_resolver(name, listener, latch, headers, &crate::resolver::IdentityResolver)
    }

    pub fn with_resolver(
        name: &str,
        listener: Option<Arc<dyn SubscribeListener<T>>>,
        latch: bool,
        headers: Option<HashMap<String, String>>,
        resolver: &dyn NameResolver,
    ) -> Result<Self> {
        validate_name(name)?;
        let resolved_name = resolver.resolve(name);
        let descriptor = Descriptor::of::<T>();
        let inner = get_topic_manager().acquire_publisher(&resolved_name, descriptor)?;

        if let Some(listener) = listener {
            let adapter = Arc::new(ListenerAdapter { inner: listener });
            inner.add_subscriber_listener_erased(adapter);
        }
        if latch {
            inner.enable_latch();
        }
        if let Some(headers) = headers {
            inner.add_headers(headers);
        }

        Ok(Publisher {
            inner: Some(inner),
            resolved_name,
            _marker: PhantomData,
        })
    }

    /// Registers an additional subscribe listener after construction.
    pub fn add_subscriber_listener(&self, listener: Arc<dyn SubscribeListener<T>>) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::ClosedTopic)?;
        inner.add_subscriber_listener_erased(Arc::new(ListenerAdapter { inner: listener }));
        Ok(())
    }

    pub fn publish(&self, message: &T) -> Result<bool> {
        let inner = self.inner.as_ref().ok_or(Error::ClosedTopic)?;
        inner.publish(message, None)
    }

    pub fn get_num_connections(&self) -> usize {
        self.inner.as_ref().map(|i| i.num_connections()).unwrap_or(0)
    }

    pub fn resolved_name(&self) -> &str {
        &self.resolved_name
    }

    /// Releases this handle's reference. Subsequent calls are no-ops.
    pub fn unregister(&mut self) {
        if self.inner.take().is_some() {
            get_topic_manager().release_publisher(&self.resolved_name);
        }
    }
}

impl<T: MessageType> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Direction;
    use std::sync::atomic::{AtomicBool as StdAtomicBool, AtomicU64 as StdAtomicU64};
    use std::sync::Mutex as StdMutex;

    #[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
    struct Str {
        data: String,
    }
    impl MessageType for Str {
        const TYPE_NAME: &'static str = "test/Str";
        const MD5SUM: &'static str = "strmd5";
    }

    #[derive(Debug)]
    struct RecordingTransport {
        id: u64,
        endpoint_id: String,
        sent: StdMutex<Vec<Vec<u8>>>,
        bytes: StdAtomicU64,
        closed: StdAtomicBool,
        fail_writes: StdAtomicBool,
    }

    impl crate::transport::Transport for RecordingTransport {
        fn id(&self) -> u64 {
            self.id
        }
        fn endpoint_id(&self) -> String {
            self.endpoint_id.clone()
        }
        fn direction(&self) -> Direction {
            Direction::Outbound
        }
        fn transport_type(&self) -> String {
            "MOCK".to_string()
        }
        fn stat_bytes(&self) -> u64 {
            self.bytes.load(Ordering::SeqCst)
        }
        fn stat_num_msg(&self) -> u64 {
            self.sent.lock().unwrap().len() as u64
        }
        fn done(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        fn latch(&self) -> Option<Vec<u8>> {
            None
        }
        fn write_data(&self, data: &[u8]) -> std::io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "terminated"));
            }
            self.bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn set_cleanup_callback(&self, _cb: Box<dyn Fn() + Send + Sync>) {}
    }

    fn recording(id: u64) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            id,
            endpoint_id: format!("peer-{id}"),
            sent: StdMutex::new(Vec::new()),
            bytes: StdAtomicU64::new(0),
            closed: StdAtomicBool::new(false),
            fail_writes: StdAtomicBool::new(false),
        })
    }

    fn new_impl(name: &str) -> Arc<PublisherImpl> {
        PublisherImpl::new(TopicImpl::new(name.to_string(), Descriptor::of::<Str>()))
    }

    #[test]
    fn publish_with_no_subscribers_returns_false_without_error() {
        let impl_ = new_impl("/chat");
        let msg = Str { data: "hi".to_string() };
        assert_eq!(impl_.publish(&msg, None).unwrap(), false);
    }

    #[test]
    fn publish_broadcasts_to_all_connections() {
        let impl_ = new_impl("/chat");
        let c1 = recording(1);
        let c2 = recording(2);
        impl_.add_connection(c1.clone());
        impl_.add_connection(c2.clone());

        let msg = Str { data: "hi".to_string() };
        assert_eq!(impl_.publish(&msg, None).unwrap(), true);
        assert_eq!(c1.sent.lock().unwrap().len(), 1);
        assert_eq!(c2.sent.lock().unwrap().len(), 1);
        assert_eq!(impl_.num_connections(), 2);
    }

    #[test]
    fn failing_connection_is_evicted_others_unaffected() {
        let impl_ = new_impl("/chat");
        let c1 = recording(1);
        let c2 = recording(2);
        let c3 = recording(3);
        c2.fail_writes.store(true, Ordering::SeqCst);
        impl_.add_connection(c1.clone());
        impl_.add_connection(c2.clone());
        impl_.add_connection(c3.clone());

        let msg = Str { data: "hi".to_string() };
        assert_eq!(impl_.publish(&msg, None).unwrap(), true);

        assert_eq!(c1.sent.lock().unwrap().len(), 1);
        assert_eq!(c3.sent.lock().unwrap().len(), 1);
        assert!(c2.done());
        assert_eq!(impl_.num_connections(), 2);

        // subsequent publish only targets the two survivors
        assert_eq!(impl_.publish(&msg, None).unwrap(), true);
        assert_eq!(c1.sent.lock().unwrap().len(), 2);
        assert_eq!(c3.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn latch_updates_even_with_no_subscribers() {
        let impl_ = new_impl("/state");
        impl_.enable_latch();
        let msg = Str { data: "READY".to_string() };
        assert_eq!(impl_.publish(&msg, None).unwrap(), false);

        // a subsequent connection should immediately receive the latch
        let c1 = recording(1);
        impl_.add_connection(c1.clone());
        assert_eq!(c1.sent.lock().unwrap().len(), 1);
        let (_, decoded): (u64, Str) = crate::message::deserialize_message(&c1.sent.lock().unwrap()[0]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn publish_after_close_is_an_error_when_not_shutdown() {
        let impl_ = new_impl("/chat");
        impl_.close();
        let msg = Str { data: "hi".to_string() };
        let err = impl_.publish(&msg, None).unwrap_err();
        assert!(matches!(err, Error::ClosedTopic));
    }

    #[test]
    fn publish_after_close_during_shutdown_is_silent() {
        let impl_ = new_impl("/chat");
        impl_.close();
        shutdown::set_shutdown(true);
        let msg = Str { data: "hi".to_string() };
        let result = impl_.publish(&msg, None).unwrap();
        assert_eq!(result, false);
        shutdown::set_shutdown(false);
    }

    #[test]
    fn close_is_idempotent() {
        let impl_ = new_impl("/chat");
        impl_.close();
        impl_.close();
        assert!(impl_.is_closed());
    }

    #[test]
    fn publish_before_initialization_is_an_error() {
        let impl_ = new_impl("/chat");
        shutdown::set_initialized(false);
        let msg = Str { data: "hi".to_string() };
        let err = impl_.publish(&msg, None).unwrap_err();
        shutdown::set_initialized(true);
        assert!(matches!(err, Error::Uninitialized));
    }

    struct RecordingListener {
        subscribed: StdMutex<Vec<String>>,
        unsubscribed: StdMutex<Vec<(String, usize)>>,
    }

    impl SubscribeListener<Str> for RecordingListener {
        fn peer_subscribe(
            &self,
            topic_name: &str,
            _broadcast: &dyn Fn(&Str) -> Result<bool>,
            single_peer: &dyn Fn(&Str) -> Result<bool>,
        ) {
            self.subscribed.lock().unwrap().push(topic_name.to_string());
            single_peer(&Str { data: "greeting".to_string() }).unwrap();
        }

        fn peer_unsubscribe(&self, topic_name: &str, num_remaining: usize) {
            self.unsubscribed.lock().unwrap().push((topic_name.to_string(), num_remaining));
        }
    }

    #[test]
    fn subscribe_listener_observes_peer_subscribe_and_unsubscribe() {
        let impl_ = new_impl("/chat");
        let listener = Arc::new(RecordingListener {
            subscribed: StdMutex::new(Vec::new()),
            unsubscribed: StdMutex::new(Vec::new()),
        });
        impl_.add_subscriber_listener_erased(Arc::new(ListenerAdapter { inner: listener.clone() }));

        let c1 = recording(1);
        impl_.add_connection(c1.clone());

        assert_eq!(listener.subscribed.lock().unwrap().as_slice(), ["/chat".to_string()]);
        // peer_subscribe's single_peer call went straight to c1, ahead of
        // any broadcast.
        assert_eq!(c1.sent.lock().unwrap().len(), 1);

        impl_.remove_connection(1);
        assert_eq!(listener.unsubscribed.lock().unwrap().as_slice(), [("/chat".to_string(), 0)]);
    }
}
