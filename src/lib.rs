//! Per-process topic registry, connection multiplexing and publish/subscribe
//! fan-out.
//!
//! A topic is identified by its resolved name. Handles of the same
//! direction (publish or subscribe) acquired against the same name share
//! one reference-counted impl, torn down when the last handle releases it.
//! See [`manager::TopicManager`] for the process-wide registry, and
//! [`publisher::Publisher`]/[`subscriber::Subscriber`] for the user-facing
//! handles.
//!
//! Wire I/O, name resolution and graph registration are intentionally left
//! to the host process: see the [`transport`], [`resolver`] and
//! [`registration`] modules for the trait boundaries this crate expects
//! them to fill.

mod connection;
mod error;
mod manager;
mod message;
mod publisher;
mod registration;
mod resolver;
mod shutdown;
mod subscriber;
mod topic_impl;
mod transport;

pub use error::{Error, Result};
pub use manager::{get_topic_manager, TopicImplHandle, TopicManager};
pub use message::{compute_md5sum, deserialize_message, serialize_message, AnyMessage, Descriptor, MessageType};
pub use publisher::{Publisher, PublisherImpl, PublisherStats, SubscribeListener};
pub use registration::{NullRegistrationListener, RegistrationListener};
pub use resolver::{is_legal_graph_name, IdentityResolver, NameResolver};
pub use shutdown::{is_initialized, is_shutdown, set_initialized, set_shutdown};
pub use subscriber::{Subscriber, SubscriberImpl, SubscriberStats, DEFAULT_BUFF_SIZE};
pub use transport::{ConnectionRef, ConnectionStatsInfo, DeadConnection, Direction, Transport};
