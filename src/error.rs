/// The central error type returned by fallible `topic_core` operations.
///
/// One variant per distinct failure mode a topic handle or impl can raise,
/// so callers can match on `Error` instead of parsing strings.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Raised at handle construction time: empty/invalid name, missing
    /// descriptor, or an out-of-range knob value (queue size, buffer size).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `publish()` was called before the owning process finished whatever
    /// initialization it requires.
    #[error("node is not initialized")]
    Uninitialized,

    /// `publish()` was called on a topic that has already been closed
    /// (via `unregister`) and the process is not shutting down.
    #[error("publish() to a closed topic")]
    ClosedTopic,

    /// The publish buffer became invalid mid-publish because the topic was
    /// closed concurrently, and the process is not shutting down.
    #[error("topic was closed during publish()")]
    ClosedDuringPublish,

    /// A message could not be encoded by the serialization backend.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// `remove_callback` was called with a (function, args) pair that is
    /// not currently registered.
    #[error("no matching callback registered")]
    NoSuchCallback,

    /// A transport-level I/O failure that was not swallowed by the
    /// per-connection eviction path (e.g. failures setting up a connection
    /// before it is added to a topic).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias, matching the convention of returning a single
/// error type from every fallible entry point.
pub type Result<T> = std::result::Result<T, Error>;
