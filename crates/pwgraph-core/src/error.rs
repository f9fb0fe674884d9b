//! Negative-errno error taxonomy for the graph engine (spec §7).

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors the graph engine surfaces, grouped the way spec §7 groups them.
/// Each variant documents its standard errno so callers that need the raw
/// negative-errno value (e.g. a client-node `result` reply) can recover it
/// via [`CoreError::errno`].
#[derive(Debug, Error)]
pub enum CoreError {
    // --- Negotiation ---
    /// No common format between peers.
    #[error("no common format")]
    NoCommonFormat,
    /// No common buffer layout between peers.
    #[error("no common buffer layout")]
    NoCommonBuffers,
    /// A negotiation is already in progress on this object.
    #[error("negotiation already in progress")]
    NegotiationBusy,

    // --- Resource ---
    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// Too many open file descriptors.
    #[error("too many open files")]
    TooManyFiles,
    /// The referenced plugin, factory, or memory id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    // --- Protocol ---
    /// The peer closed its connection.
    #[error("peer closed the connection")]
    PeerClosed,
    /// A malformed message payload was received.
    #[error("malformed message")]
    BadMessage,
    /// Client/server version mismatch gates a feature.
    #[error("protocol version mismatch: need >= {required}, have {actual}")]
    VersionMismatch {
        /// Minimum version required for the requested feature.
        required: u32,
        /// The peer's actual version.
        actual: u32,
    },

    // --- Realtime ---
    /// Priority elevation was denied; falls back to non-RT scheduling.
    #[error("permission denied elevating thread priority")]
    PermissionDenied,
    /// A cycle deadline was missed.
    #[error("cycle deadline exceeded (xrun)")]
    TimedOut,

    // --- Lifecycle ---
    /// The object was registered in a later generation than the observer.
    #[error("stale generation")]
    Stale,
    /// Double registration of the same global id.
    #[error("already exists")]
    AlreadyExists,
    /// Permission bits reject this binding.
    #[error("access denied")]
    AccessDenied,

    /// Wraps an I/O failure from the memory pool (memfd/mmap/eventfd
    /// syscalls).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The standard negative-errno value a C peer would observe.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::NoCommonFormat => -22,       // EINVAL
            Self::NoCommonBuffers => -95,       // ENOTSUP
            Self::NegotiationBusy => -16,       // EBUSY
            Self::OutOfMemory => -12,           // ENOMEM
            Self::TooManyFiles => -24,          // EMFILE
            Self::NotFound(_) => -2,            // ENOENT
            Self::PeerClosed => -32,            // EPIPE
            Self::BadMessage => -74,            // EBADMSG
            Self::VersionMismatch { .. } => -71, // EPROTO
            Self::PermissionDenied => -1,        // EPERM
            Self::TimedOut => -110,              // ETIMEDOUT
            Self::Stale => -116,                 // ESTALE
            Self::AlreadyExists => -17,          // EEXIST
            Self::AccessDenied => -13,           // EACCES
            Self::Io(_) => -5,                   // EIO
        }
    }
}
