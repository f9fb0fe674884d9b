//! Negative-errno error taxonomy shared by the SPA plugin contract.

use thiserror::Error;

/// Result alias for SPA operations, matching the C ABI convention of
/// returning a negative errno instead of throwing.
pub type SpaResult<T> = Result<T, SpaError>;

/// Errors a [`crate::node::SpaNode`] operation can report.
///
/// Mirrors the negative-errno codes a C SPA node returns from `spa_node_*`
/// calls. Each variant documents the call sites that can legitimately
/// produce it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SpaError {
    /// No common value could be negotiated (e.g. disjoint format sets).
    #[error("invalid argument / no common format")]
    Invalid,
    /// The parameter or operation is not supported by this node.
    #[error("operation not supported")]
    NotSupported,
    /// A negotiation or parameter update is already in progress.
    #[error("resource busy")]
    Busy,
    /// Allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// The referenced id (port, mix, param) does not exist.
    #[error("no such entry")]
    NotFound,
    /// The node/port is not in a state where the operation is valid.
    #[error("invalid state for this operation")]
    InvalidState,
    /// I/O area binding failed because the supplied size did not match.
    #[error("bad message / size mismatch")]
    BadMessage,
}

impl SpaError {
    /// The negative-errno value a C caller would observe for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::Invalid => -22,      // EINVAL
            Self::NotSupported => -95, // ENOTSUP
            Self::Busy => -16,         // EBUSY
            Self::NoMemory => -12,     // ENOMEM
            Self::NotFound => -2,      // ENOENT
            Self::InvalidState => -1,  // EPERM, used here for "wrong state"
            Self::BadMessage => -74,   // EBADMSG
        }
    }
}

/// The outcome of an async-capable SPA method: either it completed
/// synchronously, or it is pending under the given sequence number and will
/// complete via a `result` callback (see [`crate::node::NodeEvents::result`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    /// Completed synchronously.
    Done,
    /// Pending; matching completion arrives via `result(seq, ..)`.
    Pending(
        /// The async sequence number the caller should match on completion.
        u32,
    ),
}
