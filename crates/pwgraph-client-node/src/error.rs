//! Client-node specific errors, layered over [`pwgraph_core::CoreError`].

use thiserror::Error;

/// Result alias used throughout this crate.
pub type ClientNodeResult<T> = Result<T, ClientNodeError>;

/// Errors specific to the client-node remoting contract (spec §4.10).
#[derive(Debug, Error)]
pub enum ClientNodeError {
    /// The peer requested a feature gated behind a protocol version
    /// neither side has agreed to yet.
    #[error("feature requires protocol version >= {required}, negotiated {negotiated}")]
    FeatureNotNegotiated {
        /// Minimum version required.
        required: u32,
        /// The version actually negotiated.
        negotiated: u32,
    },
    /// A `port_set_mix_info` or `port_set_io` referenced a mix that was
    /// never added.
    #[error("unknown mix (direction={direction:?}, port={port_id}, mix={mix_id})")]
    UnknownMix {
        /// The direction the message referenced.
        direction: pwgraph_spa::Direction,
        /// The port id the message referenced.
        port_id: u32,
        /// The mix id the message referenced.
        mix_id: u32,
    },
    /// A node-level `set_io`/`add_mem` referenced a `mem_id` never
    /// announced over this connection.
    #[error("unknown mem_id {0}")]
    UnknownMem(u32),
    /// The transport reported the peer closed its connection.
    #[error("transport disconnected")]
    Disconnected,
    /// Wraps a core engine error (pool allocation, negotiation, ...).
    #[error(transparent)]
    Core(#[from] pwgraph_core::CoreError),
    /// Wraps a negative-errno result from the local [`pwgraph_spa::SpaNode`]
    /// this client drives.
    #[error(transparent)]
    Node(#[from] pwgraph_spa::SpaError),
}
