//! Param identifiers and the plain-old-data payload carried between a node
//! and its peers during format/buffer negotiation.

/// Direction of a port relative to the node that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data flows into the node on this port.
    Input,
    /// Data flows out of the node on this port.
    Output,
}

impl Direction {
    /// The other direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// The kind of parameter being enumerated, set, or negotiated.
///
/// A small, closed set covering what the core and the reconciliation logic
/// in the Link component need to reason about; concrete plugins may expose
/// additional vendor params opaquely via [`ParamId::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    /// `EnumFormat` — lists supported formats, narrowed by `Format`.
    EnumFormat,
    /// `Format` — the format negotiated/selected on a port.
    Format,
    /// `Buffers` — buffer count/size/stride/blocks constraints.
    Buffers,
    /// `Meta` — metadata (Header, Ringbuffer, ...) a buffer must carry.
    Meta,
    /// `IO` — which IO area kinds (Buffers, Clock, Position, RateMatch) a
    /// port or node can bind.
    Io,
    /// `Props` — generic node/port properties (volume, mute, ...).
    Props,
    /// `PortConfig` — dynamic port reconfiguration request.
    PortConfig,
    /// `ProcessLatency` — reported latency in samples for this node.
    ProcessLatency,
    /// A vendor/plugin-specific param identified by an opaque numeric id.
    Other(u32),
}

/// A single negotiable value for a param: an opaque, comparable blob.
///
/// Real PipeWire passes PODs (structured binary) here; this crate treats the
/// payload opaquely and leaves marshaling to the (out-of-scope) protocol
/// layer. `PodValue` is Clone + PartialEq so the Link component can test set
/// intersection without needing to understand the encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodValue(pub Vec<u8>);

impl PodValue {
    /// Wrap raw bytes as an opaque POD value.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

/// A `(id, value)` param entry as delivered through `enum_params`/`set_param`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Which param this value belongs to.
    pub id: ParamId,
    /// The opaque payload.
    pub value: PodValue,
}

impl Param {
    /// Construct a new param entry.
    #[must_use]
    pub const fn new(id: ParamId, value: PodValue) -> Self {
        Self { id, value }
    }
}

bitflags::bitflags! {
    /// Flags passed to `set_param`/`port_set_param`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamFlags: u32 {
        /// Reset previously set values for this param id before applying.
        const RESET = 1 << 0;
        /// Only test whether the param would be accepted; do not apply it.
        const TEST_ONLY = 1 << 1;
        /// Fixate remaining choice ranges to a single value.
        const FIXATE = 1 << 2;
    }
}
