//! SPA plugin ABI: the node handle contract every graph node wraps, and the
//! factory/plugin-loader machinery that instantiates concrete plugin nodes.
//!
//! This crate deliberately treats the wire format of a node's params as
//! opaque (see [`param::PodValue`]) — marshaling PODs over a transport is
//! the protocol layer's job, explicitly out of scope per the top-level
//! specification.

pub mod error;
pub mod factory;
pub mod node;
pub mod param;

pub use error::{AsyncStatus, SpaError, SpaResult};
pub use factory::{FactoryEnumFn, LoadedPlugin, LoaderError, PluginLoader, SpaFactory, SupportItem};
pub use node::{Command, IoType, NodeEvents, NullEvents, NullNode, ProcessStatus, SpaNode};
pub use param::{Direction, Param, ParamFlags, ParamId, PodValue};
