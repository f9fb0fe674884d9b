//! Client-node remoting (spec §4.10): exposes an out-of-process node as an
//! in-process graph node, and drives a local node on behalf of a remote
//! server. Wire marshaling is explicitly out of scope (spec §1
//! Non-goals); [`transport`] fixes the send/receive contract and
//! [`opcode`] fixes the message vocabulary, leaving bytes-on-the-wire to
//! the concrete deployment.

#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod memory;
pub mod mix_table;
pub mod opcode;
pub mod server;
pub mod transport;
pub mod version;

pub use client::ClientNodeHandle;
pub use error::{ClientNodeError, ClientNodeResult};
pub use mix_table::{MixBinding, MixKey, MixTable};
pub use opcode::{ClientMessage, ServerMessage, INVALID_MEM_ID};
pub use server::{ServerNodeStub, LINGER_PROP};
pub use version::{Feature, NegotiatedVersion};
