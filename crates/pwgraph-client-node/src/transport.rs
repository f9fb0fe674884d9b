//! Transport abstraction (spec §4.10 "Transport is an abstract stream, a
//! Unix socket in practice"). Marshaling these messages onto bytes is
//! explicitly out of scope (spec §1 Non-goals); this module only fixes the
//! send/receive contract both sides of a client-node connection use.

use crate::error::ClientNodeResult;
use crate::opcode::{ClientMessage, ServerMessage};

/// One side of a client-node connection, as seen by the server (talks in
/// [`ServerMessage`], listens for [`ClientMessage`]).
pub trait ServerTransport: Send {
    /// Send a message to the remote client.
    ///
    /// # Errors
    ///
    /// [`crate::error::ClientNodeError::Disconnected`] if the peer has
    /// closed the connection.
    fn send(&mut self, message: ServerMessage) -> ClientNodeResult<()>;

    /// Non-blocking poll for the next message from the client, `None` if
    /// nothing is pending.
    ///
    /// # Errors
    ///
    /// [`crate::error::ClientNodeError::Disconnected`] if the peer has
    /// closed the connection.
    fn try_recv(&mut self) -> ClientNodeResult<Option<ClientMessage>>;

    /// Raw fd to add to an event loop's readable-interest set so `recv`
    /// can be driven from `Loop::add_io` rather than polled.
    fn as_raw_fd(&self) -> std::os::fd::RawFd;
}

/// One side of a client-node connection, as seen by the client (talks in
/// [`ClientMessage`], listens for [`ServerMessage`]).
pub trait ClientTransport: Send {
    /// Send a message to the remote server.
    ///
    /// # Errors
    ///
    /// [`crate::error::ClientNodeError::Disconnected`] if the peer has
    /// closed the connection.
    fn send(&mut self, message: ClientMessage) -> ClientNodeResult<()>;

    /// Non-blocking poll for the next message from the server, `None` if
    /// nothing is pending.
    ///
    /// # Errors
    ///
    /// [`crate::error::ClientNodeError::Disconnected`] if the peer has
    /// closed the connection.
    fn try_recv(&mut self) -> ClientNodeResult<Option<ServerMessage>>;

    /// Raw fd to add to an event loop's readable-interest set.
    fn as_raw_fd(&self) -> std::os::fd::RawFd;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{ClientMessage, ClientTransport, ClientNodeResult, ServerMessage, ServerTransport};
    use std::collections::VecDeque;
    use std::os::fd::RawFd;

    /// An in-process pair of transports for tests, backed by two queues
    /// rather than a real socket.
    pub struct LoopbackPair {
        pub server: LoopbackServer,
        pub client: LoopbackClient,
    }

    #[derive(Default)]
    struct Shared {
        to_client: VecDeque<ServerMessage>,
        to_server: VecDeque<ClientMessage>,
        connected: bool,
    }

    pub struct LoopbackServer(std::sync::Arc<parking_lot::Mutex<Shared>>);
    pub struct LoopbackClient(std::sync::Arc<parking_lot::Mutex<Shared>>);

    pub fn loopback() -> LoopbackPair {
        let shared = std::sync::Arc::new(parking_lot::Mutex::new(Shared {
            connected: true,
            ..Shared::default()
        }));
        LoopbackPair {
            server: LoopbackServer(shared.clone()),
            client: LoopbackClient(shared),
        }
    }

    impl ServerTransport for LoopbackServer {
        fn send(&mut self, message: ServerMessage) -> ClientNodeResult<()> {
            let mut guard = self.0.lock();
            if !guard.connected {
                return Err(crate::error::ClientNodeError::Disconnected);
            }
            guard.to_client.push_back(message);
            Ok(())
        }

        fn try_recv(&mut self) -> ClientNodeResult<Option<ClientMessage>> {
            Ok(self.0.lock().to_server.pop_front())
        }

        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    impl ClientTransport for LoopbackClient {
        fn send(&mut self, message: ClientMessage) -> ClientNodeResult<()> {
            let mut guard = self.0.lock();
            if !guard.connected {
                return Err(crate::error::ClientNodeError::Disconnected);
            }
            guard.to_server.push_back(message);
            Ok(())
        }

        fn try_recv(&mut self) -> ClientNodeResult<Option<ServerMessage>> {
            Ok(self.0.lock().to_client.pop_front())
        }

        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    impl LoopbackPair {
        pub fn disconnect(&self) {
            self.server.0.lock().connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::loopback;
    use super::*;

    #[test]
    fn loopback_round_trips_messages_both_ways() {
        let mut pair = loopback();
        pair.server
            .send(ServerMessage::Event { event_id: 7 })
            .unwrap();
        let received = pair.client.try_recv().unwrap().unwrap();
        assert!(matches!(received, ServerMessage::Event { event_id: 7 }));

        pair.client
            .send(ClientMessage::Event { event_id: 9 })
            .unwrap();
        let received = pair.server.try_recv().unwrap().unwrap();
        assert!(matches!(received, ClientMessage::Event { event_id: 9 }));
    }

    #[test]
    fn send_after_disconnect_errors() {
        let mut pair = loopback();
        pair.disconnect();
        let err = pair.server.send(ServerMessage::Event { event_id: 1 }).unwrap_err();
        assert!(matches!(err, crate::error::ClientNodeError::Disconnected));
    }
}
