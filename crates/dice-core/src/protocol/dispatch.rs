//! The dispatcher seam.
//!
//! Once a connection has read a complete WebSocket frame, the server hands it
//! to a [`Dispatcher`] together with the sender's [`ConnectionId`].  The
//! dispatcher answers with a [`Dispatch`]:
//!
//! - [`Dispatch::Reply`] – zero or more [`Outbound`] frames, written in order.
//!   Frames addressed to the sender are written on the sender's connection
//!   before its next read; frames addressed to other connections are queued to
//!   them.
//! - [`Dispatch::Close`] – close the sender's connection.
//!
//! Frame boundaries come from the WebSocket framing layer.  A [`Payload`] is
//! exactly the frame body; no terminator byte is added or stripped.
//!
//! The game rules (bids, turns, lobbies) are not part of this crate.  Until
//! they exist, [`GreetingDispatcher`] keeps the transport observable by
//! answering every frame with a fixed greeting.

use crate::domain::connection::ConnectionId;

/// Text sent by [`GreetingDispatcher`] when no other greeting is configured.
pub const DEFAULT_GREETING: &str = "hello, world!";

/// Body of a single text or binary WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Length of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Raw bytes of the body, whatever the frame type.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// A complete frame received from `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: ConnectionId,
    pub payload: Payload,
}

/// A frame to be written to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub recipient: ConnectionId,
    pub payload: Payload,
}

impl Outbound {
    pub fn text(recipient: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            recipient,
            payload: Payload::Text(text.into()),
        }
    }

    pub fn binary(recipient: ConnectionId, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            recipient,
            payload: Payload::Binary(bytes.into()),
        }
    }
}

/// What the dispatcher wants done after an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Write these frames, in order.
    Reply(Vec<Outbound>),
    /// Close the sender's connection.
    Close,
}

impl Dispatch {
    /// A reply that writes nothing and keeps the connection open.
    pub fn none() -> Self {
        Self::Reply(Vec::new())
    }
}

/// Policy invoked once per complete inbound frame.
///
/// Implementations run on the reactor and must not block.  They are shared by
/// every connection, hence `Send + Sync`.
#[cfg_attr(test, mockall::automock)]
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, message: InboundMessage) -> Dispatch;
}

/// Default dispatcher: answers every frame with a fixed text greeting sent
/// back to the sender.
#[derive(Debug, Clone)]
pub struct GreetingDispatcher {
    greeting: String,
}

impl GreetingDispatcher {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }
}

impl Default for GreetingDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING)
    }
}

impl Dispatcher for GreetingDispatcher {
    fn dispatch(&self, message: InboundMessage) -> Dispatch {
        tracing::debug!(
            sender = %message.sender,
            bytes = message.payload.len(),
            text = message.payload.is_text(),
            "greeting sender"
        );
        Dispatch::Reply(vec![Outbound::text(message.sender, self.greeting.clone())])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::Registry;

    fn some_id() -> ConnectionId {
        Registry::new().insert(()).unwrap()
    }

    #[test]
    fn test_greeting_dispatcher_replies_to_sender_with_default_text() {
        // Arrange
        let dispatcher = GreetingDispatcher::default();
        let sender = some_id();

        // Act
        let result = dispatcher.dispatch(InboundMessage {
            sender,
            payload: Payload::Text("ping".to_string()),
        });

        // Assert
        assert_eq!(
            result,
            Dispatch::Reply(vec![Outbound::text(sender, "hello, world!")])
        );
    }

    #[test]
    fn test_greeting_dispatcher_answers_binary_frames_with_text() {
        let dispatcher = GreetingDispatcher::new("welcome");
        let sender = some_id();

        let result = dispatcher.dispatch(InboundMessage {
            sender,
            payload: Payload::Binary(vec![0x00, 0xff, 0x00]),
        });

        assert_eq!(result, Dispatch::Reply(vec![Outbound::text(sender, "welcome")]));
    }

    #[test]
    fn test_payload_preserves_trailing_bytes() {
        // A frame body is never treated as NUL-terminated: the last byte is data.
        let payload = Payload::Binary(vec![1, 2, 3, 0]);
        assert_eq!(payload.len(), 4);
        assert_eq!(payload.as_bytes().last(), Some(&0));

        let text = Payload::Text("ping".to_string());
        assert_eq!(text.as_bytes(), b"ping");
        assert!(text.is_text());
    }

    #[test]
    fn test_empty_payload() {
        assert!(Payload::Binary(Vec::new()).is_empty());
        assert!(!Payload::Text("x".into()).is_empty());
    }

    #[test]
    fn test_dispatch_none_is_empty_reply() {
        assert_eq!(Dispatch::none(), Dispatch::Reply(Vec::new()));
    }

    #[test]
    fn test_mock_dispatcher_can_request_close() {
        // Arrange: a game layer that rejects every frame.
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch().times(1).returning(|_| Dispatch::Close);

        // Act
        let result = mock.dispatch(InboundMessage {
            sender: some_id(),
            payload: Payload::Text("bid 3 fives".into()),
        });

        // Assert
        assert_eq!(result, Dispatch::Close);
    }
}
