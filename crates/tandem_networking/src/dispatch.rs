//! # Function Dispatch
//!
//! Maps a message type tag to the handler that owns it.
//!
//! Handlers receive the owner's state, a [`MessageSink`] for replies, the
//! sender's address and the validated message. A missing handler or a
//! failing one is logged and the caller moves on to the next message.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::warn;

use crate::error::DispatchError;
use crate::protocol::NetworkMessage;
use crate::transport::MessageSink;

/// Handler bound to one message type.
pub type NetworkFunction<S> =
    Arc<dyn Fn(&mut S, &dyn MessageSink, SocketAddr, &NetworkMessage) -> Result<(), DispatchError> + Send + Sync>;

/// Message type to handler table.
pub struct FunctionRegistry<S> {
    functions: HashMap<u32, NetworkFunction<S>>,
}

impl<S> FunctionRegistry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Binds `handler` to `message_type`.
    ///
    /// Returns false and keeps the existing binding if the type is taken.
    pub fn register<F>(&mut self, message_type: impl Into<u32>, handler: F) -> bool
    where
        F: Fn(&mut S, &dyn MessageSink, SocketAddr, &NetworkMessage) -> Result<(), DispatchError>
            + Send
            + Sync
            + 'static,
    {
        let message_type = message_type.into();
        if self.functions.contains_key(&message_type) {
            return false;
        }
        self.functions.insert(message_type, Arc::new(handler));
        true
    }

    /// Returns true if a handler is bound to `message_type`.
    #[must_use]
    pub fn contains(&self, message_type: u32) -> bool {
        self.functions.contains_key(&message_type)
    }

    /// Number of bound types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Runs the handler for `message`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownType`] if nothing is bound, or whatever the
    /// handler returned. Both are logged here.
    pub fn dispatch(
        &self,
        state: &mut S,
        sink: &dyn MessageSink,
        sender: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        let message_type = message.message_type();
        let Some(handler) = self.functions.get(&message_type) else {
            warn!(message_type, %sender, "no handler for message type");
            return Err(DispatchError::UnknownType(message_type));
        };
        handler(state, sink, sender, message).map_err(|error| {
            warn!(message_type, %sender, %error, "message handler failed");
            error
        })
    }
}

impl<S> Clone for FunctionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            functions: self.functions.clone(),
        }
    }
}

impl<S> Default for FunctionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingSink;
    use tandem_shared::{MessageType, USER_MESSAGE_TYPE_START};

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[test]
    fn test_register_twice_keeps_first() {
        let mut registry = FunctionRegistry::<Vec<&'static str>>::new();
        assert!(registry.register(MessageType::GameStart, |log, _, _, _| {
            log.push("first");
            Ok(())
        }));
        assert!(!registry.register(MessageType::GameStart, |log, _, _, _| {
            log.push("second");
            Ok(())
        }));
        assert_eq!(registry.len(), 1);

        let mut log = Vec::new();
        let sink = RecordingSink::default();
        registry
            .dispatch(&mut log, &sink, peer(), &NetworkMessage::new(MessageType::GameStart))
            .unwrap();
        assert_eq!(log, vec!["first"]);
    }

    #[test]
    fn test_unknown_type_has_no_side_effects() {
        let registry = FunctionRegistry::<u32>::new();
        let mut calls = 0;
        let sink = RecordingSink::default();
        let result = registry.dispatch(
            &mut calls,
            &sink,
            peer(),
            &NetworkMessage::new(USER_MESSAGE_TYPE_START + 5),
        );
        assert_eq!(result, Err(DispatchError::UnknownType(USER_MESSAGE_TYPE_START + 5)));
        assert_eq!(calls, 0);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_failing_handler_is_reported() {
        let mut registry = FunctionRegistry::<()>::new();
        registry.register(MessageType::GameSync, |_, _, _, message| {
            Err(DispatchError::HandlerFailed {
                message_type: message.message_type(),
                reason: "scene missing".into(),
            })
        });
        let sink = RecordingSink::default();
        let result = registry.dispatch(&mut (), &sink, peer(), &NetworkMessage::new(MessageType::GameSync));
        assert!(matches!(result, Err(DispatchError::HandlerFailed { .. })));
    }

    #[test]
    fn test_handler_can_reply() {
        let mut registry = FunctionRegistry::<()>::new();
        registry.register(MessageType::RequestConnect, |_, sink, sender, _| {
            sink.send_to(sender, &NetworkMessage::new(MessageType::Connected))
                .map_err(|e| DispatchError::HandlerFailed {
                    message_type: MessageType::RequestConnect.as_u32(),
                    reason: e.to_string(),
                })
        });
        let sink = RecordingSink::default();
        registry
            .dispatch(&mut (), &sink, peer(), &NetworkMessage::new(MessageType::RequestConnect))
            .unwrap();
        assert_eq!(sink.sent_types(), vec![(peer(), MessageType::Connected)]);
    }
}
