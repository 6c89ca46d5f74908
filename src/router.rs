//! Two-level message dispatch.
//!
//! The top level maps a protocol family identifier (the `@type` prefix up
//! to and including the version) to a registered module; the module level
//! maps exact `@type` values to handler functions. Registration of a
//! duplicate key is an error at either level, and routing a message with no
//! match yields [`RouteError::UnroutableMessage`] with no side effects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::debug;

use crate::message::Message;
use crate::RouteError;

/// A protocol family module: one capability, routing a message to an
/// optional response.
#[async_trait]
pub trait Module: Send + Sync {
    async fn route(&self, message: Message) -> Result<Option<Message>, RouteError>;
}

/// Top-level dispatch by family identifier prefix.
#[derive(Default)]
pub struct FamilyRouter {
    routes: HashMap<String, Arc<dyn Module>>,
}

impl FamilyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module for a family identifier. At most one module per
    /// family.
    pub fn register(&mut self, family: &str, module: Arc<dyn Module>) -> Result<(), RouteError> {
        if self.routes.contains_key(family) {
            return Err(RouteError::DuplicateFamily(family.to_string()));
        }
        self.routes.insert(family.to_string(), module);
        Ok(())
    }

    /// Dispatch by the longest registered prefix of the message `@type`.
    pub async fn route(&self, message: Message) -> Result<Option<Message>, RouteError> {
        let msg_type = message.msg_type().to_string();
        let module = self
            .routes
            .iter()
            .filter(|(family, _)| msg_type.starts_with(family.as_str()))
            .max_by_key(|(family, _)| family.len())
            .map(|(_, module)| module.clone());

        match module {
            Some(module) => {
                debug!("Routing message of type {msg_type}");
                module.route(message).await
            }
            None => Err(RouteError::UnroutableMessage(msg_type)),
        }
    }
}

type HandlerFn =
    Box<dyn Fn(Message) -> BoxFuture<'static, Result<Option<Message>, RouteError>> + Send + Sync>;

/// Module-level dispatch by exact `@type`.
#[derive(Default)]
pub struct TypeRouter {
    handlers: HashMap<String, HandlerFn>,
}

impl TypeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact message type. At most one handler
    /// per type.
    pub fn register(&mut self, msg_type: &str, handler: HandlerFn) -> Result<(), RouteError> {
        if self.handlers.contains_key(msg_type) {
            return Err(RouteError::DuplicateHandler(msg_type.to_string()));
        }
        self.handlers.insert(msg_type.to_string(), handler);
        Ok(())
    }

    pub async fn route(&self, message: Message) -> Result<Option<Message>, RouteError> {
        match self.handlers.get(message.msg_type()) {
            Some(handler) => handler(message).await,
            None => Err(RouteError::UnroutableMessage(
                message.msg_type().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Module for CountingModule {
        async fn route(&self, _message: Message) -> Result<Option<Message>, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn message_of(msg_type: &str) -> Message {
        Message::try_from(json!({"@type": msg_type})).expect("Failed to build message")
    }

    #[tokio::test]
    async fn test_family_dispatch_invokes_handler_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = FamilyRouter::new();
        router
            .register(
                "did:sov:x;spec/basicmessage/1.0/",
                Arc::new(CountingModule {
                    calls: calls.clone(),
                }),
            )
            .expect("Failed to register");

        router
            .route(message_of("did:sov:x;spec/basicmessage/1.0/message"))
            .await
            .expect("Failed to route");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let v1_calls = Arc::new(AtomicUsize::new(0));
        let v11_calls = Arc::new(AtomicUsize::new(0));
        let mut router = FamilyRouter::new();
        router
            .register(
                "did:sov:x;spec/trust/1.",
                Arc::new(CountingModule {
                    calls: v1_calls.clone(),
                }),
            )
            .unwrap();
        router
            .register(
                "did:sov:x;spec/trust/1.1/",
                Arc::new(CountingModule {
                    calls: v11_calls.clone(),
                }),
            )
            .unwrap();

        router
            .route(message_of("did:sov:x;spec/trust/1.1/ping"))
            .await
            .unwrap();
        assert_eq!(v1_calls.load(Ordering::SeqCst), 0);
        assert_eq!(v11_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unroutable_family() {
        let router = FamilyRouter::new();
        let result = router.route(message_of("did:sov:x;spec/unknown/1.0/msg")).await;
        assert!(matches!(result, Err(RouteError::UnroutableMessage(_))));
    }

    #[tokio::test]
    async fn test_duplicate_family_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = FamilyRouter::new();
        let family = "did:sov:x;spec/basicmessage/1.0/";
        router
            .register(family, Arc::new(CountingModule { calls: calls.clone() }))
            .unwrap();
        let result = router.register(family, Arc::new(CountingModule { calls }));
        assert!(matches!(result, Err(RouteError::DuplicateFamily(_))));
    }

    #[tokio::test]
    async fn test_type_router_exact_match_and_duplicates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = TypeRouter::new();
        let msg_type = "did:sov:x;spec/basicmessage/1.0/message";

        let counter = calls.clone();
        router
            .register(
                msg_type,
                Box::new(move |_msg| {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    })
                }),
            )
            .expect("Failed to register handler");

        let result = router.register(msg_type, Box::new(|_msg| Box::pin(async { Ok(None) })));
        assert!(matches!(result, Err(RouteError::DuplicateHandler(_))));

        router.route(message_of(msg_type)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same family, different exact type: unroutable within the module.
        let result = router
            .route(message_of("did:sov:x;spec/basicmessage/1.0/other"))
            .await;
        assert!(matches!(result, Err(RouteError::UnroutableMessage(_))));
    }
}
