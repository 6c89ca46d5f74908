//! The basicmessage family: free-form text between connected agents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::message::Message;
use crate::router::{Module, TypeRouter};
use crate::{ConnectionError, RouteError};

pub const FAMILY: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/basicmessage/1.0/";
pub const MESSAGE: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/basicmessage/1.0/message";

pub struct BasicMessage;

impl BasicMessage {
    pub fn build(content: &str) -> Message {
        Message::try_from(json!({
            "@type": MESSAGE,
            "@id": Uuid::new_v4().to_string(),
            "~l10n": {"locale": "en"},
            "sent_time": Utc::now().to_rfc3339(),
            "content": content,
        }))
        .expect("basicmessage shape always has @type")
    }

    pub fn validate(msg: &Message) -> Result<(), ConnectionError> {
        if msg.msg_type() != MESSAGE {
            return Err(ConnectionError::FieldMismatch("@type".to_string()));
        }
        msg.str_field("content")
            .map(|_| ())
            .ok_or_else(|| ConnectionError::MissingField("content".to_string()))
    }
}

/// Forwards the content of each inbound basicmessage to a consumer channel.
pub struct BasicMessageModule {
    handlers: TypeRouter,
}

impl BasicMessageModule {
    pub fn new(received: UnboundedSender<String>) -> Result<Self, RouteError> {
        let mut handlers = TypeRouter::new();
        let received = Arc::new(received);
        handlers.register(
            MESSAGE,
            Box::new(move |msg| {
                let received = received.clone();
                Box::pin(async move {
                    BasicMessage::validate(&msg).map_err(RouteError::from)?;
                    let content = msg
                        .str_field("content")
                        .unwrap_or_default()
                        .to_string();
                    info!("[basicmessage] {content}");
                    // A dropped consumer just means nobody is reading.
                    let _ = received.send(content);
                    Ok(None)
                })
            }),
        )?;
        Ok(Self { handlers })
    }
}

#[async_trait]
impl Module for BasicMessageModule {
    async fn route(&self, message: Message) -> Result<Option<Message>, RouteError> {
        self.handlers.route(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::family_id;
    use tokio::sync::mpsc;

    #[test]
    fn test_type_constants_follow_family_shape() {
        assert_eq!(FAMILY, family_id("basicmessage", "1.0"));
        assert_eq!(MESSAGE, format!("{FAMILY}message"));
    }

    #[test]
    fn test_build_and_validate() {
        let msg = BasicMessage::build("hello there");
        BasicMessage::validate(&msg).expect("Valid basicmessage rejected");
        assert_eq!(msg.str_field("content"), Some("hello there"));
        assert!(msg.get("~l10n").is_some());
        assert!(msg.str_field("sent_time").is_some());
    }

    #[tokio::test]
    async fn test_module_forwards_content() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let module = BasicMessageModule::new(tx).expect("Failed to build module");

        module
            .route(BasicMessage::build("ping"))
            .await
            .expect("Failed to route");
        assert_eq!(rx.recv().await, Some("ping".to_string()));
    }

    #[tokio::test]
    async fn test_module_rejects_missing_content() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let module = BasicMessageModule::new(tx).unwrap();

        let msg = Message::try_from(serde_json::json!({"@type": MESSAGE})).unwrap();
        let result = module.route(msg).await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }
}
