//! The agent: wallet lifecycle, the inbound processing loop, and outbound
//! delivery.
//!
//! Inbound wire bytes arrive on an unbounded queue (fed by a transport
//! listener or a test harness), are unpacked, then dispatched through the
//! family router. Each message is its own error boundary: a failure is
//! logged and the loop moves on, so one malformed or hostile message can
//! never take the agent down.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use transport::{AgentTransport, STATUS_ACCEPTED};
use wallet::{CryptoProvider, IdentityStore, Wallet, WalletDirectory, WalletError};

use crate::envelope;
use crate::message::Message;
use crate::router::{FamilyRouter, Module};
use crate::AgentError;

pub struct Agent {
    directory: WalletDirectory,
    wallet: Option<Arc<Wallet>>,
    transport: Arc<dyn AgentTransport>,
    router: FamilyRouter,
    inbound_tx: UnboundedSender<Vec<u8>>,
    inbound_rx: UnboundedReceiver<Vec<u8>>,
    admin_tx: UnboundedSender<Vec<u8>>,
    admin_rx: Option<UnboundedReceiver<Vec<u8>>>,
    endpoint: String,
    endpoint_vk: Option<String>,
    admin_key: Option<String>,
    agent_admin_key: Option<String>,
}

impl Agent {
    pub fn new(
        hostname: &str,
        port: u16,
        directory: WalletDirectory,
        transport: Arc<dyn AgentTransport>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (admin_tx, admin_rx) = mpsc::unbounded_channel();
        Self {
            directory,
            wallet: None,
            transport,
            router: FamilyRouter::new(),
            inbound_tx,
            inbound_rx,
            admin_tx,
            admin_rx: Some(admin_rx),
            endpoint: format!("http://{hostname}:{port}/indy"),
            endpoint_vk: None,
            admin_key: None,
            agent_admin_key: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The verkey other agents encrypt to when addressing this endpoint.
    pub fn endpoint_vk(&self) -> Option<&str> {
        self.endpoint_vk.as_deref()
    }

    /// Feed inbound wire bytes into the agent from a transport listener.
    pub fn inbound_sender(&self) -> UnboundedSender<Vec<u8>> {
        self.inbound_tx.clone()
    }

    /// Administrative traffic the agent emits (for a UI or a test harness),
    /// already in wire form.
    pub fn take_admin_receiver(&mut self) -> Option<UnboundedReceiver<Vec<u8>>> {
        self.admin_rx.take()
    }

    pub fn wallet(&self) -> Result<Arc<Wallet>, AgentError> {
        self.wallet.clone().ok_or(AgentError::WalletNotConnected)
    }

    /// Open (creating if needed) the named wallet and provision the
    /// endpoint identity. With `ephemeral` set, any wallet of the same name
    /// is deleted first so every run starts clean.
    pub async fn connect_wallet(
        &mut self,
        name: &str,
        passphrase: &str,
        ephemeral: bool,
    ) -> Result<(), AgentError> {
        if ephemeral {
            match self.directory.delete(name).await {
                Ok(()) | Err(WalletError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        match self.directory.create(name, passphrase).await {
            Ok(()) => info!("Created wallet {name}"),
            Err(WalletError::AlreadyExists(_)) => info!("Reusing existing wallet {name}"),
            Err(e) => return Err(e.into()),
        }
        let wallet = Arc::new(self.directory.open(name, passphrase).await?);
        let (_, endpoint_vk) = wallet.create_local_identity().await?;
        self.endpoint_vk = Some(endpoint_vk);
        self.wallet = Some(wallet);
        info!("Connected wallet {name}");
        Ok(())
    }

    pub fn disconnect_wallet(&mut self) {
        self.wallet = None;
        self.endpoint_vk = None;
        // The agent admin key lives in the wallet that just went away.
        self.agent_admin_key = None;
    }

    /// Trust `admin_key` for administrative traffic and provision the
    /// agent-side key the admin client should encrypt to in return.
    /// Outbound admin messages are authcrypted from the agent admin key to
    /// `admin_key` from here on, so the client can authenticate the agent.
    pub async fn setup_admin(&mut self, admin_key: &str) -> Result<String, AgentError> {
        let wallet = self.wallet()?;
        let agent_admin_key = wallet.create_key().await?;
        self.admin_key = Some(admin_key.to_string());
        self.agent_admin_key = Some(agent_admin_key.clone());
        info!("Administrative channel configured");
        Ok(agent_admin_key)
    }

    pub fn register_module(
        &mut self,
        family: &str,
        module: Arc<dyn Module>,
    ) -> Result<(), AgentError> {
        self.router.register(family, module)?;
        Ok(())
    }

    /// Process inbound messages until the queue closes.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        info!("Agent listening on {}", self.endpoint);
        loop {
            self.handle_incoming().await?;
        }
    }

    /// Process exactly one inbound message. Per-message failures are logged
    /// and swallowed; only a closed queue ends processing.
    pub async fn handle_incoming(&mut self) -> Result<(), AgentError> {
        let wire = self.inbound_rx.recv().await.ok_or(AgentError::QueueClosed)?;
        let wallet = self.wallet()?;

        let msg = match envelope::unpack(wallet.as_ref(), wallet.as_ref(), &wire).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping undecodable inbound message: {e}");
                return Ok(());
            }
        };
        let msg_type = msg.msg_type().to_string();
        match self.router.route(msg).await {
            Ok(Some(reply)) => {
                // Modules that return a message hand it to the admin side.
                if let Err(e) = self.send_admin_message(&reply).await {
                    error!("Failed to forward admin reply: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to handle message of type {msg_type}: {e}"),
        }
        Ok(())
    }

    /// Send a message to an agent known through a pairwise relationship.
    pub async fn send_message_to_agent(
        &self,
        their_did: &str,
        msg: &Message,
    ) -> Result<(), AgentError> {
        let wallet = self.wallet()?;
        let pairwise = wallet.pairwise_info(their_did).await?;
        let my_vk = wallet.key_for_local_did(&pairwise.my_did).await?;
        self.send_message_to_endpoint_and_key(
            &pairwise.their_vk,
            &pairwise.their_endpoint,
            msg,
            Some(&my_vk),
        )
        .await
    }

    /// Pack and deliver a message to an explicit endpoint and key. A
    /// non-accepted status is logged, not fatal: delivery is best-effort
    /// at this layer.
    pub async fn send_message_to_endpoint_and_key(
        &self,
        their_vk: &str,
        endpoint: &str,
        msg: &Message,
        my_vk: Option<&str>,
    ) -> Result<(), AgentError> {
        let wallet = self.wallet()?;
        let wire = envelope::pack(wallet.as_ref(), msg, &[their_vk.to_string()], my_vk).await?;
        let status = self.transport.send(endpoint, wire).await?;
        if status != STATUS_ACCEPTED {
            warn!("Delivery to {endpoint} returned status {status}");
        }
        Ok(())
    }

    /// Emit a message on the administrative channel, authcrypted from the
    /// agent admin key when one is configured and in clear otherwise.
    pub async fn send_admin_message(&self, msg: &Message) -> Result<(), AgentError> {
        let wire = match (&self.admin_key, &self.agent_admin_key, &self.wallet) {
            (Some(admin_key), Some(agent_admin_key), Some(wallet)) => {
                envelope::pack(
                    wallet.as_ref(),
                    msg,
                    &[admin_key.clone()],
                    Some(agent_admin_key),
                )
                .await?
            }
            _ => msg.serialize()?.into_bytes(),
        };
        // A dropped admin consumer just means nobody is watching.
        let _ = self.admin_tx.send(wire);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basicmessage::{BasicMessage, BasicMessageModule};
    use serde_json::json;
    use tokio::sync::mpsc;
    use transport::LoopbackNetwork;

    async fn connected_agent(name: &str) -> Agent {
        let mut agent = Agent::new(
            name,
            3000,
            WalletDirectory::new(),
            Arc::new(LoopbackNetwork::new()),
        );
        agent
            .connect_wallet(name, "pw", true)
            .await
            .expect("Failed to connect wallet");
        agent
    }

    #[tokio::test]
    async fn test_connect_wallet_is_idempotent_when_not_ephemeral() {
        let directory = WalletDirectory::new();
        let mut agent = Agent::new(
            "localhost",
            3000,
            directory,
            Arc::new(LoopbackNetwork::new()),
        );
        agent.connect_wallet("w", "pw", false).await.unwrap();
        let first_vk = agent.endpoint_vk().map(str::to_string);
        agent.disconnect_wallet();
        // Reconnecting to the same wallet works; a fresh endpoint identity
        // is provisioned each time.
        agent.connect_wallet("w", "pw", false).await.unwrap();
        assert!(agent.endpoint_vk().is_some());
        assert_ne!(agent.endpoint_vk().map(str::to_string), first_vk);
    }

    #[tokio::test]
    async fn test_ephemeral_wallet_starts_clean() {
        let directory = WalletDirectory::new();
        let mut agent = Agent::new(
            "localhost",
            3000,
            directory.clone(),
            Arc::new(LoopbackNetwork::new()),
        );
        agent.connect_wallet("e", "pw", true).await.unwrap();
        agent.disconnect_wallet();
        // The old passphrase no longer matters after an ephemeral reset.
        agent.connect_wallet("e", "other-pw", true).await.unwrap();
        assert!(agent.endpoint_vk().is_some());
    }

    #[tokio::test]
    async fn test_loop_survives_garbage_and_still_processes() {
        let mut agent = connected_agent("resilient").await;
        let (content_tx, mut content_rx) = mpsc::unbounded_channel();
        agent
            .register_module(
                crate::basicmessage::FAMILY,
                Arc::new(BasicMessageModule::new(content_tx).unwrap()),
            )
            .unwrap();

        let inbound = agent.inbound_sender();
        inbound.send(b"\x00\xffgarbage".to_vec()).unwrap();
        inbound
            .send(BasicMessage::build("still alive").serialize().unwrap().into_bytes())
            .unwrap();

        // Garbage is dropped without an error.
        agent.handle_incoming().await.expect("Loop died on garbage");
        agent.handle_incoming().await.expect("Loop died on message");
        assert_eq!(content_rx.recv().await, Some("still alive".to_string()));
    }

    #[tokio::test]
    async fn test_unroutable_message_is_logged_not_fatal() {
        let mut agent = connected_agent("unroutable").await;
        let msg = Message::try_from(json!({"@type": "did:sov:x;spec/unknown/1.0/msg"})).unwrap();
        agent
            .inbound_sender()
            .send(msg.serialize().unwrap().into_bytes())
            .unwrap();
        agent.handle_incoming().await.expect("Loop died");
    }

    #[tokio::test]
    async fn test_closed_queue_ends_processing() {
        let directory = WalletDirectory::new();
        let mut agent = Agent::new(
            "localhost",
            3000,
            directory,
            Arc::new(LoopbackNetwork::new()),
        );
        agent.connect_wallet("q", "pw", true).await.unwrap();
        // Swap in a queue whose senders are all gone; recv yields None.
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        drop(tx);
        agent.inbound_rx = rx;
        let result = agent.handle_incoming().await;
        assert!(matches!(result, Err(AgentError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_send_message_to_agent_uses_pairwise_route() {
        let directory = WalletDirectory::new();
        let network = Arc::new(LoopbackNetwork::new());
        let mut peer_rx = network.bind("http://peer:3000/indy");

        let mut agent = Agent::new("localhost", 3000, directory, network.clone());
        agent.connect_wallet("sender", "pw", true).await.unwrap();
        let wallet = agent.wallet().unwrap();
        let (my_did, _) = wallet.create_local_identity().await.unwrap();
        let their_vk = wallet.create_key().await.unwrap();
        wallet
            .store_pairwise(wallet::PairwiseInfo {
                my_did,
                their_did: "did:sov:peer".to_string(),
                their_vk,
                their_endpoint: "http://peer:3000/indy".to_string(),
            })
            .await
            .unwrap();

        agent
            .send_message_to_agent("did:sov:peer", &BasicMessage::build("hi"))
            .await
            .expect("Failed to send");
        let wire = peer_rx.recv().await.expect("No wire delivered");
        // The payload is an encrypted envelope, not plaintext.
        assert!(Message::deserialize(std::str::from_utf8(&wire).unwrap_or("")).is_err());
    }

    #[tokio::test]
    async fn test_admin_messages_reach_admin_receiver() {
        let mut agent = connected_agent("admin").await;
        let mut admin_rx = agent.take_admin_receiver().expect("Receiver already taken");
        agent
            .send_admin_message(&BasicMessage::build("status"))
            .await
            .unwrap();
        let wire = admin_rx.recv().await.expect("No admin message");
        // No admin key configured: delivered in clear.
        let msg = Message::deserialize(std::str::from_utf8(&wire).unwrap()).unwrap();
        assert_eq!(msg.str_field("content"), Some("status"));
    }

    #[tokio::test]
    async fn test_admin_messages_are_encrypted_when_key_is_set() {
        let mut agent = connected_agent("admin-enc").await;
        let admin_key = agent.wallet().unwrap().create_key().await.unwrap();
        let agent_admin_key = agent.setup_admin(&admin_key).await.unwrap();
        assert!(!agent_admin_key.is_empty());
        let mut admin_rx = agent.take_admin_receiver().unwrap();

        agent
            .send_admin_message(&BasicMessage::build("secret"))
            .await
            .unwrap();
        let wire = admin_rx.recv().await.unwrap();
        let as_text = std::str::from_utf8(&wire).unwrap_or("");
        assert!(Message::deserialize(as_text).is_err());

        // The holder of the admin key can read it, and the envelope is
        // authcrypted from the agent admin key.
        let wallet = agent.wallet().unwrap();
        let msg = envelope::unpack(wallet.as_ref(), wallet.as_ref(), &wire)
            .await
            .expect("Failed to unpack admin message");
        assert_eq!(msg.str_field("content"), Some("secret"));
        let context = msg.context.expect("context must be present after unpack");
        assert_eq!(context.from_key, Some(agent_admin_key));
    }
}
