//! Connection handshake roles.
//!
//! Two independent state machines drive the handshake, one per side:
//!
//! ```text
//! Inviter: Idle -> InviteIssued -> AwaitingRequest -> RequestValidated -> ResponseSent
//! Invitee: Idle -> InviteParsed -> RequestSent -> AwaitingResponse -> ResponseVerified
//! ```
//!
//! The roles share no mutable state; they communicate only through wire
//! messages. An invalid Request is silently ignored (no response is sent),
//! while an invalid Response is surfaced to the invitee as a handshake
//! failure. That asymmetry is a deliberate anti-probing stance, not an
//! oversight.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Mutex;
use transport::{AgentTransport, STATUS_ACCEPTED};
use wallet::{CryptoProvider, IdentityStore, PairwiseInfo};

use crate::connection::{self, Invite, Request, Response};
use crate::envelope;
use crate::message::Message;
use crate::router::{Module, TypeRouter};
use crate::{ConnectionError, RouteError};

#[derive(Debug, Clone, PartialEq)]
pub enum InviterState {
    Idle,
    InviteIssued,
    AwaitingRequest,
    RequestValidated,
    ResponseSent,
}

impl Display for InviterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            InviterState::Idle => "Idle",
            InviterState::InviteIssued => "InviteIssued",
            InviterState::AwaitingRequest => "AwaitingRequest",
            InviterState::RequestValidated => "RequestValidated",
            InviterState::ResponseSent => "ResponseSent",
        };
        write!(f, "{state}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InviteeState {
    Idle,
    InviteParsed,
    RequestSent,
    AwaitingResponse,
    ResponseVerified,
}

impl Display for InviteeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            InviteeState::Idle => "Idle",
            InviteeState::InviteParsed => "InviteParsed",
            InviteeState::RequestSent => "RequestSent",
            InviteeState::AwaitingResponse => "AwaitingResponse",
            InviteeState::ResponseVerified => "ResponseVerified",
        };
        write!(f, "{state}")
    }
}

fn bad_transition(from: impl Display, to: &str) -> ConnectionError {
    ConnectionError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// The inviting side of the handshake.
pub struct Inviter {
    crypto: Arc<dyn CryptoProvider>,
    identities: Arc<dyn IdentityStore>,
    transport: Arc<dyn AgentTransport>,
    label: String,
    endpoint: String,
    state: InviterState,
    connection_key: Option<String>,
}

impl Inviter {
    pub fn new<W>(
        wallet: Arc<W>,
        transport: Arc<dyn AgentTransport>,
        label: &str,
        endpoint: &str,
    ) -> Self
    where
        W: CryptoProvider + IdentityStore + 'static,
    {
        Self {
            crypto: wallet.clone(),
            identities: wallet,
            transport,
            label: label.to_string(),
            endpoint: endpoint.to_string(),
            state: InviterState::Idle,
            connection_key: None,
        }
    }

    pub fn state(&self) -> InviterState {
        self.state.clone()
    }

    /// Generate the single-use connection key and encode the invite as a
    /// URL-transportable blob for out-of-band delivery.
    pub async fn issue_invite(&mut self) -> Result<String, ConnectionError> {
        if self.state != InviterState::Idle {
            return Err(bad_transition(&self.state, "InviteIssued"));
        }
        let connection_key = self.crypto.create_key().await?;
        let invite = Invite::build(&self.label, &connection_key, &self.endpoint);
        let url = Invite::to_url(&invite)?;
        self.connection_key = Some(connection_key);
        self.state = InviterState::InviteIssued;
        info!("[issue_invite] Invite issued for label {}", self.label);
        Ok(url)
    }

    /// Mark the invite as delivered; requests are accepted from here on.
    pub fn start_listening(&mut self) -> Result<(), ConnectionError> {
        if self.state != InviterState::InviteIssued {
            return Err(bad_transition(&self.state, "AwaitingRequest"));
        }
        self.state = InviterState::AwaitingRequest;
        Ok(())
    }

    /// Validate an inbound request and answer it with a signed response.
    ///
    /// Validation failures leave the state untouched so a later, valid
    /// request can still be accepted; the caller decides to stay silent.
    pub async fn handle_request(&mut self, request: Message) -> Result<(), ConnectionError> {
        if self.state != InviterState::AwaitingRequest {
            return Err(bad_transition(&self.state, "RequestValidated"));
        }
        let connection_key = self
            .connection_key
            .clone()
            .ok_or_else(|| bad_transition(&self.state, "RequestValidated"))?;

        // The invitation key is single-use: the request must have been
        // encrypted to it.
        if let Some(context) = &request.context {
            if context.to_key != connection_key {
                return Err(ConnectionError::FieldMismatch(
                    "recipient verkey".to_string(),
                ));
            }
        }
        Request::validate(&request)?;
        let request_id = request
            .id()
            .ok_or_else(|| ConnectionError::MissingField("@id".to_string()))?
            .to_string();
        let (their_did, their_vk, their_endpoint) = Request::parse(&request)?;
        self.state = InviterState::RequestValidated;
        info!("[handle_request] Request {request_id} validated from {their_did}");

        // A wallet or delivery failure must not wedge the role: fall back
        // to AwaitingRequest so a later valid request can still be served.
        match self
            .answer_request(&request_id, their_did, their_vk, their_endpoint, &connection_key)
            .await
        {
            Ok(()) => {
                self.state = InviterState::ResponseSent;
                info!("[handle_request] Response sent, handshake complete on inviter side");
                Ok(())
            }
            Err(e) => {
                self.state = InviterState::AwaitingRequest;
                Err(e)
            }
        }
    }

    async fn answer_request(
        &mut self,
        request_id: &str,
        their_did: String,
        their_vk: String,
        their_endpoint: String,
        connection_key: &str,
    ) -> Result<(), ConnectionError> {
        let (my_did, my_vk) = self.crypto.create_local_identity().await?;
        let mut response = Response::build(request_id, &my_did, &my_vk, &self.endpoint);
        Response::sign_connection(&mut response, self.crypto.as_ref(), connection_key).await?;

        self.identities
            .store_pairwise(PairwiseInfo {
                my_did,
                their_did,
                their_vk: their_vk.clone(),
                their_endpoint: their_endpoint.clone(),
            })
            .await?;

        let wire = envelope::pack(
            self.crypto.as_ref(),
            &response,
            &[their_vk],
            Some(&my_vk),
        )
        .await?;
        let status = self.transport.send(&their_endpoint, wire).await?;
        if status != STATUS_ACCEPTED {
            return Err(ConnectionError::DeliveryFailed(status));
        }
        Ok(())
    }
}

/// The invited side of the handshake.
pub struct Invitee {
    crypto: Arc<dyn CryptoProvider>,
    identities: Arc<dyn IdentityStore>,
    transport: Arc<dyn AgentTransport>,
    label: String,
    endpoint: String,
    state: InviteeState,
    invite: Option<Message>,
    my_did: Option<String>,
    my_vk: Option<String>,
    request_id: Option<String>,
    established: Option<PairwiseInfo>,
}

impl Invitee {
    pub fn new<W>(
        wallet: Arc<W>,
        transport: Arc<dyn AgentTransport>,
        label: &str,
        endpoint: &str,
    ) -> Self
    where
        W: CryptoProvider + IdentityStore + 'static,
    {
        Self {
            crypto: wallet.clone(),
            identities: wallet,
            transport,
            label: label.to_string(),
            endpoint: endpoint.to_string(),
            state: InviteeState::Idle,
            invite: None,
            my_did: None,
            my_vk: None,
            request_id: None,
            established: None,
        }
    }

    pub fn state(&self) -> InviteeState {
        self.state.clone()
    }

    /// The pairwise relationship produced by a completed handshake.
    pub fn established(&self) -> Option<&PairwiseInfo> {
        self.established.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Decode and validate an out-of-band invite blob.
    pub fn accept_invite(&mut self, invite_url: &str) -> Result<(), ConnectionError> {
        if self.state != InviteeState::Idle {
            return Err(bad_transition(&self.state, "InviteParsed"));
        }
        let invite = Invite::parse(invite_url)?;
        info!(
            "[accept_invite] Parsed invite from {}",
            invite.str_field("label").unwrap_or("<unlabelled>")
        );
        self.invite = Some(invite);
        self.state = InviteeState::InviteParsed;
        Ok(())
    }

    /// Create a fresh local identity and send the connection request,
    /// sender-authenticated with the new key.
    pub async fn send_request(&mut self) -> Result<(), ConnectionError> {
        if self.state != InviteeState::InviteParsed {
            return Err(bad_transition(&self.state, "RequestSent"));
        }
        let invite = self
            .invite
            .clone()
            .ok_or_else(|| bad_transition(&self.state, "RequestSent"))?;
        let recipient_key = Invite::recipient_key(&invite)?;
        let invite_endpoint = invite
            .str_field("serviceEndpoint")
            .ok_or_else(|| ConnectionError::MissingField("serviceEndpoint".to_string()))?
            .to_string();

        let (my_did, my_vk) = self.crypto.create_local_identity().await?;
        let request = Request::build(&self.label, &my_did, &my_vk, &self.endpoint);
        let request_id = request
            .id()
            .ok_or_else(|| ConnectionError::MissingField("@id".to_string()))?
            .to_string();

        let wire = envelope::pack(
            self.crypto.as_ref(),
            &request,
            &[recipient_key],
            Some(&my_vk),
        )
        .await?;
        let status = self.transport.send(&invite_endpoint, wire).await?;
        if status != STATUS_ACCEPTED {
            return Err(ConnectionError::DeliveryFailed(status));
        }

        self.my_did = Some(my_did);
        self.my_vk = Some(my_vk);
        self.request_id = Some(request_id);
        self.state = InviteeState::RequestSent;
        info!("[send_request] Request sent to {invite_endpoint}");
        Ok(())
    }

    /// Start accepting the response.
    pub fn start_listening(&mut self) -> Result<(), ConnectionError> {
        if self.state != InviteeState::RequestSent {
            return Err(bad_transition(&self.state, "AwaitingResponse"));
        }
        self.state = InviteeState::AwaitingResponse;
        Ok(())
    }

    /// Validate shape, verify the signed field, then validate the
    /// reconstructed plaintext. Any failure leaves the state in
    /// `AwaitingResponse`.
    pub async fn handle_response(&mut self, mut response: Message) -> Result<(), ConnectionError> {
        if self.state != InviteeState::AwaitingResponse {
            return Err(bad_transition(&self.state, "ResponseVerified"));
        }
        let request_id = self
            .request_id
            .clone()
            .ok_or_else(|| bad_transition(&self.state, "ResponseVerified"))?;

        // Cheap structural checks run before any cryptography: the shape
        // and the thread id must already be right.
        Response::validate_pre_sig(&response)?;
        let id = response
            .id()
            .ok_or_else(|| ConnectionError::MissingField("@id".to_string()))?;
        if id != request_id {
            return Err(ConnectionError::ThreadIdMismatch {
                expected: request_id,
                got: id.to_string(),
            });
        }

        Response::verify_connection(&mut response, self.crypto.as_ref()).await?;
        Response::validate(&response, &request_id)?;

        let (their_did, their_vk, their_endpoint) = Response::parse(&response)?;
        let my_did = self
            .my_did
            .clone()
            .ok_or_else(|| bad_transition(&self.state, "ResponseVerified"))?;
        let record = PairwiseInfo {
            my_did,
            their_did,
            their_vk,
            their_endpoint,
        };
        self.identities.store_pairwise(record.clone()).await?;
        self.established = Some(record);
        self.state = InviteeState::ResponseVerified;
        info!("[handle_response] Response verified, handshake complete on invitee side");
        Ok(())
    }
}

/// The connections family module: exact-type dispatch onto whichever roles
/// are present.
pub struct ConnectionsModule {
    handlers: TypeRouter,
}

impl ConnectionsModule {
    pub fn new(
        inviter: Option<Arc<Mutex<Inviter>>>,
        invitee: Option<Arc<Mutex<Invitee>>>,
    ) -> Result<Self, RouteError> {
        let mut handlers = TypeRouter::new();

        if let Some(inviter) = inviter {
            handlers.register(
                connection::REQUEST,
                Box::new(move |msg| {
                    let inviter = inviter.clone();
                    Box::pin(async move {
                        let mut role = inviter.lock().await;
                        match role.handle_request(msg).await {
                            Ok(()) => Ok(None),
                            Err(
                                e @ (ConnectionError::MissingField(_)
                                | ConnectionError::FieldMismatch(_)),
                            ) => {
                                // Anti-probing: an invalid request gets no
                                // reply of any kind.
                                warn!("Ignoring invalid connection request: {e}");
                                Ok(None)
                            }
                            Err(e) => Err(RouteError::from(e)),
                        }
                    })
                }),
            )?;
        }

        if let Some(invitee) = invitee {
            handlers.register(
                connection::RESPONSE,
                Box::new(move |msg| {
                    let invitee = invitee.clone();
                    Box::pin(async move {
                        let mut role = invitee.lock().await;
                        role.handle_response(msg).await.map_err(RouteError::from)?;
                        Ok(None)
                    })
                }),
            )?;
        }

        Ok(Self { handlers })
    }
}

#[async_trait]
impl Module for ConnectionsModule {
    async fn route(&self, message: Message) -> Result<Option<Message>, RouteError> {
        self.handlers.route(message).await
    }
}
