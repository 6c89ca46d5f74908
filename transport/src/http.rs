//! HTTP push transport.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;
use log::{error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::{AgentTransport, TransportError, AGENT_WIRE_CONTENT_TYPE};

/// Outbound delivery over HTTP POST with the agent wire media type.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn send(&self, endpoint: &str, wire: Vec<u8>) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(header::CONTENT_TYPE, AGENT_WIRE_CONTENT_TYPE)
            .body(wire)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

async fn deliver(State(queue): State<UnboundedSender<Vec<u8>>>, body: Bytes) -> StatusCode {
    if queue.send(body.to_vec()).is_err() {
        warn!("Inbound queue closed, rejecting wire message");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

/// Serve the inbound side: `POST /indy` enqueues raw wire bytes and
/// answers 202. Runs until the process exits.
pub fn serve_inbound(addr: SocketAddr, queue: UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
    let app = Router::new()
        .route("/indy", post(deliver))
        .with_state(queue);
    info!("Listening for agent wire messages on {addr}");
    tokio::spawn(async move {
        if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
            error!("Inbound listener failed: {e}");
        }
    })
}
