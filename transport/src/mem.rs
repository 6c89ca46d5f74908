//! In-process loopback network used by tests and the conformance harness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{AgentTransport, TransportError, STATUS_ACCEPTED};

/// Routes wire bytes between endpoints registered in the same process.
///
/// Sending to an unregistered endpoint reports 404 and sending to a closed
/// queue reports 503, mirroring what an HTTP peer would observe.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<Mutex<HashMap<String, UnboundedSender<Vec<u8>>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an existing inbound queue to `endpoint`.
    pub fn register(&self, endpoint: &str, queue: UnboundedSender<Vec<u8>>) {
        let mut endpoints = self.endpoints.lock().expect("endpoint registry poisoned");
        endpoints.insert(endpoint.to_string(), queue);
    }

    /// Bind `endpoint` to a fresh queue and return its receiving end.
    pub fn bind(&self, endpoint: &str) -> UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(endpoint, tx);
        rx
    }
}

#[async_trait]
impl AgentTransport for LoopbackNetwork {
    async fn send(&self, endpoint: &str, wire: Vec<u8>) -> Result<u16, TransportError> {
        let queue = {
            let endpoints = self.endpoints.lock().expect("endpoint registry poisoned");
            endpoints.get(endpoint).cloned()
        };
        match queue {
            Some(queue) => {
                if queue.send(wire).is_err() {
                    debug!("Endpoint {endpoint} has shut down its queue");
                    return Ok(503);
                }
                Ok(STATUS_ACCEPTED)
            }
            None => {
                debug!("No endpoint registered for {endpoint}");
                Ok(404)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_delivery() {
        let network = LoopbackNetwork::new();
        let mut rx = network.bind("http://peer/indy");

        let status = network
            .send("http://peer/indy", b"wire bytes".to_vec())
            .await
            .expect("Failed to send");
        assert_eq!(status, STATUS_ACCEPTED);
        assert_eq!(rx.recv().await, Some(b"wire bytes".to_vec()));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_reports_404() {
        let network = LoopbackNetwork::new();
        let status = network
            .send("http://nowhere/indy", b"lost".to_vec())
            .await
            .expect("Failed to send");
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_closed_endpoint_reports_503() {
        let network = LoopbackNetwork::new();
        let rx = network.bind("http://gone/indy");
        drop(rx);
        let status = network
            .send("http://gone/indy", b"late".to_vec())
            .await
            .expect("Failed to send");
        assert_eq!(status, 503);
    }
}
