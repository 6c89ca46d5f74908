//! Conformance harness primitives.
//!
//! Protocol tests need to assert two things about an agent under test: that
//! a message arrives within a deadline, and that nothing arrives within a
//! deadline. Both run against the same inbound wire-byte queue a transport
//! listener would feed.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use crate::HarnessError;

/// Wait up to `deadline` for the next wire message.
pub async fn expect_message(
    inbound: &mut UnboundedReceiver<Vec<u8>>,
    deadline: Duration,
) -> Result<Vec<u8>, HarnessError> {
    match timeout(deadline, inbound.recv()).await {
        Ok(Some(wire)) => Ok(wire),
        Ok(None) => Err(HarnessError::ChannelClosed),
        Err(_) => Err(HarnessError::Timeout(deadline)),
    }
}

/// Assert that nothing arrives for the full `deadline`. An early-closing
/// channel counts as silence: nothing more can arrive.
pub async fn expect_silence(
    inbound: &mut UnboundedReceiver<Vec<u8>>,
    deadline: Duration,
) -> Result<(), HarnessError> {
    match timeout(deadline, inbound.recv()).await {
        Ok(Some(_)) => Err(HarnessError::UnexpectedMessage),
        Ok(None) => Ok(()),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_expect_message_returns_delivered_bytes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(b"hello".to_vec()).unwrap();
        let wire = expect_message(&mut rx, Duration::from_millis(100))
            .await
            .expect("Failed to receive");
        assert_eq!(wire, b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_message_times_out() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let deadline = Duration::from_secs(5);
        let started = Instant::now();
        let result = expect_message(&mut rx, deadline).await;
        assert!(matches!(result, Err(HarnessError::Timeout(d)) if d == deadline));
        // Under paused time the clock advances exactly to the deadline.
        let elapsed = started.elapsed();
        assert!(elapsed >= deadline);
        assert!(elapsed <= deadline + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_expect_message_on_closed_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        drop(tx);
        let result = expect_message(&mut rx, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(HarnessError::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_silence_holds_for_full_deadline() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let deadline = Duration::from_secs(5);
        let started = Instant::now();
        expect_silence(&mut rx, deadline)
            .await
            .expect("Silence expected");
        let elapsed = started.elapsed();
        assert!(elapsed >= deadline);
        assert!(elapsed <= deadline + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_expect_silence_fails_on_traffic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(b"noise".to_vec()).unwrap();
        let result = expect_silence(&mut rx, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(HarnessError::UnexpectedMessage)));
    }
}
