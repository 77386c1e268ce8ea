//! Relay transport: one subscriber task per relay, websocket-backed, with exponential
//! backoff (min 250 ms, max `maxRetryMs`, reset on success) and the publish fan-out that
//! requires at least one relay to accept (§4.7).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

const MIN_BACKOFF_MS: u64 = 250;

/// Tracks one relay's backoff state and exposes publish/subscribe primitives.
pub struct Relay {
    pub url: String,
    backoff_ms: AtomicU64,
    max_retry_ms: u64,
}

impl Relay {
    pub fn new(url: impl Into<String>, max_retry_ms: u64) -> Self {
        Relay {
            url: url.into(),
            backoff_ms: AtomicU64::new(MIN_BACKOFF_MS),
            max_retry_ms,
        }
    }

    fn next_backoff(&self) -> Duration {
        let current = self.backoff_ms.load(Ordering::Relaxed);
        let next = (current.saturating_mul(2)).min(self.max_retry_ms);
        self.backoff_ms.store(next, Ordering::Relaxed);
        Duration::from_millis(current)
    }

    fn reset_backoff(&self) {
        self.backoff_ms.store(MIN_BACKOFF_MS, Ordering::Relaxed);
    }

    /// Publishes `bytes` to this relay, returning `true` if the connection accepted the
    /// write. A single short-lived connection per publish keeps this simple; the
    /// subscriber task below holds the long-lived connection used for reads.
    pub async fn publish(&self, bytes: Vec<u8>) -> bool {
        match tokio_tungstenite::connect_async(&self.url).await {
            Ok((mut stream, _)) => {
                let sent = stream.send(WsMessage::Binary(bytes.into())).await.is_ok();
                if sent {
                    self.reset_backoff();
                }
                sent
            }
            Err(e) => {
                tracing::debug!(relay = %self.url, error = %e, "relay publish failed");
                false
            }
        }
    }

    /// Runs the subscriber loop until `cancel` fires: connect, forward every text/binary
    /// frame to `tx`, and on disconnect sleep for the current backoff before retrying.
    pub async fn subscribe_loop(&self, tx: mpsc::Sender<Vec<u8>>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((mut stream, _)) => {
                    self.reset_backoff();
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            next = stream.next() => {
                                match next {
                                    Some(Ok(WsMessage::Binary(bytes))) => {
                                        let _ = tx.send(bytes.to_vec()).await;
                                    }
                                    Some(Ok(WsMessage::Text(text))) => {
                                        let _ = tx.send(text.as_bytes().to_vec()).await;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        tracing::debug!(relay = %self.url, error = %e, "relay read error");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(relay = %self.url, error = %e, "relay connect failed");
                }
            }
            let backoff = self.next_backoff();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

/// Publishes to every eligible relay in parallel; succeeds if at least one accepts.
pub async fn publish_to_all(relays: &[Relay], bytes: Vec<u8>) -> bool {
    let futures = relays.iter().map(|r| r.publish(bytes.clone()));
    let results = futures_util::future::join_all(futures).await;
    results.into_iter().any(|accepted| accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_resets() {
        let relay = Relay::new("ws://example.invalid", 8_000);
        assert_eq!(relay.next_backoff(), Duration::from_millis(250));
        assert_eq!(relay.next_backoff(), Duration::from_millis(500));
        assert_eq!(relay.next_backoff(), Duration::from_millis(1_000));
        relay.reset_backoff();
        assert_eq!(relay.next_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn backoff_caps_at_max_retry_ms() {
        let relay = Relay::new("ws://example.invalid", 1_000);
        for _ in 0..10 {
            relay.next_backoff();
        }
        assert_eq!(relay.next_backoff(), Duration::from_millis(1_000));
    }
}
