use std::sync::Arc;

use async_trait::async_trait;
use prost::Message;
use tokio::sync::{mpsc, Mutex};

use crate::core::transport::{decode_message, TransportLayer};
use crate::error::{Error, Result};
use crate::pb::ClusterMessage;

/// In-memory transport recording every datagram sent through it.
#[derive(Clone, Debug)]
pub(crate) struct MockUdpSocket {
    addr: String,
    transmitted: Arc<Mutex<Vec<(String, ClusterMessage)>>>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MockUdpSocket {
    pub(crate) fn new(addr: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            addr: addr.into(),
            transmitted: Arc::new(Mutex::new(Vec::new())),
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
        }
    }

    pub(crate) async fn transmitted(&self) -> Vec<(String, ClusterMessage)> {
        let tx = self.transmitted.lock().await;
        (*tx).clone()
    }

    pub(crate) async fn clear_transmitted(&self) {
        self.transmitted.lock().await.clear();
    }

    /// Queues `message` to be returned by the next `recv`.
    pub(crate) fn push_inbound(&self, message: &ClusterMessage) {
        let _ = self.inbound_tx.send(message.encode_to_vec());
    }
}

#[async_trait]
impl TransportLayer for MockUdpSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut rx = self.inbound_rx.lock().await;
        let datagram = rx.recv().await.ok_or_else(|| Error::Internal {
            message: "mock socket closed".to_string(),
            location: snafu::location!(),
        })?;

        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }

    async fn send_to(&self, buf: &[u8], target: &str) -> Result<usize> {
        let message = decode_message(buf)?;
        self.transmitted
            .lock()
            .await
            .push((target.to_string(), message));

        Ok(buf.len())
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.addr.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        core::transport::{send_message, TransportLayer},
        pb::{cluster_message::Action, ClusterMessage, JoinRequest},
        test_utils::mocks::MockUdpSocket,
    };

    fn join_request() -> ClusterMessage {
        ClusterMessage {
            action: Some(Action::JoinRequest(JoinRequest {
                from: "NODE_B".to_string(),
                incarnation: 1,
            })),
        }
    }

    #[tokio::test]
    async fn test_mock_udp_socket_send_to() {
        let socket = MockUdpSocket::new("NODE_A");
        let message = join_request();

        send_message(&socket, &message, "NODE_C").await.unwrap();

        let transmitted = socket.transmitted().await;
        assert_eq!(transmitted, vec![("NODE_C".to_string(), message)]);
    }

    #[tokio::test]
    async fn test_mock_udp_socket_received() {
        let socket = MockUdpSocket::new("NODE_A");
        let message = join_request();
        socket.push_inbound(&message);

        let mut buf = [0u8; 128];
        let len = socket.recv(&mut buf).await.unwrap();

        assert_eq!(
            crate::core::transport::decode_message(&buf[..len]).unwrap(),
            message
        );
    }
}
