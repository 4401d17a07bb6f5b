//! # Transport Layer Module
//!
//! Datagram transport used by a node to exchange [`ClusterMessage`]s with its peers.
//! The node only depends on [`TransportLayer`], which lets tests replace the
//! UDP socket with an in-memory mock.
use async_trait::async_trait;
use prost::Message;
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::pb::ClusterMessage;

#[async_trait]
pub trait TransportLayer: Send + Sync + 'static {
    /// Receives one datagram into `buf`, returning its length.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Sends one datagram to `target`.
    async fn send_to(&self, buf: &[u8], target: &str) -> Result<usize>;

    /// The address peers use to reach this transport.
    fn local_addr(&self) -> Result<String>;
}

#[async_trait]
impl TransportLayer for UdpSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(UdpSocket::recv(self, buf).await?)
    }

    async fn send_to(&self, buf: &[u8], target: &str) -> Result<usize> {
        Ok(UdpSocket::send_to(self, buf, target).await?)
    }

    fn local_addr(&self) -> Result<String> {
        let addr = UdpSocket::local_addr(self)?;
        Ok(addr.to_string())
    }
}

/// Encodes `message` and sends it as a single datagram.
pub(crate) async fn send_message<T: TransportLayer + ?Sized>(
    socket: &T,
    message: &ClusterMessage,
    target: &str,
) -> Result<()> {
    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf)?;

    socket.send_to(&buf, target).await?;

    Ok(())
}

/// Decodes a datagram received from a peer.
pub(crate) fn decode_message(buf: &[u8]) -> Result<ClusterMessage> {
    Ok(ClusterMessage::decode(buf)?)
}
