use async_trait::async_trait;
use std::time::Duration;
use tally_core::Block;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::codec::{self, Request, DEFAULT_MAX_MESSAGE_BYTES};
use crate::NetworkError;

/// Outbound side of the peer protocol.
///
/// The ledger service only talks to peers through this trait, so tests can
/// substitute an in-memory peer set.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send `block` to every peer. Failures are logged and skipped.
    /// Returns how many peers accepted the frame.
    async fn broadcast_block(&self, block: &Block) -> usize;

    /// Ask one peer for its full chain.
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, NetworkError>;

    /// Static peer list, `host:port`.
    fn peers(&self) -> Vec<String>;
}

/// Plain TCP transport. One short-lived connection per call.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    peers: Vec<String>,
    timeout: Duration,
    max_message_bytes: usize,
}

impl TcpTransport {
    pub fn new(peers: Vec<String>, timeout: Duration) -> Self {
        Self {
            peers,
            timeout,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(peer: &str) -> Result<TcpStream, NetworkError> {
        TcpStream::connect(peer)
            .await
            .map_err(|e| NetworkError::UnreachablePeer {
                peer: peer.to_string(),
                reason: e.to_string(),
            })
    }

    async fn send_frame(peer: &str, frame: &str) -> Result<(), NetworkError> {
        let mut stream = Self::connect(peer).await?;
        codec::write_frame(&mut stream, frame).await
    }

    async fn request_chain(&self, peer: &str) -> Result<Vec<Block>, NetworkError> {
        let stream = Self::connect(peer).await?;
        let mut reader = BufReader::new(stream);
        codec::write_frame(reader.get_mut(), &Request::GetChain.encode()?).await?;
        let line = codec::read_frame(&mut reader, self.max_message_bytes)
            .await?
            .ok_or_else(|| NetworkError::UnreachablePeer {
                peer: peer.to_string(),
                reason: "connection closed before chain response".to_string(),
            })?;
        codec::decode_chain(&line)
    }

    fn timed_out(&self, peer: &str) -> NetworkError {
        NetworkError::Timeout {
            peer: peer.to_string(),
            after_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn broadcast_block(&self, block: &Block) -> usize {
        let frame = match Request::NewBlock(Box::new(block.clone())).encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Cannot encode block #{}: {}", block.index, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for peer in &self.peers {
            match tokio::time::timeout(self.timeout, Self::send_frame(peer, &frame)).await {
                Ok(Ok(())) => {
                    delivered += 1;
                    log::debug!("📤 NEW_BLOCK #{} -> {}", block.index, peer);
                }
                Ok(Err(e)) => log::warn!("Broadcast to {} failed: {}", peer, e),
                Err(_) => log::warn!("Broadcast to {} failed: {}", peer, self.timed_out(peer)),
            }
        }
        delivered
    }

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, NetworkError> {
        match tokio::time::timeout(self.timeout, self.request_chain(peer)).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(peer)),
        }
    }

    fn peers(&self) -> Vec<String> {
        self.peers.clone()
    }
}
