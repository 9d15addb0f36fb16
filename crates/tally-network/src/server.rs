use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tally_core::Block;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

use crate::codec::{self, Request};
use crate::NetworkError;

/// Inbound side of the peer protocol, implemented by the node.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// A peer announced a block.
    async fn on_new_block(&self, block: Block);

    /// Current local chain, served to `GET_CHAIN`.
    fn chain_snapshot(&self) -> Vec<Block>;
}

pub async fn bind(addr: &str) -> Result<TcpListener, NetworkError> {
    Ok(TcpListener::bind(addr).await?)
}

/// Accept loop. Each connection is served on its own task; the loop only
/// returns if `accept` itself fails.
pub async fn serve<H>(
    listener: TcpListener,
    handler: Arc<H>,
    max_message_bytes: usize,
) -> Result<(), NetworkError>
where
    H: InboundHandler,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("📡 Listening for peers on {}", addr);
    }
    loop {
        let (stream, remote) = listener.accept().await?;
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, remote, handler, max_message_bytes).await {
                log::warn!("Connection from {} dropped: {}", remote, e);
            }
        });
    }
}

async fn handle_connection<H>(
    stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<H>,
    max_message_bytes: usize,
) -> Result<(), NetworkError>
where
    H: InboundHandler,
{
    let mut reader = BufReader::new(stream);
    while let Some(line) = codec::read_frame(&mut reader, max_message_bytes).await? {
        match Request::decode(&line)? {
            Request::GetChain => {
                let blocks = handler.chain_snapshot();
                log::debug!("📥 GET_CHAIN from {} ({} blocks)", remote, blocks.len());
                let frame = codec::encode_chain(&blocks)?;
                codec::write_frame(reader.get_mut(), &frame).await?;
            }
            Request::NewBlock(block) => {
                log::debug!("📥 NEW_BLOCK #{} from {}", block.index, remote);
                handler.on_new_block(*block).await;
            }
        }
    }
    Ok(())
}
