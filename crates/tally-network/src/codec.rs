// ─────────────────────────────────────────────────────────────────
// Wire codec: newline-framed UTF-8, one message per line
// ─────────────────────────────────────────────────────────────────
// Decoding is strict. Anything other than the two known verbs, JSON
// that does not match the block schema exactly, and lines longer than
// the configured limit are all MalformedMessage.
// ─────────────────────────────────────────────────────────────────

use tally_core::Block;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::NetworkError;

pub const NEW_BLOCK_VERB: &str = "NEW_BLOCK";
pub const GET_CHAIN_VERB: &str = "GET_CHAIN";

/// 16 MiB
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Message a peer may send to a node's listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    NewBlock(Box<Block>),
    GetChain,
}

impl Request {
    /// Encoded line including the trailing newline.
    pub fn encode(&self) -> Result<String, NetworkError> {
        match self {
            Request::NewBlock(block) => {
                let json = serde_json::to_string(block)
                    .map_err(|e| NetworkError::malformed(format!("block encode: {}", e)))?;
                Ok(format!("{}{}\n", NEW_BLOCK_VERB, json))
            }
            Request::GetChain => Ok(format!("{}\n", GET_CHAIN_VERB)),
        }
    }

    pub fn decode(line: &str) -> Result<Self, NetworkError> {
        let line = strip_line_ending(line);
        if line == GET_CHAIN_VERB {
            return Ok(Request::GetChain);
        }
        if let Some(payload) = line.strip_prefix(NEW_BLOCK_VERB) {
            if payload.is_empty() {
                return Err(NetworkError::malformed("NEW_BLOCK without payload"));
            }
            let block: Block = serde_json::from_str(payload)
                .map_err(|e| NetworkError::malformed(format!("block payload: {}", e)))?;
            return Ok(Request::NewBlock(Box::new(block)));
        }
        Err(NetworkError::malformed(format!(
            "unknown verb in {:?}",
            preview(line)
        )))
    }
}

/// `GET_CHAIN` response line including the trailing newline.
pub fn encode_chain(blocks: &[Block]) -> Result<String, NetworkError> {
    let json = serde_json::to_string(blocks)
        .map_err(|e| NetworkError::malformed(format!("chain encode: {}", e)))?;
    Ok(format!("{}\n", json))
}

pub fn decode_chain(line: &str) -> Result<Vec<Block>, NetworkError> {
    serde_json::from_str(strip_line_ending(line))
        .map_err(|e| NetworkError::malformed(format!("chain payload: {}", e)))
}

/// Read one frame. `Ok(None)` on clean EOF.
///
/// A frame may end at EOF without a newline. Frames longer than
/// `max_bytes` (newline excluded) are rejected.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<String>, NetworkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = (max_bytes as u64).saturating_add(1);
    let n = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max_bytes {
        return Err(NetworkError::malformed(format!(
            "frame exceeds {} bytes",
            max_bytes
        )));
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| NetworkError::malformed("frame is not valid UTF-8"))
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn preview(line: &str) -> String {
    line.chars().take(32).collect()
}
