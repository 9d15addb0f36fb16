// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - NETWORK MODULE
//
// Peer transport over plain TCP with newline-framed JSON messages.
// - NEW_BLOCK<json block>\n   fire and forget
// - GET_CHAIN\n               answered with <json array of blocks>\n
// Peers are a static host:port list; every outbound call is bounded
// by a per-peer timeout.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod codec;
pub mod error;
pub mod server;
pub mod transport;

pub use codec::{Request, DEFAULT_MAX_MESSAGE_BYTES};
pub use error::NetworkError;
pub use server::{bind, serve, InboundHandler};
pub use transport::{PeerTransport, TcpTransport};
