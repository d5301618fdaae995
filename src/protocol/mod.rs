//! RTMP wire protocol, client side
//!
//! - `handshake`: simple C0/C1/C2 exchange
//! - `chunk`: chunk stream encoder and decoder
//! - `message`: reassembled messages and command builders

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use handshake::ClientHandshake;
pub use message::{ConnectParams, PlayParams, RtmpMessage, RtmpUrl};
