//! RTMP protocol constants

/// RTMP version sent in C0
pub const RTMP_VERSION: u8 = 3;

/// Size of C1/C2/S1/S2 handshake packets
pub const HANDSHAKE_SIZE: usize = 1536;

/// Default chunk size before any Set Chunk Size message
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Upper bound accepted for a peer's Set Chunk Size
pub const MAX_CHUNK_SIZE: u32 = 0xFF_FFFF;

/// Largest message the decoder will assemble
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

// Chunk stream IDs used by the client
pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_STREAM_COMMAND: u32 = 8;

// Message type IDs
pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

// User control event types
pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

// Command names
pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";

/// Transaction id of the connect command
pub const CONNECT_TRANSACTION_ID: f64 = 1.0;
