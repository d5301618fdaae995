//! AMF0 support for RTMP command messages
//!
//! The recorder only speaks AMF0: it encodes `connect`, `createStream`,
//! `play` and the `_result` challenge answer, and decodes the server's
//! `_result`/`onStatus` replies.

pub mod amf0;
pub mod value;

pub use amf0::{decode_all, encode_all};
pub use value::AmfValue;
