//! RTMP messages and the command builders a playback client needs

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::constants::*;
use crate::amf::{amf0, AmfValue};
use crate::error::{ProtocolError, Result};

/// A complete RTMP message, reassembled from chunks
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    /// Chunk stream the message travels on
    pub csid: u32,
    /// Message type ID
    pub type_id: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    /// Message body
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(csid: u32, type_id: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            csid,
            type_id,
            stream_id,
            timestamp,
            payload,
        }
    }

    /// AMF0 command message
    pub fn command(csid: u32, stream_id: u32, values: &[AmfValue]) -> Self {
        Self::new(csid, MSG_COMMAND_AMF0, stream_id, 0, amf0::encode_all(values))
    }

    pub fn is_video(&self) -> bool {
        self.type_id == MSG_VIDEO
    }

    pub fn is_audio(&self) -> bool {
        self.type_id == MSG_AUDIO
    }

    /// Command or data message (AMF0)
    pub fn is_command(&self) -> bool {
        matches!(self.type_id, MSG_COMMAND_AMF0 | MSG_DATA_AMF0)
    }

    /// Check for a byte pattern anywhere in the payload
    pub fn payload_contains(&self, needle: &[u8]) -> bool {
        !needle.is_empty() && self.payload.windows(needle.len()).any(|w| w == needle)
    }

    /// Decode the AMF0 values of a command message
    pub fn command_values(&self) -> Result<Vec<AmfValue>> {
        Ok(amf0::decode_all(&self.payload)?)
    }

    /// Set Chunk Size protocol control message
    pub fn set_chunk_size(size: u32) -> Self {
        Self::control(MSG_SET_CHUNK_SIZE, size & 0x7FFF_FFFF)
    }

    /// Acknowledgement carrying the received byte count
    pub fn acknowledgement(sequence: u32) -> Self {
        Self::control(MSG_ACKNOWLEDGEMENT, sequence)
    }

    /// User control ping response echoing the server's timestamp
    pub fn ping_response(timestamp: u32) -> Self {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u16(UC_PING_RESPONSE);
        buf.put_u32(timestamp);
        Self::new(CSID_PROTOCOL_CONTROL, MSG_USER_CONTROL, 0, 0, buf.freeze())
    }

    fn control(type_id: u8, value: u32) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(value);
        Self::new(CSID_PROTOCOL_CONTROL, type_id, 0, 0, buf.freeze())
    }
}

/// Parsed `rtmp://host[:port]/app` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
}

impl RtmpUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidUrl(url.to_string());

        let rest = url.strip_prefix("rtmp://").ok_or_else(invalid)?;
        let (authority, app) = rest.split_once('/').ok_or_else(invalid)?;
        if authority.is_empty() || app.is_empty() {
            return Err(invalid().into());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, 1935),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            app: app.trim_end_matches('/').to_string(),
        })
    }

    /// `host:port` for socket connection
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Arguments of the `connect` command
///
/// The relay expects seven positional arguments after the command object:
/// token, suffix, room id, operation tag, model id, flags and an extra string.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub token: String,
    pub suffix: String,
    pub room_id: String,
    pub op_type: String,
    pub model_id: u64,
    pub flags: u32,
    pub extra: String,
}

impl ConnectParams {
    /// Build the `connect` command message for the given URL
    pub fn to_message(&self, url: &RtmpUrl, tc_url: &str) -> RtmpMessage {
        let mut obj = HashMap::new();
        obj.insert("app".to_string(), AmfValue::from(url.app.as_str()));
        obj.insert("flashVer".to_string(), AmfValue::from("WIN 11,1,102,55"));
        obj.insert("tcUrl".to_string(), AmfValue::from(tc_url));
        obj.insert("fpad".to_string(), AmfValue::Boolean(false));
        obj.insert("capabilities".to_string(), AmfValue::Number(15.0));
        obj.insert("audioCodecs".to_string(), AmfValue::Number(3191.0));
        obj.insert("videoCodecs".to_string(), AmfValue::Number(252.0));
        obj.insert("videoFunction".to_string(), AmfValue::Number(1.0));
        obj.insert("objectEncoding".to_string(), AmfValue::Number(0.0));

        RtmpMessage::command(
            CSID_COMMAND,
            0,
            &[
                AmfValue::from(CMD_CONNECT),
                AmfValue::Number(CONNECT_TRANSACTION_ID),
                AmfValue::Object(obj),
                AmfValue::from(self.token.as_str()),
                AmfValue::from(self.suffix.as_str()),
                AmfValue::from(self.room_id.as_str()),
                AmfValue::from(self.op_type.as_str()),
                AmfValue::from(self.model_id),
                AmfValue::from(self.flags),
                AmfValue::from(self.extra.as_str()),
            ],
        )
    }
}

/// Arguments of the `play` command; `None` fields are left out
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayParams {
    pub path: String,
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub reset: Option<bool>,
}

impl PlayParams {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn to_message(&self, stream_id: u32) -> RtmpMessage {
        let mut values = vec![
            AmfValue::from(CMD_PLAY),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::from(self.path.as_str()),
        ];
        if let Some(start) = self.start {
            values.push(AmfValue::Number(start));
        }
        if let Some(duration) = self.duration {
            values.push(AmfValue::Number(duration));
        }
        if let Some(reset) = self.reset {
            values.push(AmfValue::Boolean(reset));
        }
        RtmpMessage::command(CSID_STREAM_COMMAND, stream_id, &values)
    }
}

/// `createStream` command
pub fn create_stream_command(transaction_id: f64) -> RtmpMessage {
    RtmpMessage::command(
        CSID_COMMAND,
        0,
        &[
            AmfValue::from(CMD_CREATE_STREAM),
            AmfValue::Number(transaction_id),
            AmfValue::Null,
        ],
    )
}

/// `_result` reply to a server-initiated call
pub fn result_command(transaction_id: f64, response: &str) -> RtmpMessage {
    RtmpMessage::command(
        CSID_COMMAND,
        0,
        &[
            AmfValue::from(CMD_RESULT),
            AmfValue::Number(transaction_id),
            AmfValue::Null,
            AmfValue::from(response),
        ],
    )
}
