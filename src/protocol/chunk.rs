//! RTMP chunk stream codec
//!
//! Messages are split into chunks no larger than the negotiated chunk size.
//! Each chunk starts with a basic header (format + chunk stream id) followed
//! by a message header whose size depends on the format:
//!
//! ```text
//! fmt 0: timestamp(3) length(3) type(1) stream id(4, LE)   absolute
//! fmt 1: delta(3) length(3) type(1)                        same stream
//! fmt 2: delta(3)                                          same length/type
//! fmt 3: (none)                                            continuation
//! ```
//!
//! A 0xFFFFFF timestamp field means a 4-byte extended timestamp follows.

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;

use super::constants::*;
use super::message::RtmpMessage;
use crate::error::{ProtocolError, Result};

const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Size of the message header for each chunk format
const MESSAGE_HEADER_SIZE: [usize; 4] = [11, 7, 3, 0];

/// Splits outgoing messages into chunks
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Takes effect for the next encoded message
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Encode a message as one format 0 chunk plus format 3 continuations
    pub fn encode(&self, msg: &RtmpMessage, out: &mut BytesMut) {
        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;

        write_basic_header(out, 0, msg.csid);
        put_u24(out, msg.timestamp.min(EXTENDED_TIMESTAMP));
        put_u24(out, msg.payload.len() as u32);
        out.put_u8(msg.type_id);
        out.put_u32_le(msg.stream_id);
        if extended {
            out.put_u32(msg.timestamp);
        }

        for (i, piece) in msg.payload.chunks(self.chunk_size as usize).enumerate() {
            if i > 0 {
                write_basic_header(out, 3, msg.csid);
                if extended {
                    out.put_u32(msg.timestamp);
                }
            }
            out.put_slice(piece);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChunkHeader {
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
}

#[derive(Debug, Default)]
struct ChunkStream {
    header: ChunkHeader,
    buffer: BytesMut,
}

enum Progress {
    NeedMore,
    Partial,
    Complete(RtmpMessage),
}

/// Reassembles incoming chunks into messages, sans I/O
///
/// Set Chunk Size messages from the peer are applied as soon as they are
/// decoded, and still returned to the caller.
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStream>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Decode the next complete message, consuming its chunks from `buf`
    ///
    /// Returns `Ok(None)` when `buf` holds no complete message yet; any
    /// partial chunk is left in place.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                Progress::NeedMore => return Ok(None),
                Progress::Partial => continue,
                Progress::Complete(msg) => {
                    if msg.type_id == MSG_SET_CHUNK_SIZE && msg.payload.len() >= 4 {
                        let size = (&msg.payload[..4]).get_u32() & 0x7FFF_FFFF;
                        self.set_chunk_size(size);
                    }
                    return Ok(Some(msg));
                }
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<Progress> {
        let data = &buf[..];
        if data.is_empty() {
            return Ok(Progress::NeedMore);
        }

        let fmt = data[0] >> 6;
        let (csid, mut pos) = match data[0] & 0x3F {
            0 => {
                if data.len() < 2 {
                    return Ok(Progress::NeedMore);
                }
                (64 + data[1] as u32, 2)
            }
            1 => {
                if data.len() < 3 {
                    return Ok(Progress::NeedMore);
                }
                (64 + data[1] as u32 + ((data[2] as u32) << 8), 3)
            }
            n => (n as u32, 1),
        };

        let header_size = MESSAGE_HEADER_SIZE[fmt as usize];
        if data.len() < pos + header_size {
            return Ok(Progress::NeedMore);
        }

        let previous = self.streams.get(&csid);
        if fmt != 0 && previous.is_none() {
            return Err(ProtocolError::InvalidChunkHeader(format!(
                "format {} on unknown chunk stream {}",
                fmt, csid
            ))
            .into());
        }
        let mut header = previous.map(|s| s.header).unwrap_or_default();
        let already = previous.map_or(0, |s| s.buffer.len());

        let field = if fmt < 3 { read_u24(&data[pos..]) } else { 0 };
        match fmt {
            0 => {
                header.length = read_u24(&data[pos + 3..]);
                header.type_id = data[pos + 6];
                header.stream_id =
                    u32::from_le_bytes([data[pos + 7], data[pos + 8], data[pos + 9], data[pos + 10]]);
            }
            1 => {
                header.length = read_u24(&data[pos + 3..]);
                header.type_id = data[pos + 6];
            }
            _ => {}
        }
        pos += header_size;

        let extended = if fmt < 3 {
            field == EXTENDED_TIMESTAMP
        } else {
            header.extended
        };
        let timestamp_value = if extended {
            if data.len() < pos + 4 {
                return Ok(Progress::NeedMore);
            }
            let value = (&data[pos..pos + 4]).get_u32();
            pos += 4;
            value
        } else {
            field
        };

        if header.length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(header.length).into());
        }
        let length = header.length as usize;
        if already > length {
            return Err(ProtocolError::InvalidChunkHeader(format!(
                "length {} shorter than {} buffered bytes on chunk stream {}",
                length, already, csid
            ))
            .into());
        }

        let take = (length - already).min(self.chunk_size as usize);
        if data.len() < pos + take {
            return Ok(Progress::NeedMore);
        }

        let continuing = already > 0;
        match fmt {
            0 => {
                header.timestamp = timestamp_value;
                header.delta = 0;
            }
            1 | 2 => {
                header.delta = timestamp_value;
                header.timestamp = header.timestamp.wrapping_add(timestamp_value);
            }
            _ => {
                if !continuing {
                    header.timestamp = header.timestamp.wrapping_add(header.delta);
                }
            }
        }
        header.extended = extended;

        buf.advance(pos);
        let piece = buf.split_to(take);

        let stream = self.streams.entry(csid).or_default();
        stream.header = header;
        stream.buffer.extend_from_slice(&piece);

        if stream.buffer.len() < length {
            return Ok(Progress::Partial);
        }

        let payload = stream.buffer.split().freeze();
        Ok(Progress::Complete(RtmpMessage::new(
            csid,
            header.type_id,
            header.stream_id,
            header.timestamp,
            payload,
        )))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(out: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => out.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            out.put_u8(fmt << 6);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid.saturating_sub(64);
            out.put_u8((fmt << 6) | 1);
            out.put_u8((id & 0xFF) as u8);
            out.put_u8(((id >> 8) & 0xFF) as u8);
        }
    }
}

fn put_u24(out: &mut BytesMut, value: u32) {
    out.put_u8((value >> 16) as u8);
    out.put_u8((value >> 8) as u8);
    out.put_u8(value as u8);
}

fn read_u24(data: &[u8]) -> u32 {
    ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(len: usize, timestamp: u32) -> RtmpMessage {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        RtmpMessage::new(6, MSG_VIDEO, 1, timestamp, Bytes::from(payload))
    }

    #[test]
    fn test_large_message_split_and_reassembled() {
        let encoder = ChunkEncoder::new();
        let msg = video(300, 40);

        let mut buf = BytesMut::new();
        encoder.encode(&msg, &mut buf);
        // 12 byte header + 2 continuation headers
        assert_eq!(buf.len(), 300 + 12 + 2);

        let mut decoder = ChunkDecoder::new();
        let decoded = decoder.decode(&mut buf).unwrap().expect("message");
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_input_is_kept() {
        let encoder = ChunkEncoder::new();
        let msg = video(200, 0);
        let mut full = BytesMut::new();
        encoder.encode(&msg, &mut full);

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&full[..50]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 50);

        buf.extend_from_slice(&full[50..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn test_delta_headers_accumulate_timestamp() {
        let mut buf = BytesMut::new();
        // fmt 0, csid 4, ts 1000, len 2, audio, stream 1
        buf.put_u8(0x04);
        put_u24(&mut buf, 1000);
        put_u24(&mut buf, 2);
        buf.put_u8(MSG_AUDIO);
        buf.put_u32_le(1);
        buf.put_slice(&[0xAF, 0x01]);
        // fmt 2, delta 23
        buf.put_u8(0x80 | 0x04);
        put_u24(&mut buf, 23);
        buf.put_slice(&[0xAF, 0x02]);
        // fmt 3, new message reuses delta
        buf.put_u8(0xC0 | 0x04);
        buf.put_slice(&[0xAF, 0x03]);

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        let third = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.timestamp, 1000);
        assert_eq!(second.timestamp, 1023);
        assert_eq!(third.timestamp, 1046);
        assert_eq!(third.stream_id, 1);
        assert!(third.is_audio());
    }

    #[test]
    fn test_extended_timestamp() {
        let encoder = ChunkEncoder::new();
        let msg = video(10, 0x0100_0000);
        let mut buf = BytesMut::new();
        encoder.encode(&msg, &mut buf);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn test_peer_set_chunk_size_applied() {
        let mut sender = ChunkEncoder::new();
        let mut buf = BytesMut::new();
        sender.encode(&RtmpMessage::set_chunk_size(4096), &mut buf);
        sender.set_chunk_size(4096);
        let msg = video(3000, 0);
        sender.encode(&msg, &mut buf);

        let mut decoder = ChunkDecoder::new();
        let control = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(control.type_id, MSG_SET_CHUNK_SIZE);
        assert_eq!(decoder.chunk_size(), 4096);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn test_unknown_stream_continuation_rejected() {
        let mut buf = BytesMut::from(&[0xC3u8, 0x00][..]);
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_two_byte_basic_header() {
        let encoder = ChunkEncoder::new();
        let msg = RtmpMessage::new(100, MSG_DATA_AMF0, 0, 5, Bytes::from_static(b"hi"));
        let mut buf = BytesMut::new();
        encoder.encode(&msg, &mut buf);
        assert_eq!(buf[0], 0x00);
        assert_eq!(buf[1], 36);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(msg));
    }
}
