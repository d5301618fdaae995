//! FLV tags and file layout
//!
//! RTMP audio/video message bodies are FLV tag bodies; writing a recording is
//! a matter of prefixing each with an 11 byte tag header.
//!
//! ```text
//! File:  "FLV" | version(1) | flags(1) | header size(4) | prev size 0 (4)
//! Tag:   type(1) | data size(3) | ts(3) | ts ext(1) | stream id(3) | data | prev size(4)
//! ```

use bytes::Bytes;
use std::io::{self, Write};

const FLV_SIGNATURE: [u8; 3] = *b"FLV";
const FLV_VERSION: u8 = 0x01;
/// Bit 0 video, bit 2 audio
const FLV_TYPE_FLAGS_AV: u8 = 0x05;
const FLV_HEADER_SIZE: u32 = 9;
const FLV_TAG_HEADER_SIZE: u32 = 11;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    /// Type code in the tag header
    pub fn code(&self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// One media tag as received from the relay
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body, codec header included
    pub data: Bytes,
}

impl FlvTag {
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    /// AVC (codec 7) packet type 0
    pub fn is_avc_sequence_header(&self) -> bool {
        self.is_video() && self.data.len() >= 2 && self.data[0] & 0x0F == 7 && self.data[1] == 0
    }

    /// AAC (format 10) packet type 0
    pub fn is_aac_sequence_header(&self) -> bool {
        self.is_audio() && self.data.len() >= 2 && self.data[0] >> 4 == 10 && self.data[1] == 0
    }
}

/// Write the file header plus PreviousTagSize0
pub fn write_flv_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&FLV_SIGNATURE)?;
    writer.write_all(&[FLV_VERSION, FLV_TYPE_FLAGS_AV])?;
    writer.write_all(&FLV_HEADER_SIZE.to_be_bytes())?;
    writer.write_all(&0u32.to_be_bytes())?;
    Ok(())
}

/// Write one tag followed by its PreviousTagSize
pub fn write_flv_tag(writer: &mut impl Write, tag: &FlvTag) -> io::Result<()> {
    let data_size = tag.data.len() as u32;
    let ts = tag.timestamp;

    writer.write_all(&[
        tag.tag_type.code(),
        (data_size >> 16) as u8,
        (data_size >> 8) as u8,
        data_size as u8,
        (ts >> 16) as u8,
        (ts >> 8) as u8,
        ts as u8,
        (ts >> 24) as u8,
        0,
        0,
        0,
    ])?;
    writer.write_all(&tag.data)?;
    writer.write_all(&(FLV_TAG_HEADER_SIZE + data_size).to_be_bytes())?;
    Ok(())
}
