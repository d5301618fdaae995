//! Destinations for recorded media

use bytes::Bytes;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::flv::{write_flv_header, write_flv_tag, FlvTag};
use crate::error::Result;

/// Receives the audio and video tags of one recording
///
/// Called from the RTMP read task, so implementations must not block for
/// long.
pub trait MediaSink: Send {
    fn write_video_tag(&mut self, data: Bytes, timestamp: u32) -> Result<()>;

    fn write_audio_tag(&mut self, data: Bytes, timestamp: u32) -> Result<()>;

    /// Flush and close; called once when the session ends
    fn finish(&mut self) -> Result<()>;
}

/// Appends tags to an FLV file
pub struct FlvFileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    first_timestamp: Option<u32>,
    video_tags: u64,
    audio_tags: u64,
    finished: bool,
}

impl FlvFileSink {
    /// Create the file (and missing parent directories) and write the header
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        write_flv_header(&mut writer)?;

        tracing::debug!(path = %path.display(), "Created FLV file");

        Ok(Self {
            writer,
            path,
            first_timestamp: None,
            video_tags: 0,
            audio_tags: 0,
            finished: false,
        })
    }

    pub fn video_tags(&self) -> u64 {
        self.video_tags
    }

    pub fn audio_tags(&self) -> u64 {
        self.audio_tags
    }

    fn write_tag(&mut self, mut tag: FlvTag) -> Result<()> {
        // Timestamps start at zero in the file
        let first = *self.first_timestamp.get_or_insert(tag.timestamp);
        tag.timestamp = tag.timestamp.saturating_sub(first);

        if tag.is_avc_sequence_header() || tag.is_aac_sequence_header() {
            tracing::debug!(path = %self.path.display(), video = tag.is_video(), "Sequence header");
        }

        write_flv_tag(&mut self.writer, &tag)?;
        Ok(())
    }
}

impl MediaSink for FlvFileSink {
    fn write_video_tag(&mut self, data: Bytes, timestamp: u32) -> Result<()> {
        self.write_tag(FlvTag::video(timestamp, data))?;
        self.video_tags += 1;
        Ok(())
    }

    fn write_audio_tag(&mut self, data: Bytes, timestamp: u32) -> Result<()> {
        self.write_tag(FlvTag::audio(timestamp, data))?;
        self.audio_tags += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.flush()?;

        tracing::info!(
            path = %self.path.display(),
            video_tags = self.video_tags,
            audio_tags = self.audio_tags,
            "Recording file closed"
        );
        Ok(())
    }
}
