//! Recorded media handling
//!
//! - `flv`: FLV tag model and file layout
//! - `sink`: the `MediaSink` seam and its FLV file implementation

pub mod flv;
pub mod sink;

pub use flv::{FlvTag, FlvTagType};
pub use sink::{FlvFileSink, MediaSink};
