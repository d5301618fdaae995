//! Error types
//!
//! One crate-wide `Error` covers the chat protocol, presence tracking and the
//! RTMP recording path. Wire-level failures keep their own small enums
//! (`AmfError`, `ProtocolError`) and are lifted with `?`.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug)]
pub enum Error {
    /// Chat handshake or transport failed and retries are exhausted
    Connect(String),

    /// Handshake reply had the wrong number of fields (retryable)
    HandshakeMalformed {
        /// The raw line as received
        line: String,
        /// Field count the handshake step expects
        expected: usize,
        /// Field count actually received
        got: usize,
    },

    /// The broadcaster has no presence on the platform
    NotFound(String),

    /// The broadcaster exists but is not in a public show
    NoPublicStreams(String),

    /// Login challenge was not answered in time
    ChallengeTimeout,

    /// Server did not confirm stream creation in time
    StreamCreateTimeout,

    /// Liveness watchdog saw no new media between two samples
    NoDataTimeout,

    /// Notification queue is full, the event was dropped
    QueueOverflow,

    /// Payload looked like presence data but could not be parsed
    Extraction(String),

    /// Dispatch loop or line transport failure, surfaced to receivers
    Transport(String),

    /// Script evaluation failed
    Script(String),

    /// The connection or session was closed
    Closed,

    /// I/O error
    Io(io::Error),

    /// HTTP side-channel error
    Http(reqwest::Error),

    /// WebSocket error
    WebSocket(tokio_tungstenite::tungstenite::Error),

    /// AMF encoding/decoding error
    Amf(AmfError),

    /// RTMP wire protocol error
    Protocol(ProtocolError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect(msg) => write!(f, "connect failed: {}", msg),
            Error::HandshakeMalformed {
                line,
                expected,
                got,
            } => write!(
                f,
                "malformed handshake line ({} fields, expected {}): {:?}",
                got, expected, line
            ),
            Error::NotFound(name) => write!(f, "{:?} does not exist", name),
            Error::NoPublicStreams(name) => write!(f, "{:?} has no public streams", name),
            Error::ChallengeTimeout => write!(f, "login challenge wait timeout"),
            Error::StreamCreateTimeout => write!(f, "create stream timeout"),
            Error::NoDataTimeout => write!(f, "no data received, stream closed"),
            Error::QueueOverflow => write!(f, "notification queue is full"),
            Error::Extraction(msg) => write!(f, "cannot extract model data: {}", msg),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Script(msg) => write!(f, "script evaluation failed: {}", msg),
            Error::Closed => write!(f, "connection closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Protocol(e) => write!(f, "RTMP protocol error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Whether the chat handshake should be restarted from scratch
    pub fn is_retryable_handshake(&self) -> bool {
        matches!(self, Error::HandshakeMalformed { .. })
    }

    /// Errors that end a recording session but leave the watcher running
    pub fn is_session_local(&self) -> bool {
        matches!(
            self,
            Error::ChallengeTimeout
                | Error::StreamCreateTimeout
                | Error::NoDataTimeout
                | Error::Closed
                | Error::Protocol(_)
                | Error::Script(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Protocol(ProtocolError::Handshake(e))
    }
}

/// AMF decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    UnexpectedEof,
    InvalidUtf8,
    UnknownMarker(u8),
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "unexpected end of data"),
            AmfError::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            AmfError::UnknownMarker(m) => write!(f, "unknown type marker 0x{:02x}", m),
            AmfError::NestingTooDeep => write!(f, "nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

/// RTMP handshake errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    InvalidVersion(u8),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "invalid RTMP version {}", v),
        }
    }
}

/// RTMP wire protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Handshake(HandshakeError),
    InvalidChunkHeader(String),
    MessageTooLarge(u32),
    InvalidUrl(String),
    UnexpectedMessage(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Handshake(e) => write!(f, "handshake: {}", e),
            ProtocolError::InvalidChunkHeader(msg) => write!(f, "invalid chunk header: {}", msg),
            ProtocolError::MessageTooLarge(len) => write!(f, "message too large: {} bytes", len),
            ProtocolError::InvalidUrl(url) => write!(f, "invalid RTMP url: {}", url),
            ProtocolError::UnexpectedMessage(msg) => write!(f, "unexpected message: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_malformed_is_retryable() {
        let err = Error::HandshakeMalformed {
            line: "1 2 3".into(),
            expected: 5,
            got: 3,
        };
        assert!(err.is_retryable_handshake());
        assert!(!Error::Connect("boom".into()).is_retryable_handshake());
    }

    #[test]
    fn test_session_local_errors() {
        assert!(Error::NoDataTimeout.is_session_local());
        assert!(Error::StreamCreateTimeout.is_session_local());
        assert!(!Error::QueueOverflow.is_session_local());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::NoPublicStreams("alice".into()).to_string(),
            "\"alice\" has no public streams"
        );
        assert_eq!(
            Error::from(AmfError::UnknownMarker(0xff)).to_string(),
            "AMF error: unknown type marker 0xff"
        );
    }
}
