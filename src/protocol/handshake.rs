//! RTMP client handshake
//!
//! ```text
//! client                        relay
//!   C0 version, C1 time+random  ─►
//!                               ◄─  S0 version, S1 time+random, S2 echo of C1
//!   C2 echo of S1               ─►
//! ```
//!
//! Only the simple handshake (no HMAC digest) is spoken. Relays accept it
//! from players.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// S0 + S1 + S2
const SERVER_REPLY_SIZE: usize = 1 + HANDSHAKE_SIZE * 2;

#[derive(Debug)]
enum Step {
    SendC0C1,
    AwaitReply { c1: Box<[u8; HANDSHAKE_SIZE]> },
    Complete,
}

/// Client side of the handshake, sans I/O
#[derive(Debug)]
pub struct ClientHandshake {
    step: Step,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            step: Step::SendC0C1,
        }
    }

    /// Bytes the relay must send before `process` can make progress
    pub fn bytes_needed(&self) -> usize {
        match self.step {
            Step::AwaitReply { .. } => SERVER_REPLY_SIZE,
            _ => 0,
        }
    }

    /// C0 + C1; `None` once sent
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if !matches!(self.step, Step::SendC0C1) {
            return None;
        }

        let c1 = generate_packet();
        let mut out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        out.put_u8(RTMP_VERSION);
        out.put_slice(&c1);

        self.step = Step::AwaitReply { c1: Box::new(c1) };
        Some(out.freeze())
    }

    /// Consume S0S1S2 and return C2, or `None` if more data is needed
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        let Step::AwaitReply { c1 } = &self.step else {
            return Ok(None);
        };
        if data.remaining() < SERVER_REPLY_SIZE {
            return Ok(None);
        }

        // Relays answer 3 or higher
        let version = data.get_u8();
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut s1);
        let s2 = data.split_to(HANDSHAKE_SIZE);
        if s2[8..] != c1[8..] {
            tracing::debug!("S2 does not echo C1, continuing");
        }

        self.step = Step::Complete;
        Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u32)
}

/// C1: our time, four zero bytes, random filler
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut c1 = [0u8; HANDSHAKE_SIZE];
    c1[..4].copy_from_slice(&now_millis().to_be_bytes());
    rand::thread_rng().fill(&mut c1[8..]);
    c1
}

/// C2: S1 with the time we read it stamped into bytes 4..8
fn generate_echo(s1: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut c2 = *s1;
    c2[4..8].copy_from_slice(&now_millis().to_be_bytes());
    c2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_reply(version: u8, s2: &[u8]) -> Bytes {
        let mut reply = BytesMut::with_capacity(SERVER_REPLY_SIZE);
        reply.put_u8(version);
        reply.put_slice(&generate_packet());
        reply.put_slice(s2);
        reply.freeze()
    }

    #[test]
    fn test_c2_echoes_s1() {
        let mut hs = ClientHandshake::new();
        assert_eq!(hs.bytes_needed(), 0);

        let c0c1 = hs.generate_initial().unwrap();
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert_eq!(hs.bytes_needed(), SERVER_REPLY_SIZE);

        let mut reply = relay_reply(RTMP_VERSION, &c0c1[1..]);
        let s1 = reply.slice(1..1 + HANDSHAKE_SIZE);
        let c2 = hs.process(&mut reply).unwrap().unwrap();

        assert_eq!(hs.bytes_needed(), 0);
        assert!(hs.generate_initial().is_none());
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert_eq!(&c2[..4], &s1[..4]);
        assert_eq!(&c2[8..], &s1[8..]);
        assert!(reply.is_empty());
    }

    #[test]
    fn test_s2_mismatch_tolerated() {
        let mut hs = ClientHandshake::new();
        hs.generate_initial();
        let mut reply = relay_reply(RTMP_VERSION, &[7u8; HANDSHAKE_SIZE]);
        assert!(hs.process(&mut reply).unwrap().is_some());
    }

    #[test]
    fn test_short_reply_waits() {
        let mut hs = ClientHandshake::new();
        hs.generate_initial();

        let mut partial = Bytes::from(vec![RTMP_VERSION; 1000]);
        assert!(hs.process(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 1000);
        assert_eq!(hs.bytes_needed(), SERVER_REPLY_SIZE);
    }

    #[test]
    fn test_old_version_rejected() {
        let mut hs = ClientHandshake::new();
        hs.generate_initial();
        let mut reply = relay_reply(2, &[0u8; HANDSHAKE_SIZE]);
        assert!(hs.process(&mut reply).is_err());
    }

    #[test]
    fn test_c0c1_sent_once() {
        let mut hs = ClientHandshake::default();
        assert!(hs.generate_initial().is_some());
        assert!(hs.generate_initial().is_none());
    }

    #[test]
    fn test_c1_layout() {
        let c1 = generate_packet();
        assert_eq!(&c1[4..8], &[0, 0, 0, 0]);
        assert!(c1[8..].iter().any(|b| *b != 0));
    }
}
