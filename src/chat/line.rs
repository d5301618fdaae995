//! Text lines of the chat protocol
//!
//! Every line is five or more whitespace separated fields:
//! `<type> <from> <to> <arg1> <arg2> [payload]`. Outgoing lines end in `\n`.

use serde::Serialize;

use super::bootstrap::Challenge;
use crate::error::{Error, Result};

/// First line after the transport opens
pub const HELLO: &str = "hello fcserver\n";

/// Keepalive line, also sent once at the end of the handshake
pub const HEARTBEAT: &str = "0 0 0 0 0\n";

/// Presence payload fragment for undisclosed visibility (90)
pub const UNDISCLOSED_MARKER: &str = "%22vs%22:90";

/// Validity window of the challenge answer, in milliseconds
const ANSWER_WINDOW_MS: i64 = 600;

const TOKEN_FIELDS: usize = 5;
const TOKEN_INDEX: usize = 2;
const SESSION_FIELDS: usize = 6;
const SESSION_INDEX: usize = 5;
const REQUEST_ID_INDEX: usize = 3;

#[derive(Serialize)]
struct ChallengeAnswer<'a> {
    err: i32,
    start: i64,
    stop: i64,
    a: i32,
    time: i64,
    key: &'a str,
    cid: &'a str,
    pid: i32,
    site: &'a str,
}

/// `1 0 0 81 0 <url-escaped JSON>` answering the challenge
pub fn challenge_answer(challenge: &Challenge, now_ms: i64, site: &str) -> Result<String> {
    let answer = ChallengeAnswer {
        err: 0,
        start: now_ms,
        stop: now_ms + ANSWER_WINDOW_MS,
        a: 0,
        time: challenge.time,
        key: &challenge.key,
        cid: &challenge.cid,
        pid: 1,
        site,
    };
    let json = serde_json::to_string(&answer).map_err(|e| Error::Connect(e.to_string()))?;
    Ok(format!("1 0 0 81 0 {}\n", urlencoding::encode(&json)))
}

/// Guest login for the negotiated session
pub fn login(session_id: &str) -> String {
    format!("1 0 0 20071025 0 {}@1/guest:guest\n", session_id)
}

/// Ask for a broadcaster's details by name
pub fn model_request(token: &str, request_id: i64, name: &str) -> String {
    format!("10 {} 0 {} 0 {}\n", token, request_id, name)
}

/// Subscribe to presence updates
pub fn add_me(token: &str) -> String {
    format!("44 {} 0 1 0\n", token)
}

/// Token from the first server reply (exactly five fields)
pub fn parse_token(line: &str) -> Result<String> {
    field_at(line, TOKEN_FIELDS, TOKEN_INDEX)
}

/// Session id from the second server reply (exactly six fields)
pub fn parse_session_id(line: &str) -> Result<String> {
    field_at(line, SESSION_FIELDS, SESSION_INDEX)
}

/// Request id field of a server line, if present
pub fn request_id_of(line: &str) -> Option<&str> {
    line.split_whitespace().nth(REQUEST_ID_INDEX)
}

fn field_at(line: &str, expected: usize, index: usize) -> Result<String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != expected {
        return Err(Error::HandshakeMalformed {
            line: line.to_string(),
            expected,
            got: fields.len(),
        });
    }
    Ok(fields[index].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> Challenge {
        Challenge {
            time: 1_700_000_000,
            cid: "c1d".into(),
            key: "k/ey".into(),
        }
    }

    #[test]
    fn test_challenge_answer_is_escaped_json() {
        let line = challenge_answer(&challenge(), 1000, "www").unwrap();
        assert!(line.starts_with("1 0 0 81 0 "));
        assert!(line.ends_with('\n'));

        let payload = line.trim_end().rsplit(' ').next().unwrap();
        assert!(!payload.contains('{'));
        let json = urlencoding::decode(payload).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["start"], 1000);
        assert_eq!(value["stop"], 1600);
        assert_eq!(value["time"], 1_700_000_000i64);
        assert_eq!(value["key"], "k/ey");
        assert_eq!(value["pid"], 1);
        assert_eq!(value["site"], "www");
    }

    #[test]
    fn test_outgoing_lines() {
        assert_eq!(login("12345"), "1 0 0 20071025 0 12345@1/guest:guest\n");
        assert_eq!(model_request("tok", 99, "alice"), "10 tok 0 99 0 alice\n");
        assert_eq!(add_me("tok"), "44 tok 0 1 0\n");
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token("0 0 tok123 0 0").unwrap(), "tok123");

        let err = parse_token("0 0 tok123 0").unwrap_err();
        assert!(err.is_retryable_handshake());
    }

    #[test]
    fn test_parse_session_id() {
        assert_eq!(parse_session_id("1 0 0 0 0 555").unwrap(), "555");
        assert!(parse_session_id("1 0 0 0 0").unwrap_err().is_retryable_handshake());
    }

    #[test]
    fn test_request_id_of() {
        assert_eq!(request_id_of("10 0 1 1700000000 0 payload"), Some("1700000000"));
        assert_eq!(request_id_of("10 0"), None);
    }
}
