//! Login challenge answered during RTMP connect
//!
//! After `connect` the relay calls `loginResult` with a script fragment. The
//! client evaluates it and replies with `_result` carrying the call's
//! transaction id and the script's string value. The script probes browser
//! properties a headless client cannot report, so those expressions are
//! pinned to `1` first.

use boa_engine::{Context, Source};
use regex::Regex;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::protocol::message::{result_command, RtmpMessage};

/// Command name marking the challenge
pub const LOGIN_RESULT: &[u8] = b"loginResult";

/// Byte offset of the transaction id: string marker, length, "loginResult",
/// number marker
const TRANSACTION_ID_OFFSET: usize = 15;

/// Evaluates a script fragment to its string value
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, script: &str) -> Result<String>;
}

/// `ScriptEvaluator` on the boa JavaScript engine
#[derive(Debug, Clone, Copy, Default)]
pub struct BoaEvaluator;

impl ScriptEvaluator for BoaEvaluator {
    fn evaluate(&self, script: &str) -> Result<String> {
        let mut context = Context::default();
        let value = context
            .eval(Source::from_bytes(script))
            .map_err(|e| Error::Script(e.to_string()))?;
        let text = value
            .to_string(&mut context)
            .map_err(|e| Error::Script(e.to_string()))?;
        Ok(text.to_std_string_escaped())
    }
}

fn script_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\(function\(.+\)").ok())
        .as_ref()
}

/// Big-endian f64 transaction id of the `loginResult` call
pub fn transaction_id(payload: &[u8]) -> Result<f64> {
    let bytes = payload
        .get(TRANSACTION_ID_OFFSET..TRANSACTION_ID_OFFSET + 8)
        .ok_or_else(|| Error::Script("challenge payload too short".into()))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(f64::from_be_bytes(raw))
}

/// Script fragment embedded in the payload
pub fn extract_script(payload: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(payload);
    script_pattern()
        .and_then(|pattern| pattern.find(&text))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::Script("no script in challenge".into()))
}

/// Replace every occurrence of each placeholder with `1`
pub fn substitute_placeholders(script: &str, placeholders: &[String]) -> String {
    placeholders
        .iter()
        .filter(|p| !p.is_empty())
        .fold(script.to_string(), |script, placeholder| {
            script.replace(placeholder.as_str(), "1")
        })
}

/// Builds the `_result` answer for a challenge message
#[derive(Clone)]
pub struct ChallengeSolver {
    evaluator: Arc<dyn ScriptEvaluator>,
    placeholders: Vec<String>,
}

impl ChallengeSolver {
    pub fn new(evaluator: Arc<dyn ScriptEvaluator>, placeholders: Vec<String>) -> Self {
        Self {
            evaluator,
            placeholders,
        }
    }

    /// Whether a command payload carries the challenge
    pub fn is_challenge(msg: &RtmpMessage) -> bool {
        msg.is_command() && msg.payload_contains(LOGIN_RESULT)
    }

    pub fn answer(&self, payload: &[u8]) -> Result<RtmpMessage> {
        let transaction_id = transaction_id(payload)?;
        let script = substitute_placeholders(&extract_script(payload)?, &self.placeholders);
        let response = self.evaluator.evaluate(&script)?;

        tracing::debug!(transaction_id, response = %response, "Answering login challenge");
        Ok(result_command(transaction_id, &response))
    }
}
