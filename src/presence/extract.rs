//! Presence payload extraction
//!
//! A presence line is a URL-encoded payload behind five numeric routing
//! fields: `<type> <from> <to> <arg1> <arg2> %7B%22lv%22:4,...%7D`.

use regex::Regex;
use serde_json::Deserializer;
use std::borrow::Cow;
use std::sync::OnceLock;

use super::model::{ModelState, RawModel};
use crate::error::{Error, Result};

/// Outcome of extracting a line that was decodable
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Model(ModelState),
    /// Service chatter with no presence object
    NotAModel,
}

fn routing_prefix() -> Option<&'static Regex> {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    PREFIX
        .get_or_init(|| Regex::new(r"\d+\s\d+\s\d+\s\d+\s\d+\s").ok())
        .as_ref()
}

/// Decode a raw protocol line into a presence snapshot
///
/// Only the first JSON object is read; anything after it is ignored.
pub fn extract_model(raw: &str) -> Result<Extraction> {
    let unplussed = raw.replace('+', " ");
    let decoded = urlencoding::decode(&unplussed)
        .map_err(|e| Error::Extraction(format!("bad url encoding: {}", e)))?;

    let body = match routing_prefix() {
        Some(prefix) => prefix.replacen(&decoded, 1, ""),
        None => Cow::Borrowed(decoded.as_ref()),
    };
    let Some(start) = body.find('{') else {
        return Ok(Extraction::NotAModel);
    };

    let raw_model = Deserializer::from_str(&body[start..])
        .into_iter::<RawModel>()
        .next()
        .ok_or_else(|| Error::Extraction("empty payload".into()))?
        .map_err(|e| Error::Extraction(e.to_string()))?;

    Ok(Extraction::Model(raw_model.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::model::{HD_FLAG, VS_AWAY};

    fn encode(json: &str) -> String {
        format!("20 0 12345 0 0 {}", urlencoding::encode(json))
    }

    #[test]
    fn test_extract_model() {
        let raw = encode(
            r#"{"lv":4,"nm":"alice","pid":1,"sid":99,"uid":42,"vs":2,"u":{"camserv":712},"m":{"flags":1024}}"#,
        );
        let Extraction::Model(model) = extract_model(&raw).unwrap() else {
            panic!("expected a model");
        };
        assert_eq!(model.uid, 42);
        assert_eq!(model.name, "alice");
        assert_eq!(model.visibility, VS_AWAY);
        assert_eq!(model.camserv, 712);
        assert_eq!(model.flags, HD_FLAG);
        assert_eq!(model.session_id, 99);
        assert!(model.exists);
        assert!(model.is_hd());
    }

    #[test]
    fn test_plus_is_space() {
        let raw = "20 0 0 0 0 %7B%22lv%22:4,%22nm%22:%22bob+smith%22,%22uid%22:7%7D";
        let Extraction::Model(model) = extract_model(raw).unwrap() else {
            panic!("expected a model");
        };
        assert_eq!(model.name, "bob smith");
    }

    #[test]
    fn test_second_object_ignored() {
        let raw = encode(r#"{"lv":4,"nm":"alice","uid":1}{"lv":4,"nm":"carol","uid":2}"#);
        let Extraction::Model(model) = extract_model(&raw).unwrap() else {
            panic!("expected a model");
        };
        assert_eq!(model.name, "alice");
    }

    #[test]
    fn test_missing_name_means_not_existing() {
        let raw = encode(r#"{"lv":4,"uid":5}"#);
        let Extraction::Model(model) = extract_model(&raw).unwrap() else {
            panic!("expected a model");
        };
        assert!(!model.exists);
        assert_eq!(model.status(), "unknown model");
    }

    #[test]
    fn test_service_line_is_not_a_model() {
        assert_eq!(extract_model("0 0 0 0 0").unwrap(), Extraction::NotAModel);
        assert_eq!(
            extract_model("1 0 123 0 0 guest").unwrap(),
            Extraction::NotAModel
        );
    }

    #[test]
    fn test_broken_payloads() {
        assert!(matches!(
            extract_model(&encode(r#"{"lv":4,"nm":"#)),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            extract_model("20 0 0 0 0 %7B%FF%FE%7D"),
            Err(Error::Extraction(_))
        ));
    }
}
