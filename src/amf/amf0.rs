//! AMF0 wire format for command messages
//!
//! ```text
//! 0x00 number     f64 BE
//! 0x01 boolean    u8
//! 0x02 string     u16 length + UTF-8
//! 0x03 object     (u16 key + value)* then 00 00 09
//! 0x05 null
//! 0x06 undefined
//! 0x08 ecma array u32 count hint + object body
//! 0x0A strict     u32 count + values
//! 0x0C long str   u32 length + UTF-8
//! ```
//!
//! Relays pad `loginResult` with markers a player has no use for. Their
//! payload sizes are not known here, so decoding stops at the first one and
//! keeps the values read before it.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

const NUMBER: u8 = 0x00;
const BOOLEAN: u8 = 0x01;
const STRING: u8 = 0x02;
const OBJECT: u8 = 0x03;
const NULL: u8 = 0x05;
const UNDEFINED: u8 = 0x06;
const ECMA_ARRAY: u8 = 0x08;
const OBJECT_END: u8 = 0x09;
const STRICT_ARRAY: u8 = 0x0A;
const LONG_STRING: u8 = 0x0C;

const MAX_DEPTH: usize = 64;

/// Encode values back to back, as a command payload
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut out = BytesMut::with_capacity(128);
    for value in values {
        write_value(&mut out, value);
    }
    out.freeze()
}

/// Decode a whole payload, up to the first unknown marker
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    Reader::new(data).read_all()
}

fn write_value(out: &mut BytesMut, value: &AmfValue) {
    match value {
        AmfValue::Number(n) => {
            out.put_u8(NUMBER);
            out.put_f64(*n);
        }
        AmfValue::Boolean(b) => {
            out.put_u8(BOOLEAN);
            out.put_u8(*b as u8);
        }
        AmfValue::String(s) if s.len() > u16::MAX as usize => {
            out.put_u8(LONG_STRING);
            out.put_u32(s.len() as u32);
            out.put_slice(s.as_bytes());
        }
        AmfValue::String(s) => {
            out.put_u8(STRING);
            write_short(out, s);
        }
        AmfValue::Object(props) => {
            out.put_u8(OBJECT);
            write_props(out, props);
        }
        AmfValue::EcmaArray(props) => {
            out.put_u8(ECMA_ARRAY);
            out.put_u32(props.len() as u32);
            write_props(out, props);
        }
        AmfValue::Array(items) => {
            out.put_u8(STRICT_ARRAY);
            out.put_u32(items.len() as u32);
            items.iter().for_each(|item| write_value(out, item));
        }
        AmfValue::Null => out.put_u8(NULL),
        AmfValue::Undefined => out.put_u8(UNDEFINED),
    }
}

/// u16 length prefix; keys longer than that are cut
fn write_short(out: &mut BytesMut, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
    out.put_u16(bytes.len() as u16);
    out.put_slice(bytes);
}

fn write_props(out: &mut BytesMut, props: &HashMap<String, AmfValue>) {
    for (key, value) in props {
        write_short(out, key);
        write_value(out, value);
    }
    out.put_u16(0);
    out.put_u8(OBJECT_END);
}

/// Cursor over a payload
struct Reader<'a> {
    data: &'a [u8],
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, depth: 0 }
    }

    fn read_all(mut self) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while !self.data.is_empty() {
            match self.value() {
                Ok(value) => values.push(value),
                Err(AmfError::UnknownMarker(marker)) => {
                    tracing::trace!(marker, decoded = values.len(), "AMF0 decoding stopped");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AmfError> {
        if self.data.len() < n {
            return Err(AmfError::UnexpectedEof);
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, AmfError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, AmfError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, AmfError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, AmfError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_be_bytes(raw))
    }

    fn text(&mut self, len: usize) -> Result<String, AmfError> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| AmfError::InvalidUtf8)
    }

    fn value(&mut self) -> Result<AmfValue, AmfError> {
        if self.depth >= MAX_DEPTH {
            return Err(AmfError::NestingTooDeep);
        }
        self.depth += 1;
        let value = self.value_inner();
        self.depth -= 1;
        value
    }

    fn value_inner(&mut self) -> Result<AmfValue, AmfError> {
        let marker = self.u8()?;
        let value = match marker {
            NUMBER => AmfValue::Number(self.f64()?),
            BOOLEAN => AmfValue::Boolean(self.u8()? != 0),
            STRING => {
                let len = self.u16()? as usize;
                AmfValue::String(self.text(len)?)
            }
            LONG_STRING => {
                let len = self.u32()? as usize;
                AmfValue::String(self.text(len)?)
            }
            OBJECT => AmfValue::Object(self.props()?),
            ECMA_ARRAY => {
                // Count is a hint; the end marker is authoritative
                self.u32()?;
                AmfValue::EcmaArray(self.props()?)
            }
            STRICT_ARRAY => {
                let count = self.u32()? as usize;
                let mut items = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    items.push(self.value()?);
                }
                AmfValue::Array(items)
            }
            NULL => AmfValue::Null,
            UNDEFINED => AmfValue::Undefined,
            other => return Err(AmfError::UnknownMarker(other)),
        };
        Ok(value)
    }

    fn props(&mut self) -> Result<HashMap<String, AmfValue>, AmfError> {
        let mut props = HashMap::new();
        loop {
            let len = self.u16()? as usize;
            if len == 0 {
                break;
            }
            let key = self.text(len)?;
            let value = self.value()?;
            props.insert(key, value);
        }

        // Some encoders leave the end marker out
        if self.data.first() == Some(&OBJECT_END) {
            self.take(1)?;
        }
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_command_decodes() {
        let values = vec![
            AmfValue::from("_result"),
            AmfValue::Number(120781448.0),
            AmfValue::Null,
            AmfValue::from("8f2d"),
        ];
        assert_eq!(decode_all(&encode_all(&values)).unwrap(), values);
    }

    #[test]
    fn test_transaction_id_follows_command_name() {
        let encoded = encode_all(&[AmfValue::from("loginResult"), AmfValue::Number(42.0)]);
        // marker + u16 length + name + number marker
        let offset = 1 + 2 + "loginResult".len() + 1;
        assert_eq!(offset, 15);
        assert_eq!(encoded[offset - 1], NUMBER);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&encoded[offset..offset + 8]);
        assert_eq!(f64::from_be_bytes(raw), 42.0);
    }

    #[test]
    fn test_on_status_info_object() {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::from("status"));
        info.insert("code".to_string(), AmfValue::from("NetStream.Play.Start"));

        let encoded = encode_all(&[
            AmfValue::from("onStatus"),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::Object(info),
        ]);
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[3].get_string("code"), Some("NetStream.Play.Start"));
    }

    #[test]
    fn test_long_string_marker() {
        let long = "x".repeat(70_000);
        let encoded = encode_all(&[AmfValue::String(long.clone())]);
        assert_eq!(encoded[0], LONG_STRING);
        assert_eq!(decode_all(&encoded).unwrap(), vec![AmfValue::String(long)]);
    }

    #[test]
    fn test_truncated_number() {
        assert!(matches!(
            decode_all(&[0x00, 0x40, 0x45]),
            Err(AmfError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_unknown_marker_stops_decoding() {
        let mut data = encode_all(&[AmfValue::from("onStatus"), AmfValue::Number(0.0)]).to_vec();
        // Date: f64 millis + i16 zone, whose bytes must not be read as values
        data.push(0x0B);
        data.extend_from_slice(&[0x02, 0x00, 0x01, b'x', 0, 0, 0, 0, 0, 0]);

        assert_eq!(
            decode_all(&data).unwrap(),
            vec![AmfValue::from("onStatus"), AmfValue::Number(0.0)]
        );
        assert!(decode_all(&[0xFF, 0x00]).unwrap().is_empty());
    }

    #[test]
    fn test_unterminated_object() {
        // "a": null, then the empty key with no end marker
        let data = [0x03, 0x00, 0x01, b'a', 0x05, 0x00, 0x00];
        let decoded = decode_all(&data).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].get("a"), Some(&AmfValue::Null));
    }

    #[test]
    fn test_depth_limit() {
        let mut value = AmfValue::Null;
        for _ in 0..70 {
            value = AmfValue::Array(vec![value]);
        }
        assert!(matches!(
            decode_all(&encode_all(&[value])),
            Err(AmfError::NestingTooDeep)
        ));
    }
}
