//! Decoded AMF0 values

use std::collections::HashMap;

/// One AMF0 value; object-like variants share the property map type
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    #[default]
    Null,
    Undefined,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Strict (dense) array
    Array(Vec<AmfValue>),
    Object(HashMap<String, AmfValue>),
    /// Associative array, read like an object
    EcmaArray(HashMap<String, AmfValue>),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        if let AmfValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        if let AmfValue::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// Properties of an object or ECMA array
    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(props) | AmfValue::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object().and_then(|props| props.get(key))
    }

    /// String property, e.g. `code` of an `onStatus` info object
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AmfValue::as_str)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AmfValue {
                fn from(v: $ty) -> Self {
                    AmfValue::Number(v as f64)
                }
            }
        )*
    };
}

number_from!(f64, u32, u64, i32);

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_owned())
    }
}
