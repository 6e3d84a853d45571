//! AMF value types
//!
//! Objects keep their properties in insertion order. Flash clients do not
//! care, but recorded metadata is re-emitted byte-for-byte comparable and
//! status objects read naturally in packet captures.

/// Ordered property list used by AMF objects and ECMA arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    properties: Vec<(String, AmfValue)>,
}

impl AmfObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AmfValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a property, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AmfValue>) {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut AmfValue> {
        self.properties
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl<K: Into<String>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut obj = AmfObject::new();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

/// AMF0 value representation
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Null,
    Undefined,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(AmfObject),
    /// Associative array; metadata from most encoders arrives in this form
    EcmaArray(AmfObject),
    StrictArray(Vec<AmfValue>),
    /// Milliseconds since the Unix epoch
    Date(f64),
    Xml(String),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Property lookup on object-like values
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<i32> for AmfValue {
    fn from(v: i32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<u64> for AmfValue {
    fn from(v: u64) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}
