//! AMF0 encoder and decoder
//!
//! Type markers handled:
//! ```text
//! 0x00 Number      0x01 Boolean     0x02 String     0x03 Object
//! 0x05 Null        0x06 Undefined   0x07 Reference  0x08 ECMA Array
//! 0x09 Object End  0x0A Strict Arr  0x0B Date       0x0C Long String
//! 0x0D Unsupported 0x0F XML         0x10 Typed Obj  0x11 AVM+ switch
//! ```
//! Typed objects decode as plain objects (the class name is dropped) and an
//! AVM+ switch decodes as `Undefined`; neither appears in the command set
//! this engine serves.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const NUMBER: u8 = 0x00;
const BOOLEAN: u8 = 0x01;
const STRING: u8 = 0x02;
const OBJECT: u8 = 0x03;
const NULL: u8 = 0x05;
const UNDEFINED: u8 = 0x06;
const REFERENCE: u8 = 0x07;
const ECMA_ARRAY: u8 = 0x08;
const OBJECT_END: u8 = 0x09;
const STRICT_ARRAY: u8 = 0x0A;
const DATE: u8 = 0x0B;
const LONG_STRING: u8 = 0x0C;
const UNSUPPORTED: u8 = 0x0D;
const XML: u8 = 0x0F;
const TYPED_OBJECT: u8 = 0x10;
const AVMPLUS: u8 = 0x11;

const MAX_DEPTH: usize = 64;

/// Streaming AMF0 reader over a payload
///
/// Keeps the complex-value table so `Reference` markers resolve within one
/// message.
pub struct Amf0Reader {
    buf: Bytes,
    references: Vec<AmfValue>,
    depth: usize,
}

impl Amf0Reader {
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            references: Vec::new(),
            depth: 0,
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> Bytes {
        self.buf.clone()
    }

    pub fn read(&mut self) -> Result<AmfValue, AmfError> {
        if !self.buf.has_remaining() {
            return Err(AmfError::UnexpectedEof);
        }
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(AmfError::NestingTooDeep);
        }
        let marker = self.buf.get_u8();
        let value = self.read_marked(marker);
        self.depth -= 1;
        value
    }

    /// Read values until the payload is exhausted
    ///
    /// A truncated trailing value ends the list instead of failing; several
    /// encoders pad command payloads.
    pub fn read_all(&mut self) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while self.has_remaining() {
            match self.read() {
                Ok(v) => values.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    fn read_marked(&mut self, marker: u8) -> Result<AmfValue, AmfError> {
        match marker {
            NUMBER => Ok(AmfValue::Number(self.read_f64()?)),
            BOOLEAN => {
                self.need(1)?;
                Ok(AmfValue::Boolean(self.buf.get_u8() != 0))
            }
            STRING => Ok(AmfValue::String(self.read_utf8()?)),
            LONG_STRING => Ok(AmfValue::String(self.read_utf8_long()?)),
            OBJECT => {
                let slot = self.reserve_reference();
                let obj = AmfValue::Object(self.read_properties()?);
                self.references[slot] = obj.clone();
                Ok(obj)
            }
            TYPED_OBJECT => {
                let _class_name = self.read_utf8()?;
                let slot = self.reserve_reference();
                let obj = AmfValue::Object(self.read_properties()?);
                self.references[slot] = obj.clone();
                Ok(obj)
            }
            ECMA_ARRAY => {
                self.need(4)?;
                let _count_hint = self.buf.get_u32();
                let slot = self.reserve_reference();
                let arr = AmfValue::EcmaArray(self.read_properties()?);
                self.references[slot] = arr.clone();
                Ok(arr)
            }
            STRICT_ARRAY => {
                self.need(4)?;
                let count = self.buf.get_u32() as usize;
                let slot = self.reserve_reference();
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read()?);
                }
                let arr = AmfValue::StrictArray(items);
                self.references[slot] = arr.clone();
                Ok(arr)
            }
            DATE => {
                let millis = self.read_f64()?;
                self.need(2)?;
                let _tz = self.buf.get_i16();
                Ok(AmfValue::Date(millis))
            }
            REFERENCE => {
                self.need(2)?;
                let idx = self.buf.get_u16();
                self.references
                    .get(idx as usize)
                    .cloned()
                    .ok_or(AmfError::InvalidReference(idx))
            }
            XML => Ok(AmfValue::Xml(self.read_utf8_long()?)),
            NULL => Ok(AmfValue::Null),
            UNDEFINED | UNSUPPORTED | AVMPLUS => Ok(AmfValue::Undefined),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    /// Key/value pairs up to the empty-key + 0x09 terminator
    ///
    /// A missing terminator at end of payload is tolerated.
    fn read_properties(&mut self) -> Result<AmfObject, AmfError> {
        let mut obj = AmfObject::new();
        loop {
            if self.buf.remaining() < 2 {
                break;
            }
            let key = self.read_utf8()?;
            if key.is_empty() {
                if self.buf.has_remaining() && self.buf[0] == OBJECT_END {
                    self.buf.advance(1);
                }
                break;
            }
            let value = self.read()?;
            obj.insert(key, value);
        }
        Ok(obj)
    }

    fn reserve_reference(&mut self) -> usize {
        self.references.push(AmfValue::Null);
        self.references.len() - 1
    }

    fn need(&self, n: usize) -> Result<(), AmfError> {
        if self.buf.remaining() < n {
            Err(AmfError::UnexpectedEof)
        } else {
            Ok(())
        }
    }

    fn read_f64(&mut self) -> Result<f64, AmfError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn read_utf8(&mut self) -> Result<String, AmfError> {
        self.need(2)?;
        let len = self.buf.get_u16() as usize;
        self.read_str(len)
    }

    fn read_utf8_long(&mut self) -> Result<String, AmfError> {
        self.need(4)?;
        let len = self.buf.get_u32() as usize;
        self.read_str(len)
    }

    fn read_str(&mut self, len: usize) -> Result<String, AmfError> {
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }
}

/// AMF0 writer accumulating into a growable buffer
#[derive(Default)]
pub struct Amf0Writer {
    buf: BytesMut,
}

impl Amf0Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn write(&mut self, value: &AmfValue) -> &mut Self {
        match value {
            AmfValue::Null => self.buf.put_u8(NULL),
            AmfValue::Undefined => self.buf.put_u8(UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) if s.len() > u16::MAX as usize => {
                self.buf.put_u8(LONG_STRING);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::String(s) => {
                self.buf.put_u8(STRING);
                self.put_key(s);
            }
            AmfValue::Object(obj) => {
                self.buf.put_u8(OBJECT);
                self.put_properties(obj);
            }
            AmfValue::EcmaArray(obj) => {
                self.buf.put_u8(ECMA_ARRAY);
                self.buf.put_u32(obj.len() as u32);
                self.put_properties(obj);
            }
            AmfValue::StrictArray(items) => {
                self.buf.put_u8(STRICT_ARRAY);
                self.buf.put_u32(items.len() as u32);
                for item in items {
                    self.write(item);
                }
            }
            AmfValue::Date(millis) => {
                self.buf.put_u8(DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
            AmfValue::Xml(s) => {
                self.buf.put_u8(XML);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
        }
        self
    }

    pub fn write_all<'a>(&mut self, values: impl IntoIterator<Item = &'a AmfValue>) -> &mut Self {
        for value in values {
            self.write(value);
        }
        self
    }

    /// Append bytes that are not AMF0 encoded, such as the AMF3 format byte
    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn put_properties(&mut self, obj: &AmfObject) {
        for (key, value) in obj.iter() {
            self.put_key(key);
            self.write(value);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(OBJECT_END);
    }

    fn put_key(&mut self, s: &str) {
        let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
    }
}

/// Encode a sequence of values into one payload
pub fn encode_values(values: &[AmfValue]) -> Bytes {
    Amf0Writer::new().write_all(values).finish()
}

/// Decode every value in a payload
pub fn decode_values(payload: Bytes) -> Result<Vec<AmfValue>, AmfError> {
    Amf0Reader::new(payload).read_all()
}
