//! AMF0 (Action Message Format) support
//!
//! Commands and metadata travel as AMF0 value sequences. AMF3 payloads
//! (message types 15/17) carry a leading format byte followed by AMF0 for
//! everything this engine handles, so only AMF0 is implemented.

pub mod amf0;
pub mod value;

pub use amf0::{decode_values, encode_values, Amf0Reader, Amf0Writer};
pub use value::{AmfObject, AmfValue};
