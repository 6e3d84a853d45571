//! Media container handling
//!
//! FLV tags carry recorded streams on disk and the sub-messages of RTMP
//! aggregate messages.

pub mod flv;

pub use flv::{FlvTag, FlvTagType};
