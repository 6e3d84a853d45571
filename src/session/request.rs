//! Peer commands as a closed set
//!
//! Commands arrive as a name plus positional AMF arguments. They are parsed
//! once into [`Request`] so dispatch is a single exhaustive match.

use crate::amf::AmfObject;
use crate::protocol::constants::*;
use crate::protocol::message::Command;
use crate::registry::PublishMode;

/// Play start sentinel: continue from the live edge / current position
pub const PLAY_START_LIVE: i32 = -2;
/// Play length sentinel: no bound
pub const PLAY_LENGTH_UNBOUNDED: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect {
        transaction_id: f64,
        app: String,
        object: AmfObject,
    },
    CreateStream {
        transaction_id: f64,
    },
    Play {
        name: String,
        start: i32,
        length: i32,
        reset: bool,
    },
    DeleteStream {
        stream_id: u32,
    },
    CloseStream,
    Pause {
        paused: bool,
        position: u32,
    },
    Seek {
        position: u32,
    },
    Publish {
        name: String,
        mode: PublishMode,
    },
    Unpublish,
    /// Known command with unusable arguments
    Malformed {
        command: String,
        reason: &'static str,
    },
    /// Anything outside the vocabulary (FCPublish, releaseStream, ...)
    Other {
        command: String,
    },
}

impl Request {
    pub fn parse(cmd: &Command) -> Self {
        let malformed = |reason| Request::Malformed {
            command: cmd.name.clone(),
            reason,
        };
        match cmd.name.as_str() {
            CMD_CONNECT => {
                let object = cmd.object.as_object().cloned().unwrap_or_default();
                let app = object
                    .get("app")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .trim_end_matches('/')
                    .to_string();
                Request::Connect {
                    transaction_id: cmd.transaction_id,
                    app,
                    object,
                }
            }
            CMD_CREATE_STREAM => Request::CreateStream {
                transaction_id: cmd.transaction_id,
            },
            CMD_PLAY => match cmd.arg_str(0) {
                Some(name) => Request::Play {
                    name: name.to_string(),
                    start: cmd.arg_number(1).map(|n| n as i32).unwrap_or(PLAY_START_LIVE),
                    length: cmd.arg_number(2).map(|n| n as i32).unwrap_or(PLAY_LENGTH_UNBOUNDED),
                    reset: cmd.arg_bool(3).unwrap_or(true),
                },
                None => malformed("missing stream name"),
            },
            CMD_DELETE_STREAM => Request::DeleteStream {
                stream_id: cmd.arg_number(0).unwrap_or(0.0) as u32,
            },
            CMD_CLOSE_STREAM => Request::CloseStream,
            CMD_PAUSE => match cmd.arg_bool(0) {
                Some(paused) => Request::Pause {
                    paused,
                    position: cmd.arg_number(1).unwrap_or(0.0).max(0.0) as u32,
                },
                None => malformed("missing pause flag"),
            },
            CMD_SEEK => match cmd.arg_number(0) {
                Some(position) => Request::Seek {
                    position: position.max(0.0) as u32,
                },
                None => malformed("missing seek position"),
            },
            CMD_PUBLISH if cmd.args.len() > 1 => match cmd.arg_str(0) {
                Some(name) => Request::Publish {
                    name: name.to_string(),
                    mode: PublishMode::parse(cmd.arg_str(1).unwrap_or("live")),
                },
                None => malformed("missing stream name"),
            },
            CMD_PUBLISH => match cmd.arg_bool(0) {
                Some(false) => Request::Unpublish,
                _ => malformed("single-argument publish must be false"),
            },
            other => Request::Other {
                command: other.to_string(),
            },
        }
    }
}
