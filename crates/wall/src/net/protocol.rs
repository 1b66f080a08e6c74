use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::Point;

pub const DEFAULT_PORT: u16 = 7777;
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

pub mod kind {
    pub const CLIENT_START: &str = "client-start";
    pub const TIME: &str = "time";
    pub const LOAD_MODULE: &str = "loadModule";
    pub const STATE: &str = "state";
    pub const STATE_CLOSED: &str = "state-closed";
    pub const RECORD_ERROR: &str = "record-error";
    pub const TAKE_SNAPSHOT: &str = "takeSnapshot";
    pub const TAKE_SNAPSHOT_RES: &str = "takeSnapshotRes";
    pub const PEER_REGISTER: &str = "peer-register";
    pub const PEER_OFFER: &str = "peer-offer";
    pub const PEER_ANSWER: &str = "peer-answer";
    pub const PEER_ICE_CANDIDATE: &str = "peer-icecandidate";
    pub const NEW_CLIENT: &str = "new-client";
    pub const LOST_CLIENT: &str = "lost-client";
}

pub fn scoped_kind(module_id: &str, kind: &str) -> String {
    format!("{module_id}:{kind}")
}

/// Splits `"<module id>:<type>"`; framework messages have no module prefix.
pub fn split_scoped(kind: &str) -> Option<(&str, &str)> {
    kind.split_once(':')
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("serialization failed: {0}")]
    Serialize(serde_json::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(serde_json::Error),
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}

/// One message on the wire, sent as a single line of JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn encode<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, FrameError> {
        let payload = serde_json::to_value(payload).map_err(FrameError::Serialize)?;
        Ok(Self::new(kind, payload))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        T::deserialize(&self.payload).map_err(|source| FrameError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        let data = serde_json::to_vec(self).map_err(FrameError::Serialize)?;
        if data.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(data.len()));
        }
        Ok(data)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(data.len()));
        }
        serde_json::from_slice(data).map_err(FrameError::Deserialize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStart {
    #[serde(default)]
    pub rect: Option<String>,
    #[serde(default)]
    pub offset: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSync {
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub credit: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadModule {
    pub module: ModuleSpec,
    pub id: String,
    pub deadline: f64,
    #[serde(default)]
    pub geo: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub time: f64,
    pub data: Value,
}

/// module id -> stream name -> latest entry.
pub type StateFlush = BTreeMap<String, BTreeMap<String, StateEntry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeSnapshot {
    pub client: String,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeSnapshotRes {
    pub client: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRegister {
    pub id: String,
    #[serde(default)]
    pub rect: Option<String>,
}

/// Only the routing field of a peer signaling payload; the rest is relayed untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PeerRoute {
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_line_format() {
        let frame = Frame::encode(kind::TIME, &TimeSync { time: 1234.5 }).unwrap();
        let bytes = frame.serialize().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();

        assert_eq!(text, r#"{"type":"time","payload":{"time":1234.5}}"#);
        assert_eq!(Frame::deserialize(&bytes).unwrap(), frame);
    }

    #[test]
    fn malformed_payload_reports_kind() {
        let frame = Frame::new(kind::CLIENT_START, json!({ "rect": 5 }));
        let err = frame.decode::<ClientStart>().unwrap_err();
        assert!(err.to_string().contains("client-start"));
    }

    #[test]
    fn scoped_kinds_split_on_first_colon() {
        let kind = scoped_kind("3-1000", "ping");
        assert_eq!(kind, "3-1000:ping");
        assert_eq!(split_scoped(&kind), Some(("3-1000", "ping")));
        assert_eq!(split_scoped("state"), None);
    }

    #[test]
    fn snapshot_response_omits_absent_fields() {
        let res = TakeSnapshotRes {
            client: "0,0,10,10".into(),
            id: 7,
            data: None,
            width: None,
            error: Some("unsupported".into()),
        };
        let value = serde_json::to_value(&res).unwrap();
        assert_eq!(
            value,
            json!({ "client": "0,0,10,10", "id": 7, "error": "unsupported" })
        );
    }
}
