//! Janus wire protocol types: request envelope, inbound message shapes, and the decode table.
//!
//! Every frame is a JSON object tagged by its `janus` field. Inbound frames are decoded in two
//! steps: the common [`Envelope`] (discriminator plus routing ids) first, then the full shape
//! registered for that discriminator in the decode table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Common fields of every inbound frame, used for routing before the full decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    /// Discriminator, e.g. `success`, `event`, `webrtcup`.
    #[serde(rename = "janus")]
    pub kind: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub session_id: Option<u64>,
    #[serde(default)]
    pub handle_id: Option<u64>,
    /// Push events name the originating handle as `sender` instead of `handle_id`.
    #[serde(default)]
    pub sender: Option<u64>,
}

impl Envelope {
    /// Correlation id of the frame; an empty string counts as absent.
    pub fn transaction(&self) -> Option<&str> {
        self.transaction.as_deref().filter(|t| !t.is_empty())
    }

    /// Handle the frame is scoped to (`handle_id`, falling back to `sender`).
    pub fn handle(&self) -> Option<u64> {
        self.handle_id.or(self.sender)
    }
}

/// Plugin name and opaque payload carried by `event` and plugin `success` replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// `success`: reply to create/attach (new id in `data`) or to a synchronous plugin request (`plugindata`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugindata: Option<PluginData>,
}

impl SuccessMsg {
    /// Id of the session or handle the server just created (`data.id`).
    pub fn created_id(&self) -> Option<u64> {
        self.data.as_ref()?.get("id")?.as_u64()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i32,
    #[serde(default)]
    pub reason: String,
}

/// `error`: the request was rejected by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub error: ErrorData,
}

/// `ack`: request accepted, no payload. Provisional for two-phase requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// `event`: plugin-specific payload, optionally with an SDP offer/answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMsg {
    #[serde(default)]
    pub plugindata: PluginData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Jsep>,
}

/// Plugin entry in the `server_info` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version_string: String,
    #[serde(default)]
    pub version: u64,
}

/// `server_info`: reply to `info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoMsg {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub version_string: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub data_channels: bool,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(default, rename = "ice-tcp")]
    pub ice_tcp: bool,
    #[serde(default)]
    pub transports: BTreeMap<String, PluginInfo>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginInfo>,
}

/// `webrtcup`: the PeerConnection of a handle is up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebrtcUpMsg {}

/// `media`: the gateway started or stopped receiving a kind of media.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMsg {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub receiving: bool,
}

/// `slowlink`: link-quality warning for a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowLinkMsg {
    #[serde(default)]
    pub uplink: bool,
    #[serde(default, alias = "nacks")]
    pub lost: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

/// `hangup`: the PeerConnection of a handle was closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupMsg {
    #[serde(default)]
    pub reason: String,
}

/// `timeout`: the server expired the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMsg {}

/// `detached`: the server detached a handle on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedMsg {}

/// Every inbound message shape, one variant per discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Success(SuccessMsg),
    Error(ErrorMsg),
    Ack(AckMsg),
    Event(EventMsg),
    ServerInfo(InfoMsg),
    WebrtcUp(WebrtcUpMsg),
    Media(MediaMsg),
    SlowLink(SlowLinkMsg),
    Hangup(HangupMsg),
    Timeout(TimeoutMsg),
    Detached(DetachedMsg),
}

impl Message {
    /// Wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Success(_) => "success",
            Message::Error(_) => "error",
            Message::Ack(_) => "ack",
            Message::Event(_) => "event",
            Message::ServerInfo(_) => "server_info",
            Message::WebrtcUp(_) => "webrtcup",
            Message::Media(_) => "media",
            Message::SlowLink(_) => "slowlink",
            Message::Hangup(_) => "hangup",
            Message::Timeout(_) => "timeout",
            Message::Detached(_) => "detached",
        }
    }

    /// Event-class messages close the first phase of their transaction.
    pub fn is_event(&self) -> bool {
        matches!(self, Message::Event(_))
    }
}

/// Decoder from a parsed frame to one [`Message`] variant.
pub type Decoder = fn(Value) -> Result<Message, serde_json::Error>;

macro_rules! decoders {
    ($($name:ident => $variant:ident),* $(,)?) => {
        $(
            fn $name(value: Value) -> Result<Message, serde_json::Error> {
                serde_json::from_value(value).map(Message::$variant)
            }
        )*
    };
}

decoders! {
    decode_success => Success,
    decode_error => Error,
    decode_ack => Ack,
    decode_event => Event,
    decode_server_info => ServerInfo,
    decode_webrtcup => WebrtcUp,
    decode_media => Media,
    decode_slowlink => SlowLink,
    decode_hangup => Hangup,
    decode_timeout => Timeout,
    decode_detached => Detached,
}

/// Discriminator → decoder. Anything absent here is unrecognized.
static REGISTRY: &[(&str, Decoder)] = &[
    ("success", decode_success),
    ("error", decode_error),
    ("ack", decode_ack),
    ("event", decode_event),
    ("server_info", decode_server_info),
    ("webrtcup", decode_webrtcup),
    ("media", decode_media),
    ("slowlink", decode_slowlink),
    ("hangup", decode_hangup),
    ("timeout", decode_timeout),
    ("detached", decode_detached),
];

/// Look up the decoder registered for a discriminator.
pub fn decoder_for(kind: &str) -> Option<Decoder> {
    REGISTRY
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, decoder)| *decoder)
}

/// A fully decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub envelope: Envelope,
    pub message: Message,
}

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not a JSON object with a `janus` discriminator; the connection is presumed broken.
    #[error("frame is not a janus envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// Valid envelope, but nothing is registered for the discriminator.
    #[error("unrecognized message type '{0}'")]
    Unrecognized(String),
    /// Registered discriminator whose body does not match its shape.
    #[error("malformed '{kind}' message: {source}")]
    Body {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FrameError {
    /// Envelope failures end the dispatch loop; the others only discard the frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Envelope(_))
    }
}

/// Decode one inbound frame: envelope first, then the registered shape.
pub fn decode_frame(bytes: &[u8]) -> Result<Inbound, FrameError> {
    let value: Value = serde_json::from_slice(bytes).map_err(FrameError::Envelope)?;
    let envelope = Envelope::deserialize(&value).map_err(FrameError::Envelope)?;
    let decoder = decoder_for(&envelope.kind)
        .ok_or_else(|| FrameError::Unrecognized(envelope.kind.clone()))?;
    let message = decoder(value).map_err(|source| FrameError::Body {
        kind: envelope.kind.clone(),
        source,
    })?;
    Ok(Inbound { envelope, message })
}

/// Outbound request. Routing ids are filled in as it travels Handle → Session → Gateway.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    janus: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle_id: Option<u64>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Request {
    pub fn new(verb: &'static str) -> Self {
        Self {
            janus: verb,
            transaction: None,
            session_id: None,
            handle_id: None,
            fields: Map::new(),
        }
    }

    /// Request verb (`create`, `attach`, `message`, ...).
    pub fn verb(&self) -> &'static str {
        self.janus
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn handle_id(&self) -> Option<u64> {
        self.handle_id
    }

    pub(crate) fn with_session(mut self, id: u64) -> Self {
        self.session_id = Some(id);
        self
    }

    pub(crate) fn with_handle(mut self, id: u64) -> Self {
        self.handle_id = Some(id);
        self
    }

    pub(crate) fn with_transaction(mut self, transaction: String) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    Offer,
    Answer,
}

/// SDP offer/answer exchanged with `message` requests and their `event` replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: JsepType,
    pub sdp: String,
    /// `Some(false)` tells the gateway no trickle candidates will follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trickle: Option<bool>,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Offer,
            sdp: sdp.into(),
            trickle: None,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Answer,
            sdp: sdp.into(),
            trickle: None,
        }
    }
}

/// A single trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// Payload of a `trickle` request: a candidate, or the end-of-candidates marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Candidate {
    Ice(IceCandidate),
    Completed { completed: bool },
}

impl Candidate {
    /// `{"completed": true}`: all candidates have been sent.
    pub fn completed() -> Self {
        Candidate::Completed { completed: true }
    }
}

impl From<IceCandidate> for Candidate {
    fn from(candidate: IceCandidate) -> Self {
        Candidate::Ice(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_success_with_created_id() {
        let frame = br#"{"janus":"success","transaction":"t1","data":{"id":42}}"#;
        let inbound = decode_frame(frame).expect("decode");
        assert_eq!(inbound.envelope.transaction(), Some("t1"));
        let Message::Success(success) = inbound.message else {
            panic!("expected success");
        };
        assert_eq!(success.created_id(), Some(42));
    }

    #[test]
    fn decode_event_with_jsep_answer() {
        let frame = json!({
            "janus": "event",
            "transaction": "t3",
            "session_id": 42,
            "sender": 7,
            "plugindata": { "plugin": "janus.plugin.videoroom", "data": { "videoroom": "event" } },
            "jsep": { "type": "answer", "sdp": "v=0" }
        });
        let inbound = decode_frame(frame.to_string().as_bytes()).expect("decode");
        assert_eq!(inbound.envelope.session_id, Some(42));
        assert_eq!(inbound.envelope.handle(), Some(7));
        let Message::Event(event) = inbound.message else {
            panic!("expected event");
        };
        assert_eq!(event.plugindata.plugin, "janus.plugin.videoroom");
        assert_eq!(event.jsep, Some(Jsep::answer("v=0")));
    }

    #[test]
    fn decode_error_reason() {
        let frame = br#"{"janus":"error","transaction":"t","error":{"code":458,"reason":"No such session"}}"#;
        let inbound = decode_frame(frame).expect("decode");
        assert_eq!(
            inbound.message,
            Message::Error(ErrorMsg {
                error: ErrorData {
                    code: 458,
                    reason: "No such session".to_string()
                }
            })
        );
    }

    #[test]
    fn decode_push_notifications() {
        let media = decode_frame(br#"{"janus":"media","session_id":1,"sender":2,"type":"audio","receiving":true}"#)
            .expect("media");
        assert_eq!(
            media.message,
            Message::Media(MediaMsg {
                kind: "audio".to_string(),
                receiving: true
            })
        );
        let slow = decode_frame(br#"{"janus":"slowlink","session_id":1,"sender":2,"uplink":true,"nacks":12}"#)
            .expect("slowlink");
        let Message::SlowLink(slow) = slow.message else {
            panic!("expected slowlink");
        };
        assert!(slow.uplink);
        assert_eq!(slow.lost, 12);
        let up = decode_frame(br#"{"janus":"webrtcup","session_id":1,"sender":2}"#).expect("webrtcup");
        assert_eq!(up.message.kind(), "webrtcup");
        let hangup = decode_frame(br#"{"janus":"hangup","session_id":1,"sender":2,"reason":"DTLS alert"}"#)
            .expect("hangup");
        assert_eq!(
            hangup.message,
            Message::Hangup(HangupMsg {
                reason: "DTLS alert".to_string()
            })
        );
    }

    #[test]
    fn decode_server_info_plugins() {
        let frame = json!({
            "janus": "server_info",
            "transaction": "i",
            "name": "Janus WebRTC Server",
            "version": 1203,
            "version_string": "1.2.3",
            "ice-tcp": true,
            "plugins": { "janus.plugin.echotest": { "name": "JANUS EchoTest plugin", "version": 7 } }
        });
        let inbound = decode_frame(frame.to_string().as_bytes()).expect("decode");
        let Message::ServerInfo(info) = inbound.message else {
            panic!("expected server_info");
        };
        assert_eq!(info.version_string, "1.2.3");
        assert!(info.ice_tcp);
        assert_eq!(info.plugins["janus.plugin.echotest"].version, 7);
    }

    #[test]
    fn unknown_discriminator_is_unrecognized() {
        let err = decode_frame(br#"{"janus":"trickle","transaction":"x"}"#).expect_err("unrecognized");
        assert!(matches!(err, FrameError::Unrecognized(ref k) if k == "trickle"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn malformed_body_is_not_fatal() {
        let err = decode_frame(br#"{"janus":"error","transaction":"x","error":"boom"}"#).expect_err("body");
        assert!(matches!(err, FrameError::Body { ref kind, .. } if kind == "error"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_discriminator_is_fatal() {
        let err = decode_frame(br#"{"transaction":"x"}"#).expect_err("envelope");
        assert!(err.is_fatal());
        let err = decode_frame(b"not json").expect_err("envelope");
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_transaction_counts_as_absent() {
        let inbound = decode_frame(br#"{"janus":"webrtcup","transaction":"","session_id":1,"handle_id":2}"#)
            .expect("decode");
        assert_eq!(inbound.envelope.transaction(), None);
        assert_eq!(inbound.envelope.handle(), Some(2));
    }

    #[test]
    fn request_encodes_routing_and_fields() {
        let req = Request::new("message")
            .field("body", json!({ "request": "join" }))
            .with_handle(7)
            .with_session(42)
            .with_transaction("abc".to_string());
        let value: Value = serde_json::from_str(&req.encode().expect("encode")).expect("json");
        assert_eq!(
            value,
            json!({
                "janus": "message",
                "transaction": "abc",
                "session_id": 42,
                "handle_id": 7,
                "body": { "request": "join" }
            })
        );
    }

    #[test]
    fn candidates_serialize_in_wire_shape() {
        let ice = Candidate::from(IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        });
        let value = serde_json::to_value(&ice).expect("encode");
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
        assert_eq!(
            serde_json::to_value(Candidate::completed()).expect("encode"),
            json!({ "completed": true })
        );
    }
}
