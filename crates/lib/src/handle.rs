//! Plugin handle: a session's attachment to one gateway plugin.

use crate::error::GatewayError;
use crate::gateway::protocol::{AckMsg, Candidate, EventMsg, Jsep, Message, Request, SuccessMsg};
use crate::gateway::{lock, ReplyPhase};
use crate::session::Session;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, Weak};
use tokio::sync::mpsc;

pub struct Handle {
    id: u64,
    plugin: String,
    session: Weak<Session>,
    events_tx: mpsc::Sender<Message>,
    events_rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .finish()
    }
}

/// Serialize a request body; `null` means "no body".
fn body_value(verb: &'static str, body: impl Serialize) -> Result<Option<Value>, GatewayError> {
    let value =
        serde_json::to_value(body).map_err(|source| GatewayError::Encode { verb, source })?;
    Ok((!value.is_null()).then_some(value))
}

impl Handle {
    pub(crate) fn new(
        id: u64,
        plugin: String,
        session: Weak<Session>,
        event_capacity: usize,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        Self {
            id,
            plugin,
            session,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Plugin this handle was attached to.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Pushes for this handle (`event`, `webrtcup`, `media`, `slowlink`, `hangup`, ...).
    /// Returns the receiver once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<Message>> {
        lock(&self.events_rx).take()
    }

    pub(crate) fn events_sender(&self) -> mpsc::Sender<Message> {
        self.events_tx.clone()
    }

    async fn send(&self, req: Request, phase: ReplyPhase) -> Result<Message, GatewayError> {
        let session = self.session.upgrade().ok_or(GatewayError::Closed)?;
        session.request(req.with_handle(self.id), phase).await
    }

    /// Synchronous plugin request; the plugin answers with `success` carrying `plugindata`.
    pub async fn request(&self, body: impl Serialize) -> Result<SuccessMsg, GatewayError> {
        let mut req = Request::new("message");
        if let Some(body) = body_value("message", body)? {
            req = req.field("body", body);
        }
        match self.send(req, ReplyPhase::Single).await? {
            Message::Success(success) => Ok(success),
            Message::Error(e) => Err(e.into()),
            _ => Err(GatewayError::Unexpected { verb: "message" }),
        }
    }

    /// Asynchronous plugin message: waits past the `ack` for the `event` carrying the result.
    pub async fn message(
        &self,
        body: impl Serialize,
        jsep: Option<Jsep>,
    ) -> Result<EventMsg, GatewayError> {
        let mut req = Request::new("message");
        if let Some(body) = body_value("message", body)? {
            req = req.field("body", body);
        }
        if let Some(jsep) = jsep {
            let jsep = serde_json::to_value(jsep).map_err(|source| GatewayError::Encode {
                verb: "message",
                source,
            })?;
            req = req.field("jsep", jsep);
        }
        match self.send(req, ReplyPhase::Two).await? {
            Message::Event(event) => Ok(event),
            Message::Error(e) => Err(e.into()),
            _ => Err(GatewayError::Unexpected { verb: "message" }),
        }
    }

    /// Trickle one ICE candidate (or the `completed` marker).
    pub async fn trickle(&self, candidate: Candidate) -> Result<AckMsg, GatewayError> {
        let candidate = serde_json::to_value(candidate).map_err(|source| GatewayError::Encode {
            verb: "trickle",
            source,
        })?;
        self.send_trickle(Request::new("trickle").field("candidate", candidate))
            .await
    }

    pub async fn trickle_many(&self, candidates: &[Candidate]) -> Result<AckMsg, GatewayError> {
        let candidates = serde_json::to_value(candidates).map_err(|source| {
            GatewayError::Encode {
                verb: "trickle",
                source,
            }
        })?;
        self.send_trickle(Request::new("trickle").field("candidates", candidates))
            .await
    }

    async fn send_trickle(&self, req: Request) -> Result<AckMsg, GatewayError> {
        match self.send(req, ReplyPhase::Single).await? {
            Message::Ack(ack) => Ok(ack),
            Message::Error(e) => Err(e.into()),
            _ => Err(GatewayError::Unexpected { verb: "trickle" }),
        }
    }

    /// Detach from the plugin; on confirmation the handle is removed from its session.
    pub async fn detach(&self) -> Result<AckMsg, GatewayError> {
        let ack = match self.send(Request::new("detach"), ReplyPhase::Single).await? {
            Message::Ack(ack) => ack,
            Message::Success(_) => AckMsg::default(),
            Message::Error(e) => return Err(e.into()),
            _ => return Err(GatewayError::Unexpected { verb: "detach" }),
        };
        if let Some(session) = self.session.upgrade() {
            session.remove_handle(self.id);
        }
        log::info!("handle {} ({}) detached", self.id, self.plugin);
        Ok(ack)
    }
}
