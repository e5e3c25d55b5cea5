//! Server-confirmed signaling session and the plugin handles attached to it.
//!
//! A session exists in its gateway's registry from the `success` reply to `create` until the
//! gateway confirms `destroy`. Requests sent through a session carry its `session_id`.

use crate::error::GatewayError;
use crate::gateway::protocol::{AckMsg, Message, Request};
use crate::gateway::{lock, GatewayInner, ReplyPhase};
use crate::handle::Handle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Session id assigned by the gateway.
pub type SessionId = u64;

struct SessionState {
    handles: HashMap<u64, Arc<Handle>>,
    events: Option<mpsc::Receiver<Message>>,
}

pub struct Session {
    id: SessionId,
    gateway: Weak<GatewayInner>,
    state: Mutex<SessionState>,
    events_tx: mpsc::Sender<Message>,
    handle_event_capacity: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handles", &self.handle_ids())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        gateway: Weak<GatewayInner>,
        event_capacity: usize,
        handle_event_capacity: usize,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        Self {
            id,
            gateway,
            state: Mutex::new(SessionState {
                handles: HashMap::new(),
                events: Some(events_rx),
            }),
            events_tx,
            handle_event_capacity,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Attached handle by id.
    pub fn handle(&self, id: u64) -> Option<Arc<Handle>> {
        lock(&self.state).handles.get(&id).cloned()
    }

    pub fn handle_ids(&self) -> Vec<u64> {
        lock(&self.state).handles.keys().copied().collect()
    }

    /// Session-scoped pushes (e.g. `timeout`). Returns the receiver once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<Message>> {
        lock(&self.state).events.take()
    }

    pub(crate) fn events_sender(&self) -> mpsc::Sender<Message> {
        self.events_tx.clone()
    }

    pub(crate) fn remove_handle(&self, id: u64) -> bool {
        lock(&self.state).handles.remove(&id).is_some()
    }

    /// Send a request scoped to this session.
    pub(crate) async fn request(
        &self,
        req: Request,
        phase: ReplyPhase,
    ) -> Result<Message, GatewayError> {
        let gateway = self.gateway.upgrade().ok_or(GatewayError::Closed)?;
        gateway.request(req.with_session(self.id), phase).await
    }

    /// Attach to `plugin` (e.g. `janus.plugin.videoroom`) and register the new handle.
    pub async fn attach(self: &Arc<Self>, plugin: &str) -> Result<Arc<Handle>, GatewayError> {
        let req = Request::new("attach").field("plugin", plugin.into());
        let id = match self.request(req, ReplyPhase::Single).await? {
            Message::Success(success) => success
                .created_id()
                .ok_or(GatewayError::Unexpected { verb: "attach" })?,
            Message::Error(e) => return Err(e.into()),
            _ => return Err(GatewayError::Unexpected { verb: "attach" }),
        };
        let handle = Arc::new(Handle::new(
            id,
            plugin.to_string(),
            Arc::downgrade(self),
            self.handle_event_capacity,
        ));
        lock(&self.state).handles.insert(id, Arc::clone(&handle));
        log::info!("session {}: attached handle {} ({})", self.id, id, plugin);
        Ok(handle)
    }

    /// Keep the session from expiring on the server.
    pub async fn keep_alive(&self) -> Result<AckMsg, GatewayError> {
        match self
            .request(Request::new("keepalive"), ReplyPhase::Single)
            .await?
        {
            Message::Ack(ack) => Ok(ack),
            Message::Error(e) => Err(e.into()),
            _ => Err(GatewayError::Unexpected { verb: "keepalive" }),
        }
    }

    /// Destroy the session; on confirmation it is removed from the gateway's registry.
    pub async fn destroy(&self) -> Result<AckMsg, GatewayError> {
        let ack = match self
            .request(Request::new("destroy"), ReplyPhase::Single)
            .await?
        {
            Message::Ack(ack) => ack,
            Message::Success(_) => AckMsg::default(),
            Message::Error(e) => return Err(e.into()),
            _ => return Err(GatewayError::Unexpected { verb: "destroy" }),
        };
        if let Some(gateway) = self.gateway.upgrade() {
            gateway.remove_session(self.id);
        }
        log::info!("session {} destroyed", self.id);
        Ok(ack)
    }
}
