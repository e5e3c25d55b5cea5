//! Gateway client: owns the connection, the correlation table, and the session registry.
//!
//! Two background tasks run per gateway: the dispatcher (sole reader of the transport) and the
//! health check (periodic keepalive). Both hold only a weak reference, so dropping every
//! [`Gateway`] clone stops them.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::pending::{PendingTable, Reply, ReplyPhase, Route};
use crate::gateway::protocol::{self, Envelope, InfoMsg, Inbound, Message, Request};
use crate::gateway::transport::{self, FrameReader, FrameWriter, TransportError};
use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Runtime settings for a gateway connection.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Keepalive period; zero disables the health check.
    pub ping_interval: Duration,
    /// Deadline for writing one keepalive.
    pub ping_timeout: Duration,
    /// Bound on every request wait. `None` waits until a reply arrives or the connection ends.
    pub request_timeout: Option<Duration>,
    pub error_queue_capacity: usize,
    pub session_event_capacity: usize,
    pub handle_event_capacity: usize,
    /// Deliveries to full event queues that may be in flight at once.
    pub max_pending_deliveries: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl GatewayOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
            request_timeout: match config.request_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            error_queue_capacity: config.error_queue_capacity,
            session_event_capacity: config.session_event_capacity,
            handle_event_capacity: config.handle_event_capacity,
            max_pending_deliveries: config.max_pending_deliveries,
        }
    }
}

/// Shared mutable state, guarded by one lock.
#[derive(Default)]
struct State {
    pending: PendingTable,
    sessions: HashMap<u64, Arc<Session>>,
    /// Set once the dispatcher has stopped; no reply can arrive after that.
    closed: bool,
}

pub(crate) struct GatewayInner {
    state: Mutex<State>,
    writer: tokio::sync::Mutex<Box<dyn FrameWriter>>,
    errors_tx: mpsc::Sender<GatewayError>,
    errors_rx: Mutex<Option<mpsc::Receiver<GatewayError>>>,
    deliveries: Arc<Semaphore>,
    options: GatewayOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Connection to a Janus gateway. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Gateway {
    /// Connect with default options.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        Self::connect_with(url, GatewayOptions::default()).await
    }

    pub async fn connect_with(url: &str, options: GatewayOptions) -> Result<Self, GatewayError> {
        let (reader, writer) = transport::connect(url)
            .await
            .map_err(GatewayError::Connect)?;
        log::info!("connected to gateway at {}", url);
        Ok(Self::with_transport(reader, writer, options))
    }

    /// Run a gateway over an established transport and start its background tasks.
    /// Must be called from within a tokio runtime.
    pub fn with_transport<R, W>(reader: R, writer: W, options: GatewayOptions) -> Self
    where
        R: FrameReader + 'static,
        W: FrameWriter + 'static,
    {
        let (errors_tx, errors_rx) = mpsc::channel(options.error_queue_capacity.max(1));
        let ping_interval = options.ping_interval;
        let inner = Arc::new(GatewayInner {
            state: Mutex::new(State::default()),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            deliveries: Arc::new(Semaphore::new(
                options.max_pending_deliveries.min(Semaphore::MAX_PERMITS),
            )),
            options,
            tasks: Mutex::new(Vec::new()),
        });
        let mut tasks = vec![tokio::spawn(dispatch_loop(Arc::downgrade(&inner), reader))];
        if !ping_interval.is_zero() {
            tasks.push(tokio::spawn(health_check_loop(
                Arc::downgrade(&inner),
                ping_interval,
            )));
        }
        lock(&inner.tasks).extend(tasks);
        Self { inner }
    }

    /// Ask the gateway for a new session and register it.
    pub async fn create_session(&self) -> Result<Arc<Session>, GatewayError> {
        let reply = self
            .inner
            .request(Request::new("create"), ReplyPhase::Single)
            .await?;
        let id = match reply {
            Message::Success(success) => success
                .created_id()
                .ok_or(GatewayError::Unexpected { verb: "create" })?,
            Message::Error(e) => return Err(e.into()),
            _ => return Err(GatewayError::Unexpected { verb: "create" }),
        };
        let session = Arc::new(Session::new(
            id,
            Arc::downgrade(&self.inner),
            self.inner.options.session_event_capacity,
            self.inner.options.handle_event_capacity,
        ));
        lock(&self.inner.state)
            .sessions
            .insert(id, Arc::clone(&session));
        log::info!("session {} created", id);
        Ok(session)
    }

    /// Server description (`info` → `server_info`).
    pub async fn info(&self) -> Result<InfoMsg, GatewayError> {
        match self
            .inner
            .request(Request::new("info"), ReplyPhase::Single)
            .await?
        {
            Message::ServerInfo(info) => Ok(info),
            Message::Error(e) => Err(e.into()),
            _ => Err(GatewayError::Unexpected { verb: "info" }),
        }
    }

    /// Close the transport. Waiters are released once the dispatcher observes the close.
    pub async fn close(&self) -> Result<(), GatewayError> {
        self.inner.writer.lock().await.close().await?;
        log::info!("gateway connection closing");
        Ok(())
    }

    /// Registered session by id.
    pub fn session(&self, id: u64) -> Option<Arc<Session>> {
        lock(&self.inner.state).sessions.get(&id).cloned()
    }

    pub fn session_ids(&self) -> Vec<u64> {
        lock(&self.inner.state).sessions.keys().copied().collect()
    }

    /// Requests still waiting for their reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// Background failures (keepalive, write, read). Returns the receiver once.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<GatewayError>> {
        lock(&self.inner.errors_rx).take()
    }
}

impl GatewayInner {
    pub(crate) fn remove_session(&self, id: u64) -> bool {
        lock(&self.state).sessions.remove(&id).is_some()
    }

    /// Send `req` and wait for its final reply, bounded by the request timeout.
    pub(crate) async fn request(
        self: &Arc<Self>,
        req: Request,
        phase: ReplyPhase,
    ) -> Result<Message, GatewayError> {
        let verb = req.verb();
        let mut pending = self.send(req, phase).await?;
        match self.options.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending.final_reply())
                .await
                .map_err(|_| GatewayError::Timeout { verb, timeout })?,
            None => pending.final_reply().await,
        }
    }

    /// Register a reply slot, then encode and write the request. A failed write is returned to the
    /// caller and also reported on the error queue.
    async fn send(
        self: &Arc<Self>,
        req: Request,
        phase: ReplyPhase,
    ) -> Result<PendingReply, GatewayError> {
        let verb = req.verb();
        let (transaction, rx) = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(GatewayError::Closed);
            }
            state.pending.register(phase)
        };
        let pending = PendingReply {
            transaction: transaction.clone(),
            rx,
            gateway: Arc::downgrade(self),
        };
        let frame = req
            .with_transaction(transaction)
            .encode()
            .map_err(|source| GatewayError::Encode { verb, source })?;
        log::trace!("> {}", frame);
        let written = self.writer.lock().await.send(frame).await;
        if let Err(e) = written {
            self.report(GatewayError::Write {
                verb,
                reason: e.to_string(),
            });
            return Err(GatewayError::Transport(e));
        }
        Ok(pending)
    }

    /// Best-effort report of a background failure; never blocks.
    fn report(&self, error: GatewayError) {
        match self.errors_tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) | Err(TrySendError::Closed(e)) => {
                log::warn!("gateway: {}", e)
            }
        }
    }

    async fn keepalive(&self) -> Result<(), TransportError> {
        let deadline = self.options.ping_timeout;
        tokio::time::timeout(deadline, async {
            self.writer.lock().await.keepalive().await
        })
        .await
        .map_err(|_| TransportError::Deadline(deadline))?
    }

    /// Classify one inbound frame. `Err` only for failures that end the dispatcher.
    fn dispatch(&self, bytes: &[u8]) -> Result<(), GatewayError> {
        log::trace!("< {}", String::from_utf8_lossy(bytes));
        let Inbound { envelope, message } = match protocol::decode_frame(bytes) {
            Ok(inbound) => inbound,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                log::warn!("discarding frame: {}", e);
                return Ok(());
            }
        };
        let message = match envelope.transaction() {
            Some(transaction) => {
                let route = lock(&self.state).pending.route(transaction, message);
                match route {
                    Route::Slot(slot, reply) => {
                        self.deliver(slot, reply, "reply slot");
                        return Ok(());
                    }
                    Route::Events(message) => message,
                }
            }
            None => message,
        };
        self.route_event(&envelope, message);
        Ok(())
    }

    /// Route a push (or a reply to a used/unknown transaction) by (session_id, handle_id).
    fn route_event(&self, envelope: &Envelope, message: Message) {
        let Some(session_id) = envelope.session_id else {
            log::debug!("dropping '{}' without session_id", message.kind());
            return;
        };
        let session = lock(&self.state).sessions.get(&session_id).cloned();
        let Some(session) = session else {
            log::debug!(
                "dropping '{}' for unknown session {}",
                message.kind(),
                session_id
            );
            return;
        };
        match envelope.handle() {
            Some(handle_id) => match session.handle(handle_id) {
                Some(handle) => self.deliver(handle.events_sender(), message, "handle queue"),
                None => log::debug!(
                    "dropping '{}' for unknown handle {} in session {}",
                    message.kind(),
                    handle_id,
                    session_id
                ),
            },
            None => self.deliver(session.events_sender(), message, "session queue"),
        }
    }

    /// Non-blocking delivery. A full queue gets a short-lived delivery task while permits last.
    fn deliver<T: Send + 'static>(&self, queue: mpsc::Sender<T>, item: T, target: &str) {
        match queue.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => log::debug!("{} closed; message dropped", target),
            Err(TrySendError::Full(item)) => {
                match Arc::clone(&self.deliveries).try_acquire_owned() {
                    Ok(permit) => {
                        tokio::spawn(async move {
                            let _ = queue.send(item).await;
                            drop(permit);
                        });
                    }
                    Err(_) => log::warn!(
                        "{} full and {} deliveries in flight; message dropped",
                        target,
                        self.options.max_pending_deliveries
                    ),
                }
            }
        }
    }

    /// Called when the dispatcher stops: no reply can arrive any more.
    fn release_pending(&self) {
        let released = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.pending.clear()
        };
        if released > 0 {
            log::debug!("released {} pending request(s)", released);
        }
    }
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Reply slot held by a waiting caller. Dropping it removes the slot from the table.
pub(crate) struct PendingReply {
    transaction: String,
    rx: mpsc::Receiver<Reply>,
    gateway: Weak<GatewayInner>,
}

impl PendingReply {
    /// Wait past provisional acks for the final reply.
    async fn final_reply(&mut self) -> Result<Message, GatewayError> {
        loop {
            match self.rx.recv().await {
                Some(Reply::Provisional(msg)) => log::debug!(
                    "transaction {}: provisional '{}', waiting for final reply",
                    self.transaction,
                    msg.kind()
                ),
                Some(Reply::Final(msg)) => return Ok(msg),
                None => return Err(GatewayError::Closed),
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(gateway) = self.gateway.upgrade() {
            lock(&gateway.state).pending.remove(&self.transaction);
        }
    }
}

async fn dispatch_loop<R: FrameReader>(gateway: Weak<GatewayInner>, mut reader: R) {
    loop {
        let next = reader.next_frame().await;
        let Some(inner) = gateway.upgrade() else {
            return;
        };
        let failure = match next {
            Ok(Some(bytes)) => match inner.dispatch(&bytes) {
                Ok(()) => continue,
                Err(e) => Some(e),
            },
            Ok(None) => None,
            Err(e) => Some(GatewayError::Transport(e)),
        };
        match failure {
            Some(e) => inner.report(e),
            None => log::info!("gateway connection closed by peer"),
        }
        inner.release_pending();
        return;
    }
}

async fn health_check_loop(gateway: Weak<GatewayInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(inner) = gateway.upgrade() else {
            return;
        };
        if lock(&inner.state).closed {
            log::debug!("connection closed; health check stopped");
            return;
        }
        if let Err(e) = inner.keepalive().await {
            inner.report(GatewayError::Transport(e));
        }
    }
}
