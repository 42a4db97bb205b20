use crate::config::SessionConfig;
use crate::connection::{ConnectionEvent, Connector, EventSender, ServerConnection, SessionId};
use crate::dispatch::Dispatcher;
use crate::lock::{LockAttempt, LockScope, LockTable, ReleaseTrigger};
use crate::messaging::{HandlerTable, Messaging};
use crate::state::{CloseReason, SessionState, SessionStateChange};
use crate::time_series::TimeSeries;
use crate::topics::Topics;
use crate::update::TopicUpdate;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use strata_topics::SessionError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const STATE_CHANGE_CAPACITY: usize = 64;
const ERROR_CAPACITY: usize = 64;
/// Pause before retrying an operation that hit a lost connection the event
/// loop has not yet reported.
const DISCONNECT_RETRY_PAUSE: Duration = Duration::from_millis(50);

pub(crate) struct SessionInner {
    pub(crate) id: SessionId,
    pub(crate) config: SessionConfig,
    connector: Arc<dyn Connector>,
    connection: Mutex<Arc<dyn ServerConnection>>,
    events: EventSender,
    state: watch::Sender<SessionState>,
    changes: broadcast::Sender<SessionStateChange>,
    errors: broadcast::Sender<SessionError>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) handlers: HandlerTable,
    pub(crate) locks: LockTable,
    cancel: CancellationToken,
}

impl SessionInner {
    pub(crate) fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state.borrow().is_closed() {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    /// Completes once the session has closed.
    pub(crate) async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn connection(&self) -> Arc<dyn ServerConnection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs a server operation once the session is active. Waits out
    /// recovery, retries after a lost connection and fails with
    /// `SessionClosed` if the session ends first.
    pub(crate) async fn call<T, F, Fut>(&self, operation: F) -> Result<T, SessionError>
    where
        F: Fn(Arc<dyn ServerConnection>) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let mut state = self.state.subscribe();
        loop {
            let closed = state
                .wait_for(|state| !state.is_recovering() && *state != SessionState::Connecting)
                .await
                .map(|state| state.is_closed())
                .map_err(|_| SessionError::SessionClosed)?;
            if closed {
                return Err(SessionError::SessionClosed);
            }
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::SessionClosed),
                outcome = operation(self.connection()) => outcome,
            };
            match outcome {
                Err(SessionError::Disconnected) => {
                    log::debug!("session({}): operation hit a lost connection, waiting for recovery", self.id);
                    let _ = tokio::time::timeout(
                        DISCONNECT_RETRY_PAUSE,
                        state.wait_for(|state| !state.is_connected()),
                    )
                    .await;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn report(&self, error: SessionError) {
        log::warn!("session({}): {}", self.id, error);
        let _ = self.errors.send(error);
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                previous = Some(std::mem::replace(current, next.clone()));
                true
            } else {
                false
            }
        });
        let Some(previous) = previous else {
            return false;
        };
        log::debug!("session({}): {} -> {}", self.id, previous, next);
        let _ = self.changes.send(SessionStateChange { previous, current: next });
        true
    }

    pub(crate) fn terminate(&self, reason: CloseReason) {
        let state = reason.into_state();
        let error = match &state {
            SessionState::ClosedByClient => None,
            SessionState::ClosedFailed(error) => Some(error.clone()),
            _ => Some(SessionError::SessionClosed),
        };
        if !self.transition(state) {
            return;
        }
        self.cancel.cancel();
        for name in self.locks.release(ReleaseTrigger::SessionClose) {
            log::debug!("session({}): lock {} released by session close", self.id, name);
        }
        self.dispatcher.close(error.clone());
        self.handlers.close_all(error);
    }

    fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Subscribed { path, specification } => {
                self.dispatcher.on_subscription(path, specification);
            }
            ConnectionEvent::Value { path, value } => {
                if !self.dispatcher.on_value(&path, value) {
                    self.report(SessionError::internal(format!("value for unsubscribed topic {path}")));
                }
            }
            ConnectionEvent::Unsubscribed { path, reason } => {
                if !self.dispatcher.on_unsubscription(&path, reason) {
                    self.report(SessionError::internal(format!("unsubscription from unknown topic {path}")));
                }
            }
            ConnectionEvent::Request { correlation, registration, context, request } => {
                if !self.handlers.dispatch(self, registration, correlation, context, request) {
                    let connection = self.connection();
                    let id = self.id.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connection.respond(correlation, Err("no such handler".into())).await {
                            log::debug!("session({}): rejection of request {} not delivered: {}", id, correlation, err);
                        }
                    });
                    self.report(SessionError::internal(format!("request for unknown registration {registration}")));
                }
            }
            ConnectionEvent::RegistrationClosed { registration } => {
                self.handlers.close_one(registration, None);
            }
            ConnectionEvent::ConnectionLost => self.on_connection_lost(),
            ConnectionEvent::Reconnected => {
                if self.transition(SessionState::ConnectedActive) {
                    log::info!("session({}): reconnected", self.id);
                }
            }
            ConnectionEvent::Closed { reason } => self.terminate(reason),
        }
    }

    fn on_connection_lost(self: &Arc<Self>) {
        if !self.transition(SessionState::RecoveringReconnect) {
            return;
        }
        for name in self.locks.release(ReleaseTrigger::ConnectionLoss) {
            log::debug!("session({}): lock {} released by connection loss", self.id, name);
        }
        if !self.config.reconnection.enabled {
            self.terminate(CloseReason::Failed(SessionError::Disconnected));
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move { inner.reconnect().await });
    }

    async fn reconnect(&self) {
        let policy = self.config.reconnection.clone();
        for attempt in 1..=policy.max_attempts {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(policy.delay()) => {}
            }
            log::info!("session({}): reconnect attempt {}/{}", self.id, attempt, policy.max_attempts);
            match self.connector.reconnect(&self.id, self.events.clone()).await {
                Ok(connection) => {
                    *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = connection;
                    return;
                }
                Err(err) if err.is_retryable() => {
                    log::warn!("session({}): reconnect attempt {} failed: {}", self.id, attempt, err);
                }
                Err(err) => {
                    log::warn!("session({}): reconnect rejected: {}", self.id, err);
                    let _ = self.events.send(ConnectionEvent::Closed { reason: CloseReason::Failed(err) });
                    return;
                }
            }
        }
        log::warn!("session({}): giving up after {} reconnect attempts", self.id, policy.max_attempts);
        let _ = self.events.send(ConnectionEvent::Closed { reason: CloseReason::Failed(SessionError::Disconnected) });
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_event_loop(inner: Weak<SessionInner>, cancel: CancellationToken, mut rx: mpsc::UnboundedReceiver<ConnectionEvent>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let (Some(event), Some(inner)) = (event, inner.upgrade()) else {
                        break;
                    };
                    log::trace!("session({}): event {:?}", inner.id, event);
                    inner.handle_event(event);
                }
            }
        }
    });
}

/// A logical connection to a server.
///
/// Cloning a `Session` yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub async fn open(config: SessionConfig, connector: Arc<dyn Connector>) -> Result<Session, SessionError> {
        config.validate()?;
        let (events, rx) = mpsc::unbounded_channel();
        let connection = connector.connect(&config, events.clone()).await?;
        let id = connection.session_id();
        let (state, _) = watch::channel(SessionState::Connecting);
        let (changes, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        let (errors, _) = broadcast::channel(ERROR_CAPACITY);
        let cancel = CancellationToken::new();
        let inner = Arc::new(SessionInner {
            dispatcher: Dispatcher::new(id.to_string(), config.stream_queue_warn_depth),
            handlers: HandlerTable::new(id.to_string()),
            locks: LockTable::default(),
            id,
            config,
            connector,
            connection: Mutex::new(connection),
            events,
            state,
            changes,
            errors,
            cancel: cancel.clone(),
        });
        inner.transition(SessionState::ConnectedActive);
        spawn_event_loop(Arc::downgrade(&inner), cancel, rx);
        log::info!("session({}): opened for principal {}", inner.id, inner.config.principal);
        Ok(Session { inner })
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn principal(&self) -> &str {
        &self.inner.config.principal
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// A new listener for state changes. Any number may be registered.
    pub fn state_changes(&self) -> broadcast::Receiver<SessionStateChange> {
        self.inner.changes.subscribe()
    }

    /// Errors that cannot be attributed to any operation or stream.
    pub fn errors(&self) -> broadcast::Receiver<SessionError> {
        self.inner.errors.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns that state.
    pub async fn wait_for_state<P>(&self, predicate: P) -> SessionState
    where
        P: Fn(&SessionState) -> bool,
    {
        let mut state = self.inner.state.subscribe();
        let reached = match state.wait_for(|current| predicate(current)).await {
            Ok(current) => current.clone(),
            Err(_) => self.inner.state(),
        };
        reached
    }

    pub fn topics(&self) -> Topics {
        Topics::new(self.inner.clone())
    }

    pub fn updates(&self) -> TopicUpdate {
        TopicUpdate::new(self.inner.clone())
    }

    pub fn time_series(&self) -> TimeSeries {
        TimeSeries::new(self.inner.clone())
    }

    pub fn messaging(&self) -> Messaging {
        Messaging::new(self.inner.clone())
    }

    /// Starts acquiring the named session lock.
    pub fn lock(&self, name: impl Into<String>, scope: LockScope) -> Result<LockAttempt, SessionError> {
        self.inner.ensure_open()?;
        Ok(LockAttempt::start(self.inner.clone(), name.into(), scope))
    }

    /// Closes the session. Streams receive `on_close`, handlers are closed
    /// and every later call on a dependent handle fails with
    /// `SessionClosed`.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self.inner.state().is_closed() {
            return Ok(());
        }
        if let Err(err) = self.inner.connection().close().await {
            log::debug!("session({}): close not delivered to server: {}", self.inner.id, err);
        }
        self.inner.terminate(CloseReason::ClosedByClient);
        log::info!("session({}): closed", self.inner.id);
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.inner.id).field("state", &self.inner.state()).finish()
    }
}
