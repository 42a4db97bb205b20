//! `LocalServer`: an in-process server for sessions.
//!
//! Holds the topic tree, per-session subscriptions, update stream bindings,
//! time series logs, session locks and request handler registrations behind
//! one lock, so every session observes server pushes in the order the server
//! produced them. Pushes to a session whose connection is down are held back
//! and delivered, in order, when it reconnects.
//!
//! Fault injection hooks (`drop_connection`, `close_session`,
//! `fail_next_update`, ...) make connection loss and server-side failures
//! reproducible in tests.

mod connection;
mod evaluate;
mod locks;

pub use connection::{LocalConnection, LocalConnector};

use crate::config::SessionConfig;
use crate::connection::{BoundStream, ConnectionEvent, EventSender, PendingResponse, SessionId, UpdateStreamBinding};
use crate::filter::{PRINCIPAL_PROPERTY, SESSION_ID_PROPERTY};
use crate::lock::LockScope;
use crate::messaging::{RequestContext, RequestTarget};
use crate::session::Session;
use crate::state::CloseReason;
use crate::stream::UnsubscribeReason;
use crate::update::TopicCreationResult;
use evaluate::{is_satisfied, TopicView};
use locks::LockManager;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use strata_topics::{
    property, EventLog, EventMetadata, FetchCandidate, FetchRequest, FetchSelection, QueryResult, RangeQuery,
    SessionError, TimeSeriesEvent, TopicPath, TopicSelector, TopicSpecification, TopicType, TopicValue,
    UpdateConstraint,
};
use tokio::sync::oneshot;

/// How the server answers reconnection attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    #[default]
    Accept,
    /// Attempts fail as if the server were unreachable.
    Unavailable,
    /// The session is discarded and attempts are rejected.
    Refuse,
}

struct SessionRecord {
    principal: String,
    properties: BTreeMap<String, String>,
    events: Option<EventSender>,
    backlog: Vec<ConnectionEvent>,
    selectors: Vec<TopicSelector>,
    subscribed: BTreeSet<TopicPath>,
}

impl SessionRecord {
    fn push(&mut self, event: ConnectionEvent) {
        match &self.events {
            Some(events) => {
                let _ = events.send(event);
            }
            None => self.backlog.push(event),
        }
    }

    fn subscribe(&mut self, path: &TopicPath, topic: &Topic) {
        if !self.subscribed.insert(path.clone()) {
            return;
        }
        self.push(ConnectionEvent::Subscribed { path: path.clone(), specification: topic.specification.clone() });
        if let Some(value) = &topic.value {
            self.push(ConnectionEvent::Value { path: path.clone(), value: value.clone() });
        }
    }

    fn unsubscribe(&mut self, path: &TopicPath, reason: UnsubscribeReason) -> bool {
        if !self.subscribed.remove(path) {
            return false;
        }
        self.push(ConnectionEvent::Unsubscribed { path: path.clone(), reason });
        true
    }
}

struct Topic {
    specification: TopicSpecification,
    value: Option<TopicValue>,
    log: Option<EventLog>,
    frozen: bool,
}

struct UpdateStreamRecord {
    path: TopicPath,
    session: SessionId,
}

struct HandlerRecord {
    session: SessionId,
    path: TopicPath,
}

struct PendingRequest {
    registration: u64,
    responder: SessionId,
    tx: oneshot::Sender<Result<TopicValue, SessionError>>,
}

#[derive(Default)]
struct Faults {
    fail_next_update: Option<SessionError>,
    topic_limit: Option<usize>,
    denied_updates: BTreeSet<String>,
    reconnect: ReconnectPolicy,
}

#[derive(Default)]
struct ServerState {
    next_id: u64,
    sessions: BTreeMap<SessionId, SessionRecord>,
    topics: BTreeMap<TopicPath, Topic>,
    update_streams: HashMap<u64, UpdateStreamRecord>,
    stream_by_path: HashMap<TopicPath, u64>,
    locks: LockManager,
    handlers: BTreeMap<u64, HandlerRecord>,
    pending: HashMap<u64, PendingRequest>,
    faults: Faults,
    operations: u64,
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_millis() as i64)
}

/// Value of a data type may only be written to its own topic type.
fn check_value_type(path: &TopicPath, topic_type: TopicType, value: &TopicValue) -> Result<(), SessionError> {
    if value.data_type().writable_topic_type() != Some(topic_type) {
        return Err(SessionError::incompatible_topic(
            path,
            format!("{} value for a {} topic", value.data_type(), topic_type),
        ));
    }
    Ok(())
}

impl ServerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Counts an operation received over a live connection.
    fn begin(&mut self, session: &SessionId) -> Result<(), SessionError> {
        let record = self.sessions.get(session).ok_or(SessionError::SessionClosed)?;
        if record.events.is_none() {
            return Err(SessionError::Disconnected);
        }
        self.operations += 1;
        Ok(())
    }

    // ── Sessions ─────────────────────────────────────────────────────

    fn open_session(&mut self, config: &SessionConfig, events: EventSender) -> SessionId {
        let id = SessionId::new(format!("session-{}", self.next_id()));
        let mut properties = config.properties.clone();
        properties.insert(SESSION_ID_PROPERTY.to_owned(), id.to_string());
        properties.insert(PRINCIPAL_PROPERTY.to_owned(), config.principal.clone());
        let record = SessionRecord {
            principal: config.principal.clone(),
            properties,
            events: Some(events),
            backlog: Vec::new(),
            selectors: Vec::new(),
            subscribed: BTreeSet::new(),
        };
        self.sessions.insert(id.clone(), record);
        log::debug!("server: session {} opened for {}", id, config.principal);
        id
    }

    fn reconnect(&mut self, session: &SessionId, events: EventSender) -> Result<(), SessionError> {
        match self.faults.reconnect {
            ReconnectPolicy::Accept => {}
            ReconnectPolicy::Unavailable => return Err(SessionError::Disconnected),
            ReconnectPolicy::Refuse => {
                self.remove_session(session, None);
                return Err(SessionError::SessionClosed);
            }
        }
        let record = self
            .sessions
            .get_mut(session)
            .ok_or_else(|| SessionError::NoSuchSession { session_id: session.to_string() })?;
        for event in record.backlog.drain(..) {
            let _ = events.send(event);
        }
        let _ = events.send(ConnectionEvent::Reconnected);
        record.events = Some(events);
        log::debug!("server: session {} reconnected", session);
        Ok(())
    }

    fn disconnect(&mut self, session: &SessionId) -> bool {
        let Some(events) = self.sessions.get_mut(session).and_then(|record| record.events.take()) else {
            return false;
        };
        let _ = events.send(ConnectionEvent::ConnectionLost);
        let freed = self.locks.release_session(
            session,
            |scope| scope == LockScope::UnlockOnConnectionLoss,
            SessionError::Disconnected,
        );
        log::debug!("server: session {} lost its connection, released locks {:?}", session, freed);
        true
    }

    fn remove_session(&mut self, session: &SessionId, notify: Option<CloseReason>) -> bool {
        let Some(mut record) = self.sessions.remove(session) else {
            return false;
        };
        if let Some(reason) = notify {
            record.push(ConnectionEvent::Closed { reason });
        }
        self.locks.release_session(session, |_| true, SessionError::SessionClosed);
        self.update_streams.retain(|_, stream| &stream.session != session);
        self.stream_by_path.retain(|_, id| self.update_streams.contains_key(id));
        let registrations: Vec<u64> =
            self.handlers.iter().filter(|(_, handler)| &handler.session == session).map(|(id, _)| *id).collect();
        for registration in registrations {
            self.handlers.remove(&registration);
        }
        let orphaned: Vec<u64> =
            self.pending.iter().filter(|(_, pending)| &pending.responder == session).map(|(id, _)| *id).collect();
        for correlation in orphaned {
            if let Some(pending) = self.pending.remove(&correlation) {
                let _ = pending.tx.send(Err(SessionError::SessionClosed));
            }
        }
        log::debug!("server: session {} removed", session);
        true
    }

    fn check_update_permission(&self, session: &SessionId, path: &TopicPath) -> Result<(), SessionError> {
        let principal = self.sessions.get(session).map(|record| record.principal.as_str()).unwrap_or_default();
        if self.faults.denied_updates.contains(principal) {
            return Err(SessionError::SessionSecurity { permission: "modify_topic".into(), path: path.to_string() });
        }
        Ok(())
    }

    fn take_fault(&mut self) -> Result<(), SessionError> {
        match self.faults.fail_next_update.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ── Subscriptions and fetch ──────────────────────────────────────

    fn subscribe(&mut self, session: &SessionId, selector: &TopicSelector) {
        let Some(record) = self.sessions.get_mut(session) else {
            return;
        };
        record.selectors.push(selector.clone());
        for (path, topic) in self.topics.iter().filter(|(path, _)| selector.selects_path(path)) {
            record.subscribe(path, topic);
        }
    }

    fn unsubscribe(&mut self, session: &SessionId, selector: &TopicSelector) {
        let Some(record) = self.sessions.get_mut(session) else {
            return;
        };
        record.selectors.retain(|existing| existing != selector);
        let paths: Vec<TopicPath> = record.subscribed.iter().filter(|path| selector.selects_path(path)).cloned().collect();
        for path in paths {
            record.unsubscribe(&path, UnsubscribeReason::Requested);
        }
    }

    fn fetch(&self, selector: &TopicSelector, request: &FetchRequest) -> FetchSelection {
        let candidates = self.topics.iter().map(|(path, topic)| FetchCandidate {
            path,
            specification: &topic.specification,
            value: topic.value.as_ref(),
        });
        request.select(selector, candidates)
    }

    // ── Topic control ────────────────────────────────────────────────

    fn create_topic(&mut self, path: &TopicPath, specification: &TopicSpecification) -> Result<(), SessionError> {
        specification.validate()?;
        if let Some(limit) = self.faults.topic_limit {
            if self.topics.len() >= limit {
                return Err(SessionError::TopicLicenseLimit { limit });
            }
        }
        let log = match specification.topic_type() {
            TopicType::TimeSeries => Some(EventLog::new(specification.retained_event_limit()?)),
            _ => None,
        };
        let topic = Topic { specification: specification.clone(), value: None, log, frozen: false };
        for record in self.sessions.values_mut() {
            if record.selectors.iter().any(|selector| selector.selects_path(path)) {
                record.subscribe(path, &topic);
            }
        }
        self.topics.insert(path.clone(), topic);
        log::debug!("server: topic {} added as {}", path, specification.topic_type());
        Ok(())
    }

    fn add_topic(
        &mut self,
        session: &SessionId,
        path: &TopicPath,
        specification: &TopicSpecification,
    ) -> Result<TopicCreationResult, SessionError> {
        self.check_update_permission(session, path)?;
        match self.topics.get(path) {
            Some(existing) if existing.specification == *specification => Ok(TopicCreationResult::Exists),
            Some(_) => Err(SessionError::IncompatibleExistingTopic { path: path.to_string() }),
            None => self.create_topic(path, specification).map(|()| TopicCreationResult::Created),
        }
    }

    fn remove_topics(&mut self, session: &SessionId, selector: &TopicSelector) -> Result<usize, SessionError> {
        let paths: Vec<TopicPath> = self.topics.keys().filter(|path| selector.selects_path(path)).cloned().collect();
        for path in &paths {
            self.check_update_permission(session, path)?;
        }
        for path in &paths {
            self.topics.remove(path);
            if let Some(stream) = self.stream_by_path.remove(path) {
                self.update_streams.remove(&stream);
            }
            for record in self.sessions.values_mut() {
                record.unsubscribe(path, UnsubscribeReason::Removal);
            }
            log::debug!("server: topic {} removed", path);
        }
        Ok(paths.len())
    }

    // ── Updates ──────────────────────────────────────────────────────

    fn check_constraint(
        &self,
        session: &SessionId,
        path: &TopicPath,
        constraint: &UpdateConstraint,
    ) -> Result<(), SessionError> {
        let view = self.topics.get(path).map(|topic| TopicView { value: topic.value.as_ref() });
        if !is_satisfied(constraint, view, |token| self.locks.holds(session, token)) {
            return Err(SessionError::UnsatisfiedConstraint { path: path.to_string() });
        }
        Ok(())
    }

    /// Stores and publishes a value, after checking the topic accepts it.
    /// Checks that `value` could be written to `path` as a `topic_type`
    /// topic, without writing it.
    fn check_writable(&self, path: &TopicPath, topic_type: TopicType, value: &TopicValue) -> Result<(), SessionError> {
        if self.topics.get(path).is_some_and(|topic| topic.frozen) {
            return Err(SessionError::IncompatibleTopicState { path: path.to_string() });
        }
        check_value_type(path, topic_type, value)
    }

    fn write(&mut self, path: &TopicPath, value: TopicValue) -> Result<(), SessionError> {
        let topic_type = self
            .topics
            .get(path)
            .map(|topic| topic.specification.topic_type())
            .ok_or_else(|| SessionError::no_such_topic(path))?;
        self.check_writable(path, topic_type, &value)?;
        self.retain(path, &value);
        self.publish(path, value);
        Ok(())
    }

    /// Stores `value` as the topic's current value unless the topic is
    /// configured not to retain one.
    fn retain(&mut self, path: &TopicPath, value: &TopicValue) {
        if let Some(topic) = self.topics.get_mut(path) {
            if topic.specification.property(property::DONT_RETAIN_VALUE) != Some("true") {
                topic.value = Some(value.clone());
            }
        }
    }

    fn publish(&mut self, path: &TopicPath, value: TopicValue) {
        for record in self.sessions.values_mut().filter(|record| record.subscribed.contains(path)) {
            record.push(ConnectionEvent::Value { path: path.clone(), value: value.clone() });
        }
    }

    fn set(
        &mut self,
        session: &SessionId,
        path: &TopicPath,
        value: TopicValue,
        constraint: &UpdateConstraint,
    ) -> Result<(), SessionError> {
        self.take_fault()?;
        self.check_update_permission(session, path)?;
        self.check_constraint(session, path, constraint)?;
        self.write(path, value)
    }

    /// Finds or creates the topic for a create-capable update. An existing
    /// topic is used if it has the same type.
    fn ensure_topic(
        &mut self,
        path: &TopicPath,
        specification: &TopicSpecification,
    ) -> Result<TopicCreationResult, SessionError> {
        match self.topics.get(path) {
            Some(existing) if existing.specification.topic_type() == specification.topic_type() => {
                Ok(TopicCreationResult::Exists)
            }
            Some(_) => Err(SessionError::IncompatibleExistingTopic { path: path.to_string() }),
            None => self.create_topic(path, specification).map(|()| TopicCreationResult::Created),
        }
    }

    fn add_and_set(
        &mut self,
        session: &SessionId,
        path: &TopicPath,
        specification: &TopicSpecification,
        value: TopicValue,
        constraint: &UpdateConstraint,
    ) -> Result<TopicCreationResult, SessionError> {
        self.take_fault()?;
        self.check_update_permission(session, path)?;
        self.check_constraint(session, path, constraint)?;
        check_value_type(path, specification.topic_type(), &value)?;
        let result = self.ensure_topic(path, specification)?;
        self.write(path, value)?;
        Ok(result)
    }

    fn bind_update_stream(
        &mut self,
        session: &SessionId,
        binding: &UpdateStreamBinding,
        value: Option<TopicValue>,
    ) -> Result<BoundStream, SessionError> {
        let path = &binding.path;
        self.take_fault()?;
        self.check_update_permission(session, path)?;
        self.check_constraint(session, path, &binding.constraint)?;
        // Nothing may change until the first value is known to be writable.
        if let Some(value) = &value {
            let topic_type = match &binding.specification {
                Some(specification) => Some(specification.topic_type()),
                None => self.topics.get(path).map(|topic| topic.specification.topic_type()),
            };
            if let Some(topic_type) = topic_type {
                self.check_writable(path, topic_type, value)?;
            }
        }
        let result = match &binding.specification {
            Some(specification) => self.ensure_topic(path, specification)?,
            None => {
                let topic = self.topics.get(path).ok_or_else(|| SessionError::no_such_topic(path))?;
                let topic_type = topic.specification.topic_type();
                if binding.data_type.writable_topic_type() != Some(topic_type) {
                    return Err(SessionError::incompatible_topic(
                        path,
                        format!("{} stream for a {} topic", binding.data_type, topic_type),
                    ));
                }
                TopicCreationResult::Exists
            }
        };
        let id = self.next_id();
        if let Some(superseded) = self.stream_by_path.insert(path.clone(), id) {
            self.update_streams.remove(&superseded);
            log::debug!("server: update stream {} on {} superseded by {}", superseded, path, id);
        }
        self.update_streams.insert(id, UpdateStreamRecord { path: path.clone(), session: session.clone() });
        if let Some(value) = value {
            self.write(path, value)?;
        }
        Ok(BoundStream { id, result })
    }

    fn stream_path(&self, stream: u64) -> Result<TopicPath, SessionError> {
        let record = self.update_streams.get(&stream).ok_or(SessionError::InvalidUpdateStream)?;
        if !self.topics.contains_key(&record.path) {
            return Err(SessionError::no_such_topic(&record.path));
        }
        Ok(record.path.clone())
    }

    fn update_stream_set(&mut self, session: &SessionId, stream: u64, value: TopicValue) -> Result<(), SessionError> {
        self.take_fault()?;
        let path = self.stream_path(stream)?;
        self.check_update_permission(session, &path)?;
        self.write(&path, value)
    }

    // ── Time series ──────────────────────────────────────────────────

    fn event_log(&mut self, path: &TopicPath) -> Result<(&mut EventLog, TopicType), SessionError> {
        let topic = self.topics.get_mut(path).ok_or_else(|| SessionError::no_such_topic(path))?;
        let event_type = topic.specification.event_value_type();
        match (topic.log.as_mut(), event_type) {
            (Some(log), Some(event_type)) => Ok((log, event_type)),
            _ => Err(SessionError::incompatible_topic(path, "not a time series topic")),
        }
    }

    fn record_event(&mut self, path: &TopicPath, event: TimeSeriesEvent) -> EventMetadata {
        let metadata = event.metadata.clone();
        let value = TopicValue::Event(Box::new(event));
        self.retain(path, &value);
        self.publish(path, value);
        metadata
    }

    fn append(&mut self, session: &SessionId, path: &TopicPath, value: TopicValue) -> Result<EventMetadata, SessionError> {
        self.check_update_permission(session, path)?;
        let author = self.sessions.get(session).map(|record| record.principal.clone()).unwrap_or_default();
        let (log, event_type) = self.event_log(path)?;
        check_value_type(path, event_type, &value)?;
        let event = log.append(value, &author, now_millis());
        Ok(self.record_event(path, event))
    }

    fn edit(
        &mut self,
        session: &SessionId,
        path: &TopicPath,
        original_sequence: u64,
        value: TopicValue,
    ) -> Result<EventMetadata, SessionError> {
        self.check_update_permission(session, path)?;
        let author = self.sessions.get(session).map(|record| record.principal.clone()).unwrap_or_default();
        let (log, event_type) = self.event_log(path)?;
        check_value_type(path, event_type, &value)?;
        let event = log
            .edit(original_sequence, value, &author, now_millis())
            .map_err(|_| SessionError::NoSuchEvent { path: path.to_string(), sequence: original_sequence })?;
        Ok(self.record_event(path, event))
    }

    fn range_query(&mut self, path: &TopicPath, query: &RangeQuery) -> Result<QueryResult, SessionError> {
        let (log, _) = self.event_log(path)?;
        Ok(log.query(query))
    }

    // ── Messaging ────────────────────────────────────────────────────

    fn register_handler(&mut self, session: &SessionId, path: &TopicPath) -> u64 {
        let id = self.next_id();
        self.handlers.insert(id, HandlerRecord { session: session.clone(), path: path.clone() });
        log::debug!("server: handler {} registered for {} by {}", id, path, session);
        id
    }

    fn unregister_handler(&mut self, session: &SessionId, registration: u64) {
        match self.handlers.get(&registration) {
            Some(handler) if &handler.session == session => {}
            _ => return,
        }
        self.handlers.remove(&registration);
        let orphaned: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.registration == registration)
            .map(|(id, _)| *id)
            .collect();
        for correlation in orphaned {
            if let Some(pending) = self.pending.remove(&correlation) {
                let _ = pending.tx.send(Err(SessionError::RegistrationClosed));
            }
        }
        if let Some(record) = self.sessions.get_mut(session) {
            record.push(ConnectionEvent::RegistrationClosed { registration });
        }
    }

    /// The registration with the longest path that `path` lies within,
    /// among handlers of sessions `accept` admits. Earlier registrations
    /// win ties.
    fn route(&self, path: &TopicPath, accept: impl Fn(&SessionId) -> bool) -> Option<(u64, SessionId)> {
        self.handlers
            .iter()
            .filter(|(_, handler)| path.is_within(&handler.path) && accept(&handler.session))
            .max_by_key(|(id, handler)| (handler.path.depth(), Reverse(**id)))
            .map(|(id, handler)| (*id, handler.session.clone()))
    }

    fn send_request(
        &mut self,
        session: &SessionId,
        target: &RequestTarget,
        path: &TopicPath,
        request: TopicValue,
    ) -> Result<Vec<PendingResponse>, SessionError> {
        let properties = self.sessions.get(session).map(|record| record.properties.clone()).unwrap_or_default();
        let routes: Vec<(u64, SessionId)> = match target {
            RequestTarget::Path => {
                vec![self.route(path, |_| true).ok_or_else(|| SessionError::NoHandler { path: path.to_string() })?]
            }
            RequestTarget::Session(target) => {
                if !self.sessions.contains_key(target) {
                    return Err(SessionError::NoSuchSession { session_id: target.to_string() });
                }
                let route = self.route(path, |owner| owner == target);
                vec![route.ok_or_else(|| SessionError::NoHandler { path: path.to_string() })?]
            }
            RequestTarget::Filter(filter) => self
                .sessions
                .iter()
                .filter(|(_, record)| filter.matches(&record.properties))
                .filter_map(|(id, _)| self.route(path, |owner| owner == id))
                .collect(),
        };
        let mut responses = Vec::with_capacity(routes.len());
        for (registration, responder) in routes {
            let correlation = self.next_id();
            let (tx, rx) = oneshot::channel();
            let context = RequestContext {
                session_id: session.clone(),
                path: path.clone(),
                session_properties: properties.clone(),
            };
            if let Some(record) = self.sessions.get_mut(&responder) {
                record.push(ConnectionEvent::Request { correlation, registration, context, request: request.clone() });
            }
            self.pending.insert(correlation, PendingRequest { registration, responder: responder.clone(), tx });
            responses.push(PendingResponse { session_id: responder, response: rx });
        }
        Ok(responses)
    }

    fn respond(&mut self, correlation: u64, response: Result<TopicValue, String>) {
        if let Some(pending) = self.pending.remove(&correlation) {
            let _ = pending.tx.send(response.map_err(|reason| SessionError::RequestRejected { reason }));
        }
    }
}

/// An in-process server. Clones share the same state.
#[derive(Clone, Default)]
pub struct LocalServer {
    state: Arc<Mutex<ServerState>>,
}

impl LocalServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn crate::connection::Connector> {
        Arc::new(LocalConnector::new(self.clone()))
    }

    pub async fn open_session(&self, config: SessionConfig) -> Result<Session, SessionError> {
        Session::open(config, self.connector()).await
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Operations received from sessions so far.
    pub fn operation_count(&self) -> u64 {
        self.lock().operations
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.lock().sessions.keys().cloned().collect()
    }

    pub fn topic_value(&self, path: &str) -> Option<TopicValue> {
        let path = TopicPath::new(path).ok()?;
        self.lock().topics.get(&path).and_then(|topic| topic.value.clone())
    }

    pub fn topic_specification(&self, path: &str) -> Option<TopicSpecification> {
        let path = TopicPath::new(path).ok()?;
        self.lock().topics.get(&path).map(|topic| topic.specification.clone())
    }

    pub fn is_subscribed(&self, session: &SessionId, path: &str) -> bool {
        let Ok(path) = TopicPath::new(path) else {
            return false;
        };
        self.lock().sessions.get(session).is_some_and(|record| record.subscribed.contains(&path))
    }

    // ── Fault injection ──────────────────────────────────────────────

    /// Drops the session's connection. Pushes are held back until it
    /// reconnects.
    pub fn drop_connection(&self, session: &SessionId) -> bool {
        self.lock().disconnect(session)
    }

    /// Closes the session from the server side.
    pub fn close_session(&self, session: &SessionId) -> bool {
        self.lock().remove_session(session, Some(CloseReason::ClosedByServer))
    }

    /// Terminates the session with an error.
    pub fn fail_session(&self, session: &SessionId, error: SessionError) -> bool {
        self.lock().remove_session(session, Some(CloseReason::Failed(error)))
    }

    pub fn set_reconnect_policy(&self, policy: ReconnectPolicy) {
        self.lock().faults.reconnect = policy;
    }

    /// The next update operation from any session fails with `error`.
    pub fn fail_next_update(&self, error: SessionError) {
        self.lock().faults.fail_next_update = Some(error);
    }

    pub fn set_topic_limit(&self, limit: Option<usize>) {
        self.lock().faults.topic_limit = limit;
    }

    /// Refuses topic modifications by sessions of `principal`.
    pub fn deny_updates(&self, principal: impl Into<String>) {
        self.lock().faults.denied_updates.insert(principal.into());
    }

    /// Refuses updates to the topic until it is removed.
    pub fn freeze_topic(&self, path: &str) -> bool {
        let Ok(path) = TopicPath::new(path) else {
            return false;
        };
        match self.lock().topics.get_mut(&path) {
            Some(topic) => {
                topic.frozen = true;
                true
            }
            None => false,
        }
    }

    /// Unsubscribes the session from the selected topics, as the server
    /// does under back pressure or when authorisation is withdrawn.
    pub fn unsubscribe_session(&self, session: &SessionId, selector: &TopicSelector, reason: UnsubscribeReason) -> usize {
        let mut state = self.lock();
        let Some(record) = state.sessions.get_mut(session) else {
            return 0;
        };
        let paths: Vec<TopicPath> = record.subscribed.iter().filter(|path| selector.selects_path(path)).cloned().collect();
        paths.iter().filter(|path| record.unsubscribe(path, reason)).count()
    }
}

impl std::fmt::Debug for LocalServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LocalServer")
            .field("sessions", &state.sessions.len())
            .field("topics", &state.topics.len())
            .field("operations", &state.operations)
            .finish()
    }
}
