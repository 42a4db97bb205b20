//! Request/response messaging routed by the server.
//!
//! Handlers register against a path. A request sent to a path is routed to
//! the handler registered for the longest matching path prefix; requests can
//! also target one session, or every session a [`SessionFilter`] selects.

use crate::connection::{PendingResponse, SessionId};
use crate::filter::SessionFilter;
use crate::session::SessionInner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strata_topics::{SessionError, TopicData, TopicPath, TopicValue};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// Who sent a request, and to which path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub session_id: SessionId,
    pub path: TopicPath,
    pub session_properties: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestTarget {
    Path,
    Session(SessionId),
    Filter(SessionFilter),
}

#[async_trait]
pub trait RequestHandler<Req: TopicData, Resp: TopicData>: Send + Sync + 'static {
    /// Handles one request. The responder may be used once; dropping it
    /// unused leaves the requester waiting until the registration closes.
    async fn on_request(&self, context: RequestContext, request: Req, responder: Responder<Resp>);

    fn on_close(&self) {}

    fn on_error(&self, _error: &SessionError) {}
}

/// Receives the responses to a request sent to a session filter.
pub trait ResponseStream<R: TopicData>: Send + 'static {
    fn on_response(&mut self, session_id: &SessionId, response: R);

    fn on_response_error(&mut self, session_id: &SessionId, error: &SessionError);

    /// Every matched session has been accounted for.
    fn on_close(&mut self) {}

    fn on_error(&mut self, _error: &SessionError) {}
}

/// Answers one request.
pub struct Responder<R> {
    session: Arc<SessionInner>,
    correlation: u64,
    _response: PhantomData<fn(R)>,
}

impl<R: TopicData> Responder<R> {
    pub async fn respond(self, response: R) -> Result<(), SessionError> {
        self.send(Ok(response.into_topic_value())).await
    }

    /// Fails the request with [`SessionError::RequestRejected`].
    pub async fn reject(self, reason: impl Into<String>) -> Result<(), SessionError> {
        self.send(Err(reason.into())).await
    }

    async fn send(self, response: Result<TopicValue, String>) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let correlation = self.correlation;
        self.session
            .call(|connection| {
                let response = response.clone();
                async move { connection.respond(correlation, response).await }
            })
            .await
    }
}

impl<R> fmt::Debug for Responder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").field("correlation", &self.correlation).finish()
    }
}

trait ErasedHandler: Send + Sync {
    fn handle(self: Arc<Self>, session: Arc<SessionInner>, correlation: u64, context: RequestContext, request: TopicValue);

    fn close(&self, error: Option<&SessionError>);
}

struct TypedHandler<Req, Resp, H> {
    handler: H,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, H> ErasedHandler for TypedHandler<Req, Resp, H>
where
    Req: TopicData,
    Resp: TopicData,
    H: RequestHandler<Req, Resp>,
{
    fn handle(self: Arc<Self>, session: Arc<SessionInner>, correlation: u64, context: RequestContext, request: TopicValue) {
        let responder = Responder { session, correlation, _response: PhantomData };
        match Req::from_topic_value(&request) {
            Some(request) => {
                tokio::spawn(async move { self.handler.on_request(context, request, responder).await });
            }
            None => {
                log::warn!("session({}): request on {} not readable as {}", responder.session.id, context.path, Req::DATA_TYPE);
                let id = responder.session.id.clone();
                tokio::spawn(async move {
                    if let Err(err) = responder.reject(format!("request is not readable as {}", Req::DATA_TYPE)).await {
                        log::debug!("session({}): rejection not delivered: {}", id, err);
                    }
                });
            }
        }
    }

    fn close(&self, error: Option<&SessionError>) {
        match error {
            Some(error) => self.handler.on_error(error),
            None => self.handler.on_close(),
        }
    }
}

#[derive(Default)]
struct HandlerState {
    handlers: HashMap<u64, Arc<dyn ErasedHandler>>,
    closed: bool,
}

/// Handlers of this session by registration id.
pub(crate) struct HandlerTable {
    label: String,
    state: Mutex<HandlerState>,
}

impl HandlerTable {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), state: Mutex::new(HandlerState::default()) }
    }

    fn insert(&self, registration: u64, handler: Arc<dyn ErasedHandler>) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::SessionClosed);
        }
        state.handlers.insert(registration, handler);
        Ok(())
    }

    /// Hands a request to its handler. False if the registration is unknown.
    pub fn dispatch(
        &self,
        session: &Arc<SessionInner>,
        registration: u64,
        correlation: u64,
        context: RequestContext,
        request: TopicValue,
    ) -> bool {
        let handler = self.lock().handlers.get(&registration).cloned();
        match handler {
            Some(handler) => {
                log::trace!("session({}): request {} for registration {}", self.label, correlation, registration);
                handler.handle(session.clone(), correlation, context, request);
                true
            }
            None => false,
        }
    }

    pub fn close_one(&self, registration: u64, error: Option<SessionError>) -> bool {
        let handler = self.lock().handlers.remove(&registration);
        match handler {
            Some(handler) => {
                log::debug!("session({}): handler registration {} closed", self.label, registration);
                handler.close(error.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self, error: Option<SessionError>) {
        let handlers = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.handlers)
        };
        for handler in handlers.into_values() {
            handler.close(error.as_ref());
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A request handler registered with the server.
pub struct Registration {
    session: Arc<SessionInner>,
    id: u64,
    path: TopicPath,
}

impl Registration {
    pub fn path(&self) -> &TopicPath {
        &self.path
    }

    /// Unregisters the handler, which then receives `on_close`.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let id = self.id;
        self.session.call(|connection| async move { connection.unregister_handler(id).await }).await?;
        self.session.handlers.close_one(id, None);
        Ok(())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).field("path", &self.path).finish()
    }
}

async fn resolve<R: TopicData>(
    session: &SessionInner,
    response: oneshot::Receiver<Result<TopicValue, SessionError>>,
) -> Result<R, SessionError> {
    let value = tokio::select! {
        _ = session.closed() => return Err(SessionError::SessionClosed),
        response = response => response.map_err(|_| SessionError::SessionClosed)??,
    };
    R::from_topic_value(&value).ok_or_else(|| SessionError::IncompatibleValue { expected: R::DATA_TYPE.to_string() })
}

async fn collect_responses<R, S>(session: Arc<SessionInner>, pending: Vec<PendingResponse>, mut stream: S)
where
    R: TopicData,
    S: ResponseStream<R>,
{
    let mut responses = JoinSet::new();
    for PendingResponse { session_id, response } in pending {
        responses.spawn(async move { (session_id, response.await) });
    }
    loop {
        tokio::select! {
            _ = session.closed() => {
                stream.on_error(&SessionError::SessionClosed);
                return;
            }
            next = responses.join_next() => match next {
                None => break,
                Some(Ok((session_id, Ok(Ok(value))))) => match R::from_topic_value(&value) {
                    Some(response) => stream.on_response(&session_id, response),
                    None => stream.on_response_error(
                        &session_id,
                        &SessionError::IncompatibleValue { expected: R::DATA_TYPE.to_string() },
                    ),
                },
                Some(Ok((session_id, Ok(Err(error))))) => stream.on_response_error(&session_id, &error),
                Some(Ok((session_id, Err(_)))) => stream.on_response_error(&session_id, &SessionError::SessionClosed),
                Some(Err(error)) => {
                    stream.on_error(&SessionError::internal(error.to_string()));
                    return;
                }
            }
        }
    }
    stream.on_close();
}

/// Messaging operations of a session.
#[derive(Clone)]
pub struct Messaging {
    session: Arc<SessionInner>,
}

impl Messaging {
    pub(crate) fn new(session: Arc<SessionInner>) -> Self {
        Self { session }
    }

    pub async fn add_request_handler<Req, Resp, H>(&self, path: &str, handler: H) -> Result<Registration, SessionError>
    where
        Req: TopicData,
        Resp: TopicData,
        H: RequestHandler<Req, Resp>,
    {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        let id = self
            .session
            .call(|connection| {
                let path = path.clone();
                async move { connection.register_handler(&path).await }
            })
            .await?;
        let handler: Arc<dyn ErasedHandler> = Arc::new(TypedHandler::<Req, Resp, H> { handler, _types: PhantomData });
        self.session.handlers.insert(id, handler)?;
        log::debug!("session({}): handler registration {} for {}", self.session.id, id, path);
        Ok(Registration { session: self.session.clone(), id, path })
    }

    /// Sends a request to the handler registered for the longest prefix of
    /// `path`.
    pub async fn send_request<Req: TopicData, Resp: TopicData>(&self, path: &str, request: Req) -> Result<Resp, SessionError> {
        let pending = self.dispatch(RequestTarget::Path, path, request).await?;
        self.single_response(pending, path).await
    }

    pub async fn send_request_to_session<Req: TopicData, Resp: TopicData>(
        &self,
        session_id: &SessionId,
        path: &str,
        request: Req,
    ) -> Result<Resp, SessionError> {
        let pending = self.dispatch(RequestTarget::Session(session_id.clone()), path, request).await?;
        self.single_response(pending, path).await
    }

    /// Sends a request to every session the filter selects. Resolves to the
    /// number of sessions sent to; responses then arrive on `stream`.
    pub async fn send_request_to_filter<Req, Resp, S>(
        &self,
        filter: &str,
        path: &str,
        request: Req,
        stream: S,
    ) -> Result<usize, SessionError>
    where
        Req: TopicData,
        Resp: TopicData,
        S: ResponseStream<Resp>,
    {
        let filter = SessionFilter::parse(filter)?;
        let pending = self.dispatch(RequestTarget::Filter(filter), path, request).await?;
        let count = pending.len();
        log::debug!("session({}): request on {} sent to {} sessions", self.session.id, path, count);
        tokio::spawn(collect_responses(self.session.clone(), pending, stream));
        Ok(count)
    }

    async fn dispatch<Req: TopicData>(
        &self,
        target: RequestTarget,
        path: &str,
        request: Req,
    ) -> Result<Vec<PendingResponse>, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        let request = request.into_topic_value();
        let target = &target;
        self.session
            .call(|connection| {
                let (path, request) = (path.clone(), request.clone());
                async move { connection.send_request(target, &path, request).await }
            })
            .await
    }

    async fn single_response<Resp: TopicData>(&self, pending: Vec<PendingResponse>, path: &str) -> Result<Resp, SessionError> {
        let pending = pending.into_iter().next().ok_or_else(|| SessionError::NoHandler { path: path.to_owned() })?;
        resolve(&self.session, pending.response).await
    }
}
