//! The seam between the session engine and a server.
//!
//! A [`Connector`] establishes connections; a [`ServerConnection`] carries
//! the request half of every operation. Everything the server pushes arrives
//! as [`ConnectionEvent`]s on the single ordered channel handed to the
//! connector, which the session's event loop drains.

use crate::config::SessionConfig;
use crate::lock::LockScope;
use crate::messaging::{RequestContext, RequestTarget};
use crate::state::CloseReason;
use crate::stream::UnsubscribeReason;
use crate::update::TopicCreationResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strata_topics::{
    DataType, EventMetadata, FetchRequest, FetchSelection, QueryResult, RangeQuery, SessionError, TopicPath,
    TopicSelector, TopicSpecification, TopicValue, UpdateConstraint,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server pushes, in the order the server produced them.
#[derive(Debug)]
pub enum ConnectionEvent {
    Subscribed { path: TopicPath, specification: TopicSpecification },
    Value { path: TopicPath, value: TopicValue },
    Unsubscribed { path: TopicPath, reason: UnsubscribeReason },
    Request { correlation: u64, registration: u64, context: RequestContext, request: TopicValue },
    RegistrationClosed { registration: u64 },
    ConnectionLost,
    Reconnected,
    Closed { reason: CloseReason },
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStreamBinding {
    pub path: TopicPath,
    pub data_type: DataType,
    /// Present when the stream may create its topic.
    pub specification: Option<TopicSpecification>,
    pub constraint: UpdateConstraint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundStream {
    pub id: u64,
    pub result: TopicCreationResult,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockGrant {
    pub name: String,
    pub sequence: i64,
    pub scope: LockScope,
}

/// A response one session owes to a request.
#[derive(Debug)]
pub struct PendingResponse {
    pub session_id: SessionId,
    pub response: oneshot::Receiver<Result<TopicValue, SessionError>>,
}

/// Request half of a live connection. Operations on a connection that has
/// been lost fail with [`SessionError::Disconnected`].
#[async_trait]
pub trait ServerConnection: Send + Sync {
    fn session_id(&self) -> SessionId;

    async fn subscribe(&self, selector: &TopicSelector) -> Result<(), SessionError>;

    async fn unsubscribe(&self, selector: &TopicSelector) -> Result<(), SessionError>;

    async fn fetch(&self, selector: &TopicSelector, request: &FetchRequest) -> Result<FetchSelection, SessionError>;

    async fn add_topic(
        &self,
        path: &TopicPath,
        specification: &TopicSpecification,
    ) -> Result<TopicCreationResult, SessionError>;

    /// Removes every topic the selector selects, returning how many went.
    async fn remove_topics(&self, selector: &TopicSelector) -> Result<usize, SessionError>;

    async fn set(
        &self,
        path: &TopicPath,
        value: TopicValue,
        constraint: &UpdateConstraint,
    ) -> Result<(), SessionError>;

    async fn add_and_set(
        &self,
        path: &TopicPath,
        specification: &TopicSpecification,
        value: TopicValue,
        constraint: &UpdateConstraint,
    ) -> Result<TopicCreationResult, SessionError>;

    /// Binds an update stream, applying `value` if given. Supersedes any
    /// stream previously bound to the same path.
    async fn bind_update_stream(
        &self,
        binding: &UpdateStreamBinding,
        value: Option<TopicValue>,
    ) -> Result<BoundStream, SessionError>;

    async fn update_stream_set(&self, stream: u64, value: TopicValue) -> Result<(), SessionError>;

    async fn validate_update_stream(&self, stream: u64) -> Result<(), SessionError>;

    async fn append(&self, path: &TopicPath, value: TopicValue) -> Result<EventMetadata, SessionError>;

    async fn edit(
        &self,
        path: &TopicPath,
        original_sequence: u64,
        value: TopicValue,
    ) -> Result<EventMetadata, SessionError>;

    async fn range_query(&self, path: &TopicPath, query: &RangeQuery) -> Result<QueryResult, SessionError>;

    /// Completes once the lock is granted. `request` identifies the
    /// acquisition within the session so it can be withdrawn on its own.
    async fn acquire_lock(&self, request: u64, name: &str, scope: LockScope) -> Result<LockGrant, SessionError>;

    /// Withdraws acquisition `request` of `name` if it is still waiting.
    async fn cancel_lock_request(&self, request: u64, name: &str) -> Result<bool, SessionError>;

    /// Releases the acquisition `sequence` of `name`; true if it was owned.
    async fn release_lock(&self, name: &str, sequence: i64) -> Result<bool, SessionError>;

    async fn register_handler(&self, path: &TopicPath) -> Result<u64, SessionError>;

    async fn unregister_handler(&self, registration: u64) -> Result<(), SessionError>;

    async fn send_request(
        &self,
        target: &RequestTarget,
        path: &TopicPath,
        request: TopicValue,
    ) -> Result<Vec<PendingResponse>, SessionError>;

    async fn respond(&self, correlation: u64, response: Result<TopicValue, String>) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: EventSender,
    ) -> Result<Arc<dyn ServerConnection>, SessionError>;

    /// Resumes an existing session after connection loss. Events the server
    /// queued meanwhile are delivered before [`ConnectionEvent::Reconnected`].
    async fn reconnect(
        &self,
        session_id: &SessionId,
        events: EventSender,
    ) -> Result<Arc<dyn ServerConnection>, SessionError>;
}
