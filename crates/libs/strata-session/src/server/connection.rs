use super::LocalServer;
use crate::config::SessionConfig;
use crate::connection::{
    BoundStream, Connector, EventSender, LockGrant, PendingResponse, ServerConnection, SessionId,
    UpdateStreamBinding,
};
use crate::lock::LockScope;
use crate::messaging::RequestTarget;
use crate::update::TopicCreationResult;
use async_trait::async_trait;
use std::sync::Arc;
use strata_topics::{
    EventMetadata, FetchRequest, FetchSelection, QueryResult, RangeQuery, SessionError, TopicPath, TopicSelector,
    TopicSpecification, TopicValue, UpdateConstraint,
};
use tokio::sync::oneshot;

/// Connects sessions to a [`LocalServer`].
#[derive(Clone, Debug)]
pub struct LocalConnector {
    server: LocalServer,
}

impl LocalConnector {
    pub fn new(server: LocalServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: EventSender,
    ) -> Result<Arc<dyn ServerConnection>, SessionError> {
        let session = self.server.lock().open_session(config, events);
        Ok(Arc::new(LocalConnection { server: self.server.clone(), session }))
    }

    async fn reconnect(
        &self,
        session_id: &SessionId,
        events: EventSender,
    ) -> Result<Arc<dyn ServerConnection>, SessionError> {
        self.server.lock().reconnect(session_id, events)?;
        Ok(Arc::new(LocalConnection { server: self.server.clone(), session: session_id.clone() }))
    }
}

/// One session's connection to a [`LocalServer`].
#[derive(Debug)]
pub struct LocalConnection {
    server: LocalServer,
    session: SessionId,
}

#[async_trait]
impl ServerConnection for LocalConnection {
    fn session_id(&self) -> SessionId {
        self.session.clone()
    }

    async fn subscribe(&self, selector: &TopicSelector) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.subscribe(&self.session, selector);
        Ok(())
    }

    async fn unsubscribe(&self, selector: &TopicSelector) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.unsubscribe(&self.session, selector);
        Ok(())
    }

    async fn fetch(&self, selector: &TopicSelector, request: &FetchRequest) -> Result<FetchSelection, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        Ok(state.fetch(selector, request))
    }

    async fn add_topic(
        &self,
        path: &TopicPath,
        specification: &TopicSpecification,
    ) -> Result<TopicCreationResult, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.add_topic(&self.session, path, specification)
    }

    async fn remove_topics(&self, selector: &TopicSelector) -> Result<usize, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.remove_topics(&self.session, selector)
    }

    async fn set(
        &self,
        path: &TopicPath,
        value: TopicValue,
        constraint: &UpdateConstraint,
    ) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.set(&self.session, path, value, constraint)
    }

    async fn add_and_set(
        &self,
        path: &TopicPath,
        specification: &TopicSpecification,
        value: TopicValue,
        constraint: &UpdateConstraint,
    ) -> Result<TopicCreationResult, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.add_and_set(&self.session, path, specification, value, constraint)
    }

    async fn bind_update_stream(
        &self,
        binding: &UpdateStreamBinding,
        value: Option<TopicValue>,
    ) -> Result<BoundStream, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.bind_update_stream(&self.session, binding, value)
    }

    async fn update_stream_set(&self, stream: u64, value: TopicValue) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.update_stream_set(&self.session, stream, value)
    }

    async fn validate_update_stream(&self, stream: u64) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.stream_path(stream).map(drop)
    }

    async fn append(&self, path: &TopicPath, value: TopicValue) -> Result<EventMetadata, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.append(&self.session, path, value)
    }

    async fn edit(
        &self,
        path: &TopicPath,
        original_sequence: u64,
        value: TopicValue,
    ) -> Result<EventMetadata, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.edit(&self.session, path, original_sequence, value)
    }

    async fn range_query(&self, path: &TopicPath, query: &RangeQuery) -> Result<QueryResult, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.range_query(path, query)
    }

    async fn acquire_lock(&self, request: u64, name: &str, scope: LockScope) -> Result<LockGrant, SessionError> {
        let granted = {
            let mut state = self.server.lock();
            state.begin(&self.session)?;
            let (tx, rx) = oneshot::channel();
            state.locks.acquire(&self.session, request, name, scope, tx);
            rx
        };
        granted.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    async fn cancel_lock_request(&self, request: u64, name: &str) -> Result<bool, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        Ok(state.locks.cancel(&self.session, request, name))
    }

    async fn release_lock(&self, name: &str, sequence: i64) -> Result<bool, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        Ok(state.locks.release(&self.session, name, sequence))
    }

    async fn register_handler(&self, path: &TopicPath) -> Result<u64, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        Ok(state.register_handler(&self.session, path))
    }

    async fn unregister_handler(&self, registration: u64) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.unregister_handler(&self.session, registration);
        Ok(())
    }

    async fn send_request(
        &self,
        target: &RequestTarget,
        path: &TopicPath,
        request: TopicValue,
    ) -> Result<Vec<PendingResponse>, SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.send_request(&self.session, target, path, request)
    }

    async fn respond(&self, correlation: u64, response: Result<TopicValue, String>) -> Result<(), SessionError> {
        let mut state = self.server.lock();
        state.begin(&self.session)?;
        state.respond(correlation, response);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.server.lock().remove_session(&self.session, None);
        Ok(())
    }
}
