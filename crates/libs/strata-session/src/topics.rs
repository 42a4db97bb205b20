//! Subscriptions, value streams and fetch.

use crate::session::SessionInner;
use crate::stream::{ChannelStream, ErasedStream, StreamEvent, StreamHandle, TypedStream, ValueStream};
use std::sync::Arc;
use strata_topics::{
    FetchRequest, FetchSelection, FetchedTopic, IntoSelector, SessionError, TimeSeriesEvent, TopicData, TopicPath,
    TopicSelector, TopicSpecification, TopicValue,
};
use tokio::sync::mpsc;

/// One topic of a fetch result.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchTopicResult<T> {
    pub path: TopicPath,
    pub specification: TopicSpecification,
    pub value: Option<T>,
}

/// Topics in path order. `has_more` is set only when topics within the
/// requested range were left out because of a count or size limit.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchResult<T> {
    pub topics: Vec<FetchTopicResult<T>>,
    pub has_more: bool,
}

impl<T> FetchResult<T> {
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &TopicPath> {
        self.topics.iter().map(|topic| &topic.path)
    }

    fn convert(selection: FetchSelection, read: impl Fn(&TopicValue) -> Option<T>) -> Self {
        let topics = selection
            .topics
            .into_iter()
            .map(|FetchedTopic { path, specification, value }| FetchTopicResult {
                value: value.as_ref().and_then(&read),
                path,
                specification,
            })
            .collect();
        Self { topics, has_more: selection.has_more }
    }
}

/// Topic subscription and retrieval for a session.
#[derive(Clone)]
pub struct Topics {
    session: Arc<SessionInner>,
}

impl Topics {
    pub(crate) fn new(session: Arc<SessionInner>) -> Self {
        Self { session }
    }

    /// Subscribes to every topic the selector selects, now or later.
    pub async fn subscribe(&self, selector: impl IntoSelector) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let selector = selector.into_selector()?;
        log::debug!("session({}): subscribe {}", self.session.id, selector);
        self.session
            .call(|connection| {
                let selector = selector.clone();
                async move { connection.subscribe(&selector).await }
            })
            .await
    }

    pub async fn unsubscribe(&self, selector: impl IntoSelector) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let selector = selector.into_selector()?;
        log::debug!("session({}): unsubscribe {}", self.session.id, selector);
        self.session
            .call(|connection| {
                let selector = selector.clone();
                async move { connection.unsubscribe(&selector).await }
            })
            .await
    }

    /// Adds a stream receiving the events of subscribed topics the selector
    /// selects and whose values are readable as `T`.
    pub fn add_stream<T, S>(&self, selector: impl IntoSelector, stream: S) -> Result<StreamHandle, SessionError>
    where
        T: TopicData,
        S: ValueStream<T>,
    {
        let selector = selector.into_selector()?;
        self.register::<T>(Some(selector), Box::new(TypedStream::<T, S>::new(stream)))
    }

    /// Adds a stream receiving events for topics readable as `T` that no
    /// other stream selects.
    pub fn add_fallback_stream<T, S>(&self, stream: S) -> Result<StreamHandle, SessionError>
    where
        T: TopicData,
        S: ValueStream<T>,
    {
        self.register::<T>(None, Box::new(TypedStream::<T, S>::new(stream)))
    }

    /// Like [`Topics::add_stream`], delivering events on a channel.
    pub fn add_stream_channel<T: TopicData>(
        &self,
        selector: impl IntoSelector,
    ) -> Result<(StreamHandle, mpsc::UnboundedReceiver<StreamEvent<T>>), SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.add_stream::<T, _>(selector, ChannelStream::new(tx))?;
        Ok((handle, rx))
    }

    pub fn add_fallback_stream_channel<T: TopicData>(
        &self,
    ) -> Result<(StreamHandle, mpsc::UnboundedReceiver<StreamEvent<T>>), SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.add_fallback_stream::<T, _>(ChannelStream::new(tx))?;
        Ok((handle, rx))
    }

    /// Removes a stream, which then receives `on_close`. False if the
    /// stream was already removed.
    pub fn remove_stream(&self, handle: StreamHandle) -> bool {
        self.session.dispatcher.remove(handle)
    }

    /// Last value received for a subscribed topic.
    pub fn cached_value(&self, path: &TopicPath) -> Option<TopicValue> {
        self.session.dispatcher.cached_value(path)
    }

    /// Fetches paths and specifications of the selected topics.
    pub async fn fetch(
        &self,
        selector: impl IntoSelector,
        request: &FetchRequest,
    ) -> Result<FetchResult<TopicValue>, SessionError> {
        let selection = self.run_fetch(selector, request).await?;
        Ok(FetchResult::convert(selection, |_| None))
    }

    /// Fetches the selected topics readable as `T`, with their values.
    pub async fn fetch_values<T: TopicData>(
        &self,
        selector: impl IntoSelector,
        request: &FetchRequest,
    ) -> Result<FetchResult<T>, SessionError> {
        let request = request.with_values(T::DATA_TYPE)?;
        let selection = self.run_fetch(selector, &request).await?;
        Ok(FetchResult::convert(selection, T::from_topic_value))
    }

    /// Fetches time series topics with their latest event. Other types in
    /// the request's type filter are ignored.
    pub async fn fetch_time_series(
        &self,
        selector: impl IntoSelector,
        request: &FetchRequest,
    ) -> Result<FetchResult<TimeSeriesEvent>, SessionError> {
        let request = request.with_time_series_values();
        let selection = self.run_fetch(selector, &request).await?;
        Ok(FetchResult::convert(selection, TimeSeriesEvent::from_topic_value))
    }

    async fn run_fetch(&self, selector: impl IntoSelector, request: &FetchRequest) -> Result<FetchSelection, SessionError> {
        self.session.ensure_open()?;
        let selector: TopicSelector = selector.into_selector()?;
        let request = request.capped_at(self.session.config.maximum_message_size);
        let selection = self
            .session
            .call(|connection| {
                let (selector, request) = (selector.clone(), request.clone());
                async move { connection.fetch(&selector, &request).await }
            })
            .await?;
        log::trace!(
            "session({}): fetch {} returned {} of {} topics",
            self.session.id,
            selector,
            selection.topics.len(),
            selection.matched
        );
        Ok(selection)
    }

    fn register<T: TopicData>(
        &self,
        selector: Option<TopicSelector>,
        stream: Box<dyn ErasedStream>,
    ) -> Result<StreamHandle, SessionError> {
        self.session.ensure_open()?;
        self.session.dispatcher.add(selector, T::DATA_TYPE, stream)
    }
}
