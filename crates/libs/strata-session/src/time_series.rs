use crate::session::SessionInner;
use std::sync::Arc;
use strata_topics::{EventMetadata, QueryResult, RangeQuery, SessionError, TopicData, TopicPath};

/// Time series operations of a session.
#[derive(Clone)]
pub struct TimeSeries {
    session: Arc<SessionInner>,
}

impl TimeSeries {
    pub(crate) fn new(session: Arc<SessionInner>) -> Self {
        Self { session }
    }

    /// Appends an event. The value must match the topic's event value type.
    pub async fn append<T: TopicData>(&self, path: &str, value: T) -> Result<EventMetadata, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        let value = value.into_topic_value();
        self.session
            .call(|connection| {
                let (path, value) = (path.clone(), value.clone());
                async move { connection.append(&path, value).await }
            })
            .await
    }

    /// Records an edit of the event with `original_sequence`. Editing an
    /// edit edits its original.
    pub async fn edit<T: TopicData>(
        &self,
        path: &str,
        original_sequence: u64,
        value: T,
    ) -> Result<EventMetadata, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        let value = value.into_topic_value();
        self.session
            .call(|connection| {
                let (path, value) = (path.clone(), value.clone());
                async move { connection.edit(&path, original_sequence, value).await }
            })
            .await
    }

    pub async fn range_query(&self, path: &str, query: &RangeQuery) -> Result<QueryResult, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        let result = self
            .session
            .call(|connection| {
                let path = path.clone();
                async move { connection.range_query(&path, query).await }
            })
            .await?;
        log::trace!(
            "session({}): range query on {} selected {} returned {}",
            self.session.id,
            path,
            result.selected_count(),
            result.events().len()
        );
        Ok(result)
    }
}
