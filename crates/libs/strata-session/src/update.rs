//! Topic updates: one-shot `set`, topic creation and removal, and update
//! streams.
//!
//! An update stream binds to one topic on its first `set` (or `validate`)
//! and stays live until any operation on it fails. From then on it is
//! invalidated for good: every call fails locally with
//! [`SessionError::InvalidUpdateStream`] without contacting the server.

use crate::connection::UpdateStreamBinding;
use crate::session::SessionInner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use strata_topics::{
    DataType, IntoSelector, SessionError, TopicData, TopicPath, TopicSpecification, TopicValue, UpdateConstraint,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCreationResult {
    Created,
    Exists,
}

/// Checks that values of `data_type` may be written to topics of
/// `specification`.
fn check_writable(data_type: DataType, specification: &TopicSpecification) -> Result<(), SessionError> {
    specification.validate()?;
    if data_type.writable_topic_type() != Some(specification.topic_type()) {
        return Err(SessionError::invalid_argument(
            "specification",
            format!("{} values cannot be written to {} topics", data_type, specification.topic_type()),
        ));
    }
    Ok(())
}

/// One-shot updates and topic control.
#[derive(Clone)]
pub struct TopicUpdate {
    session: Arc<SessionInner>,
}

impl TopicUpdate {
    pub(crate) fn new(session: Arc<SessionInner>) -> Self {
        Self { session }
    }

    /// Sets the value of an existing topic.
    pub async fn set<T: TopicData>(&self, path: &str, value: T) -> Result<(), SessionError> {
        self.set_constrained(path, value, &UpdateConstraint::unconstrained()).await
    }

    pub async fn set_constrained<T: TopicData>(
        &self,
        path: &str,
        value: T,
        constraint: &UpdateConstraint,
    ) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        let value = value.into_topic_value();
        self.session
            .call(|connection| {
                let (path, value) = (path.clone(), value.clone());
                async move { connection.set(&path, value, constraint).await }
            })
            .await
    }

    /// Creates the topic if needed, then sets its value.
    pub async fn add_and_set<T: TopicData>(
        &self,
        path: &str,
        specification: &TopicSpecification,
        value: T,
    ) -> Result<TopicCreationResult, SessionError> {
        self.add_and_set_constrained(path, specification, value, &UpdateConstraint::unconstrained()).await
    }

    pub async fn add_and_set_constrained<T: TopicData>(
        &self,
        path: &str,
        specification: &TopicSpecification,
        value: T,
        constraint: &UpdateConstraint,
    ) -> Result<TopicCreationResult, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        check_writable(T::DATA_TYPE, specification)?;
        let value = value.into_topic_value();
        self.session
            .call(|connection| {
                let (path, value) = (path.clone(), value.clone());
                async move { connection.add_and_set(&path, specification, value, constraint).await }
            })
            .await
    }

    pub async fn add_topic(
        &self,
        path: &str,
        specification: &TopicSpecification,
    ) -> Result<TopicCreationResult, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        specification.validate()?;
        self.session
            .call(|connection| {
                let path = path.clone();
                async move { connection.add_topic(&path, specification).await }
            })
            .await
    }

    /// Removes every topic the selector selects. Resolves to the number
    /// removed.
    pub async fn remove_topics(&self, selector: impl IntoSelector) -> Result<usize, SessionError> {
        self.session.ensure_open()?;
        let selector = selector.into_selector()?;
        self.session
            .call(|connection| {
                let selector = selector.clone();
                async move { connection.remove_topics(&selector).await }
            })
            .await
    }

    pub fn update_stream_builder(&self) -> UpdateStreamBuilder {
        UpdateStreamBuilder { session: self.session.clone(), specification: None, constraint: None }
    }
}

/// Immutable builder for [`UpdateStream`]s.
#[derive(Clone)]
pub struct UpdateStreamBuilder {
    session: Arc<SessionInner>,
    specification: Option<TopicSpecification>,
    constraint: Option<UpdateConstraint>,
}

impl UpdateStreamBuilder {
    /// Streams built with a specification create their topic if it does
    /// not exist.
    pub fn specification(&self, specification: TopicSpecification) -> Self {
        Self { specification: Some(specification), ..self.clone() }
    }

    /// Constraint checked when the stream binds.
    pub fn constraint(&self, constraint: UpdateConstraint) -> Self {
        Self { constraint: Some(constraint), ..self.clone() }
    }

    pub fn reset(&self) -> Self {
        Self { session: self.session.clone(), specification: None, constraint: None }
    }

    pub fn build<T: TopicData>(&self, path: &str) -> Result<UpdateStream<T>, SessionError> {
        self.session.ensure_open()?;
        let path = TopicPath::new(path)?;
        if T::DATA_TYPE.writable_topic_type().is_none() {
            return Err(SessionError::invalid_argument("data_type", format!("{} topics cannot be set", T::DATA_TYPE)));
        }
        if let Some(specification) = &self.specification {
            check_writable(T::DATA_TYPE, specification)?;
        }
        let binding = UpdateStreamBinding {
            path,
            data_type: T::DATA_TYPE,
            specification: self.specification.clone(),
            constraint: self.constraint.clone().unwrap_or_default(),
        };
        Ok(UpdateStream {
            session: self.session.clone(),
            binding,
            phase: tokio::sync::Mutex::new(Phase::Unbound),
            value: Mutex::new(None),
            _data: PhantomData,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Phase {
    Unbound,
    Live { id: u64 },
    Invalidated { cause: SessionError },
}

/// A stream of updates to one topic.
pub struct UpdateStream<T: TopicData> {
    session: Arc<SessionInner>,
    binding: UpdateStreamBinding,
    phase: tokio::sync::Mutex<Phase>,
    value: Mutex<Option<T>>,
    _data: PhantomData<fn() -> T>,
}

impl<T: TopicData> UpdateStream<T> {
    pub fn path(&self) -> &TopicPath {
        &self.binding.path
    }

    /// The last value this stream set successfully.
    pub fn value(&self) -> Option<T> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn is_valid(&self) -> bool {
        !matches!(*self.phase.lock().await, Phase::Invalidated { .. })
    }

    /// Sets the topic value. The first call binds the stream and reports
    /// whether it created the topic; later calls report `Exists`.
    pub async fn set(&self, value: T) -> Result<TopicCreationResult, SessionError> {
        self.session.ensure_open()?;
        let mut phase = self.phase.lock().await;
        let topic_value = value.clone().into_topic_value();
        let outcome = match phase.clone() {
            Phase::Invalidated { .. } => return Err(SessionError::InvalidUpdateStream),
            Phase::Unbound => self.bind(&mut phase, Some(topic_value)).await,
            Phase::Live { id } => {
                self.session
                    .call(|connection| {
                        let value = topic_value.clone();
                        async move { connection.update_stream_set(id, value).await }
                    })
                    .await
                    .map(|()| TopicCreationResult::Exists)
            }
        };
        match outcome {
            Ok(result) => {
                *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                Ok(result)
            }
            Err(error) => Err(self.invalidate(&mut phase, error)),
        }
    }

    /// Binds the stream without setting a value, or checks that a bound
    /// stream is still live.
    pub async fn validate(&self) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let mut phase = self.phase.lock().await;
        let outcome = match phase.clone() {
            Phase::Invalidated { .. } => return Err(SessionError::InvalidUpdateStream),
            Phase::Unbound => self.bind(&mut phase, None).await.map(|_| ()),
            Phase::Live { id } => {
                self.session.call(|connection| async move { connection.validate_update_stream(id).await }).await
            }
        };
        outcome.map_err(|error| self.invalidate(&mut phase, error))
    }

    /// Re-binds a stream invalidated by a retryable failure, replaying the
    /// last value it set.
    pub async fn recover(&self) -> Result<(), SessionError> {
        self.session.ensure_open()?;
        let mut phase = self.phase.lock().await;
        match &*phase {
            Phase::Invalidated { cause } if cause.is_retryable() => {}
            Phase::Invalidated { .. } => return Err(SessionError::InvalidUpdateStream),
            _ => return Ok(()),
        }
        let replay = self.value().map(TopicData::into_topic_value);
        *phase = Phase::Unbound;
        match self.bind(&mut phase, replay).await {
            Ok(_) => {
                log::debug!("session({}): update stream for {} recovered", self.session.id, self.binding.path);
                Ok(())
            }
            Err(error) => Err(self.invalidate(&mut phase, error)),
        }
    }

    async fn bind(&self, phase: &mut Phase, value: Option<TopicValue>) -> Result<TopicCreationResult, SessionError> {
        let binding = &self.binding;
        let bound = self
            .session
            .call(|connection| {
                let value = value.clone();
                async move { connection.bind_update_stream(binding, value).await }
            })
            .await
            .map_err(|error| self.first_failure(error))?;
        log::trace!("session({}): update stream {} bound to {}", self.session.id, bound.id, binding.path);
        *phase = Phase::Live { id: bound.id };
        Ok(bound.result)
    }

    /// A stream that may create its topic reports an existing topic it
    /// cannot use as `IncompatibleExistingTopic`.
    fn first_failure(&self, error: SessionError) -> SessionError {
        match error {
            SessionError::NoSuchTopic { path } | SessionError::IncompatibleTopic { path, .. }
                if self.binding.specification.is_some() =>
            {
                SessionError::IncompatibleExistingTopic { path }
            }
            other => other,
        }
    }

    fn invalidate(&self, phase: &mut Phase, error: SessionError) -> SessionError {
        log::debug!("session({}): update stream for {} invalidated: {}", self.session.id, self.binding.path, error);
        *phase = Phase::Invalidated { cause: error.clone() };
        error
    }
}

impl<T: TopicData> fmt::Debug for UpdateStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateStream")
            .field("path", &self.binding.path)
            .field("data_type", &self.binding.data_type)
            .field("creates", &self.binding.specification.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_topics::TopicType;

    #[test]
    fn writable_check_matches_data_type_to_topic_type() {
        assert!(check_writable(DataType::String, &TopicSpecification::new(TopicType::String)).is_ok());
        assert!(matches!(
            check_writable(DataType::Json, &TopicSpecification::new(TopicType::String)),
            Err(SessionError::InvalidArgument { .. })
        ));
        assert!(matches!(
            check_writable(DataType::String, &TopicSpecification::new(TopicType::TimeSeries)),
            Err(SessionError::InvalidTopicSpecification { .. })
        ));
    }
}
