use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use strata_topics::{SessionError, TopicData, TopicPath, TopicSpecification, TopicValue};
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeReason {
    /// The session asked to unsubscribe.
    Requested,
    /// Another session or the server unsubscribed this session.
    Control,
    /// The topic was removed.
    Removal,
    /// Permission to read the topic was lost.
    Authorization,
    /// The server could not keep up delivering to this session.
    BackPressure,
    /// Session tree branch mappings changed. Never produced by this engine.
    BranchMappings,
    /// The subscription is being re-established and will resume.
    SubscriptionRefresh,
    /// A more specific stream took over the topic from a fallback stream.
    StreamChange,
    /// The server gave no reason this engine recognises.
    Unknown,
}

impl fmt::Display for UnsubscribeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Control => "control",
            Self::Removal => "removal",
            Self::Authorization => "authorization",
            Self::BackPressure => "back_pressure",
            Self::BranchMappings => "branch_mappings",
            Self::SubscriptionRefresh => "subscription_refresh",
            Self::StreamChange => "stream_change",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Receives the events of the topics a stream selects.
///
/// For each topic, `on_subscription` precedes the first `on_value` and
/// `on_unsubscription` is the last call until the topic is subscribed
/// again. Exactly one of `on_close` or `on_error` ends the stream.
pub trait ValueStream<T: TopicData>: Send + 'static {
    fn on_subscription(&mut self, _path: &TopicPath, _specification: &TopicSpecification) {}

    fn on_value(&mut self, path: &TopicPath, specification: &TopicSpecification, old: Option<&T>, new: &T);

    fn on_unsubscription(
        &mut self,
        _path: &TopicPath,
        _specification: &TopicSpecification,
        _reason: UnsubscribeReason,
    ) {
    }

    fn on_close(&mut self) {}

    fn on_error(&mut self, _error: &SessionError) {}
}

/// Identifies a registered stream for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub(crate) u64);

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Stream callbacks as values, for [`crate::Topics::add_stream_channel`].
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent<T> {
    Subscribed { path: TopicPath, specification: TopicSpecification },
    Value { path: TopicPath, specification: TopicSpecification, old: Option<T>, new: T },
    Unsubscribed { path: TopicPath, specification: TopicSpecification, reason: UnsubscribeReason },
    Closed,
    Failed(SessionError),
}

pub(crate) struct ChannelStream<T> {
    tx: mpsc::UnboundedSender<StreamEvent<T>>,
}

impl<T> ChannelStream<T> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StreamEvent<T>>) -> Self {
        Self { tx }
    }
}

impl<T: TopicData> ValueStream<T> for ChannelStream<T> {
    fn on_subscription(&mut self, path: &TopicPath, specification: &TopicSpecification) {
        let _ = self.tx.send(StreamEvent::Subscribed { path: path.clone(), specification: specification.clone() });
    }

    fn on_value(&mut self, path: &TopicPath, specification: &TopicSpecification, old: Option<&T>, new: &T) {
        let _ = self.tx.send(StreamEvent::Value {
            path: path.clone(),
            specification: specification.clone(),
            old: old.cloned(),
            new: new.clone(),
        });
    }

    fn on_unsubscription(&mut self, path: &TopicPath, specification: &TopicSpecification, reason: UnsubscribeReason) {
        let _ = self.tx.send(StreamEvent::Unsubscribed {
            path: path.clone(),
            specification: specification.clone(),
            reason,
        });
    }

    fn on_close(&mut self) {
        let _ = self.tx.send(StreamEvent::Closed);
    }

    fn on_error(&mut self, error: &SessionError) {
        let _ = self.tx.send(StreamEvent::Failed(error.clone()));
    }
}

/// What the dispatcher queues for one stream.
#[derive(Clone, Debug)]
pub(crate) enum Notification {
    Subscription { path: TopicPath, specification: TopicSpecification },
    Value { path: TopicPath, specification: TopicSpecification, old: Option<TopicValue>, new: TopicValue },
    Unsubscription { path: TopicPath, specification: TopicSpecification, reason: UnsubscribeReason },
    Close,
    Error(SessionError),
}

impl Notification {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Notification::Close | Notification::Error(_))
    }
}

/// A typed stream behind a data-type independent interface.
pub(crate) trait ErasedStream: Send + 'static {
    /// Returns false once the stream has been terminated.
    fn deliver(&mut self, notification: Notification) -> bool;
}

pub(crate) struct TypedStream<T, S> {
    stream: S,
    _data: PhantomData<fn() -> T>,
}

impl<T, S> TypedStream<T, S> {
    pub(crate) fn new(stream: S) -> Self {
        Self { stream, _data: PhantomData }
    }
}

impl<T: TopicData, S: ValueStream<T>> ErasedStream for TypedStream<T, S> {
    fn deliver(&mut self, notification: Notification) -> bool {
        match notification {
            Notification::Subscription { path, specification } => {
                self.stream.on_subscription(&path, &specification);
            }
            Notification::Value { path, specification, old, new } => match T::from_topic_value(&new) {
                Some(new) => {
                    let old = old.as_ref().and_then(T::from_topic_value);
                    self.stream.on_value(&path, &specification, old.as_ref(), &new);
                }
                None => log::warn!("stream: value for {} not readable as {}", path, T::DATA_TYPE),
            },
            Notification::Unsubscription { path, specification, reason } => {
                self.stream.on_unsubscription(&path, &specification, reason);
            }
            Notification::Close => {
                self.stream.on_close();
                return false;
            }
            Notification::Error(error) => {
                self.stream.on_error(&error);
                return false;
            }
        }
        true
    }
}
