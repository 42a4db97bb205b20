//! Value stream registry.
//!
//! Decides, for every subscription event and every stream registration
//! change, which streams receive which notifications. It performs no I/O and
//! never calls a stream; the dispatcher executes the deliveries it returns,
//! in order.
//!
//! A *specific* stream has a selector. A *fallback* stream has none and
//! serves a topic only while no specific stream selects it. Within each
//! delivery list streams appear in registration order.

use crate::stream::{Notification, UnsubscribeReason};
use std::collections::{BTreeMap, BTreeSet};
use strata_topics::{DataType, TopicPath, TopicSelector, TopicSpecification, TopicValue};

pub(crate) type StreamId = u64;

#[derive(Debug)]
pub(crate) struct Delivery {
    pub stream: StreamId,
    pub notification: Notification,
}

#[derive(Debug)]
struct Registration {
    selector: Option<TopicSelector>,
    data_type: DataType,
}

impl Registration {
    fn accepts(&self, specification: &TopicSpecification) -> bool {
        self.data_type.can_read(specification.topic_type())
    }
}

#[derive(Debug)]
struct TopicEntry {
    specification: TopicSpecification,
    value: Option<TopicValue>,
    specific: BTreeSet<StreamId>,
    fallback: BTreeSet<StreamId>,
}

impl TopicEntry {
    fn active(&self) -> impl Iterator<Item = StreamId> + '_ {
        // Only one of the two sets is ever populated.
        self.specific.iter().chain(self.fallback.iter()).copied()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    next_id: StreamId,
    streams: BTreeMap<StreamId, Registration>,
    topics: BTreeMap<TopicPath, TopicEntry>,
}

impl Registry {
    pub fn add(&mut self, selector: Option<TopicSelector>, data_type: DataType) -> (StreamId, Vec<Delivery>) {
        self.next_id += 1;
        let id = self.next_id;
        let registration = Registration { selector, data_type };
        let mut deliveries = Vec::new();

        for (path, entry) in self.topics.iter_mut() {
            if !registration.accepts(&entry.specification) {
                continue;
            }
            match &registration.selector {
                Some(selector) => {
                    if !selector.selects_path(path) {
                        continue;
                    }
                    for fallback in std::mem::take(&mut entry.fallback) {
                        deliveries.push(Delivery {
                            stream: fallback,
                            notification: Notification::Unsubscription {
                                path: path.clone(),
                                specification: entry.specification.clone(),
                                reason: UnsubscribeReason::StreamChange,
                            },
                        });
                    }
                    entry.specific.insert(id);
                }
                None => {
                    if !entry.specific.is_empty() {
                        continue;
                    }
                    entry.fallback.insert(id);
                }
            }
            replay(&mut deliveries, id, path, entry);
        }

        self.streams.insert(id, registration);
        (id, deliveries)
    }

    /// Removes a stream. The returned deliveries start with the stream's own
    /// `Close`, followed by any fallback hand-offs.
    pub fn remove(&mut self, id: StreamId) -> Option<Vec<Delivery>> {
        self.streams.remove(&id)?;
        let mut deliveries = vec![Delivery { stream: id, notification: Notification::Close }];

        let mut orphaned = Vec::new();
        for (path, entry) in self.topics.iter_mut() {
            entry.fallback.remove(&id);
            if entry.specific.remove(&id) && entry.specific.is_empty() {
                orphaned.push(path.clone());
            }
        }
        for path in orphaned {
            let fallbacks = self.fallbacks_for(&path);
            if let Some(entry) = self.topics.get_mut(&path) {
                for fallback in fallbacks {
                    entry.fallback.insert(fallback);
                    replay(&mut deliveries, fallback, &path, entry);
                }
            }
        }
        Some(deliveries)
    }

    /// A subscription to a topic already known under another specification
    /// ends the old one first, so streams never see two subscriptions in a
    /// row.
    pub fn on_subscription(&mut self, path: TopicPath, specification: TopicSpecification) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        if let Some(existing) = self.topics.get(&path) {
            if existing.specification == specification {
                return deliveries;
            }
            if let Some(ended) = self.on_unsubscription(&path, UnsubscribeReason::SubscriptionRefresh) {
                deliveries = ended;
            }
        }
        let specific: BTreeSet<StreamId> = self
            .streams
            .iter()
            .filter(|(_, registration)| {
                registration.accepts(&specification)
                    && registration.selector.as_ref().is_some_and(|selector| selector.selects_path(&path))
            })
            .map(|(id, _)| *id)
            .collect();
        let fallback = if specific.is_empty() {
            self.streams
                .iter()
                .filter(|(_, registration)| registration.selector.is_none() && registration.accepts(&specification))
                .map(|(id, _)| *id)
                .collect()
        } else {
            BTreeSet::new()
        };
        let entry = TopicEntry { specification, value: None, specific, fallback };
        deliveries.extend(entry.active().map(|stream| Delivery {
            stream,
            notification: Notification::Subscription { path: path.clone(), specification: entry.specification.clone() },
        }));
        self.topics.insert(path, entry);
        deliveries
    }

    /// `None` when the session is not subscribed to `path`.
    pub fn on_value(&mut self, path: &TopicPath, value: TopicValue) -> Option<Vec<Delivery>> {
        let entry = self.topics.get_mut(path)?;
        let old = entry.value.replace(value.clone());
        Some(
            entry
                .active()
                .map(|stream| Delivery {
                    stream,
                    notification: Notification::Value {
                        path: path.clone(),
                        specification: entry.specification.clone(),
                        old: old.clone(),
                        new: value.clone(),
                    },
                })
                .collect(),
        )
    }

    /// Drops the topic and its cached value. `None` when not subscribed.
    pub fn on_unsubscription(&mut self, path: &TopicPath, reason: UnsubscribeReason) -> Option<Vec<Delivery>> {
        let entry = self.topics.remove(path)?;
        Some(
            entry
                .active()
                .map(|stream| Delivery {
                    stream,
                    notification: Notification::Unsubscription {
                        path: path.clone(),
                        specification: entry.specification.clone(),
                        reason,
                    },
                })
                .collect(),
        )
    }

    /// Ends every stream with `terminal` and forgets all state.
    pub fn close_all(&mut self, terminal: Notification) -> Vec<Delivery> {
        self.topics.clear();
        std::mem::take(&mut self.streams)
            .into_keys()
            .map(|stream| Delivery { stream, notification: terminal.clone() })
            .collect()
    }

    pub fn cached_value(&self, path: &TopicPath) -> Option<&TopicValue> {
        self.topics.get(path).and_then(|entry| entry.value.as_ref())
    }

    fn fallbacks_for(&self, path: &TopicPath) -> Vec<StreamId> {
        let Some(entry) = self.topics.get(path) else {
            return Vec::new();
        };
        self.streams
            .iter()
            .filter(|(_, registration)| registration.selector.is_none() && registration.accepts(&entry.specification))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Subscription, then the cached value if there is one.
fn replay(deliveries: &mut Vec<Delivery>, stream: StreamId, path: &TopicPath, entry: &TopicEntry) {
    deliveries.push(Delivery {
        stream,
        notification: Notification::Subscription { path: path.clone(), specification: entry.specification.clone() },
    });
    if let Some(value) = &entry.value {
        deliveries.push(Delivery {
            stream,
            notification: Notification::Value {
                path: path.clone(),
                specification: entry.specification.clone(),
                old: None,
                new: value.clone(),
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_topics::TopicType;

    fn path(raw: &str) -> TopicPath {
        TopicPath::new(raw).expect("path")
    }

    fn selector(raw: &str) -> Option<TopicSelector> {
        Some(TopicSelector::parse(raw).expect("selector"))
    }

    fn string_spec() -> TopicSpecification {
        TopicSpecification::new(TopicType::String)
    }

    fn kinds(deliveries: &[Delivery]) -> Vec<(StreamId, &'static str)> {
        deliveries
            .iter()
            .map(|delivery| {
                let kind = match &delivery.notification {
                    Notification::Subscription { .. } => "subscription",
                    Notification::Value { .. } => "value",
                    Notification::Unsubscription { reason: UnsubscribeReason::StreamChange, .. } => "stream_change",
                    Notification::Unsubscription { .. } => "unsubscription",
                    Notification::Close => "close",
                    Notification::Error(_) => "error",
                };
                (delivery.stream, kind)
            })
            .collect()
    }

    #[test]
    fn events_reach_matching_streams_in_registration_order() {
        let mut registry = Registry::default();
        let (first, _) = registry.add(selector(">a//"), DataType::String);
        let (second, _) = registry.add(selector("?a/.*"), DataType::String);
        let (_other, _) = registry.add(selector(">z"), DataType::String);

        let deliveries = registry.on_subscription(path("a/b"), string_spec());
        assert_eq!(kinds(&deliveries), vec![(first, "subscription"), (second, "subscription")]);

        let deliveries = registry.on_value(&path("a/b"), TopicValue::String("x".into())).expect("subscribed");
        assert_eq!(kinds(&deliveries), vec![(first, "value"), (second, "value")]);
    }

    #[test]
    fn changed_specification_ends_the_old_subscription_first() {
        let mut registry = Registry::default();
        let (json, _) = registry.add(selector(">a"), DataType::Json);
        registry.on_subscription(path("a"), string_spec());
        registry.on_value(&path("a"), TopicValue::String("x".into())).expect("subscribed");

        assert!(registry.on_subscription(path("a"), string_spec()).is_empty());

        let replaced = TopicSpecification::new(TopicType::Json);
        let deliveries = registry.on_subscription(path("a"), replaced);
        assert_eq!(kinds(&deliveries), vec![(json, "unsubscription"), (json, "subscription")]);
        assert!(matches!(
            deliveries[0].notification,
            Notification::Unsubscription { reason: UnsubscribeReason::SubscriptionRefresh, .. }
        ));
        assert!(registry.cached_value(&path("a")).is_none());
    }

    #[test]
    fn streams_only_see_readable_topic_types() {
        let mut registry = Registry::default();
        let (json, _) = registry.add(selector(">a//"), DataType::Json);
        let (_binary, _) = registry.add(selector(">a//"), DataType::Binary);
        let deliveries = registry.on_subscription(path("a/b"), string_spec());
        assert_eq!(kinds(&deliveries), vec![(json, "subscription")]);
    }

    #[test]
    fn fallback_serves_only_unselected_topics() {
        let mut registry = Registry::default();
        let (fallback, _) = registry.add(None, DataType::String);
        let (specific, _) = registry.add(selector(">a"), DataType::String);

        assert_eq!(kinds(&registry.on_subscription(path("a"), string_spec())), vec![(specific, "subscription")]);
        assert_eq!(kinds(&registry.on_subscription(path("b"), string_spec())), vec![(fallback, "subscription")]);
    }

    #[test]
    fn removing_last_specific_stream_hands_topic_to_fallback_with_replay() {
        let mut registry = Registry::default();
        let (specific, _) = registry.add(selector(">t"), DataType::String);
        let (fallback, _) = registry.add(None, DataType::String);
        registry.on_subscription(path("t"), string_spec());
        registry.on_subscription(path("u"), string_spec());
        registry.on_value(&path("t"), TopicValue::String("v".into())).expect("subscribed");

        let deliveries = registry.remove(specific).expect("registered");
        assert_eq!(
            kinds(&deliveries),
            vec![(specific, "close"), (fallback, "subscription"), (fallback, "value")]
        );
        match &deliveries[2].notification {
            Notification::Value { old, new, path: p, .. } => {
                assert_eq!(p, &path("t"));
                assert!(old.is_none());
                assert_eq!(new, &TopicValue::String("v".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.remove(specific).is_none());
    }

    #[test]
    fn new_specific_stream_takes_topic_from_fallback() {
        let mut registry = Registry::default();
        let (fallback, _) = registry.add(None, DataType::String);
        registry.on_subscription(path("t"), string_spec());
        registry.on_value(&path("t"), TopicValue::String("v".into())).expect("subscribed");

        let (specific, deliveries) = registry.add(selector(">t"), DataType::String);
        assert_eq!(
            kinds(&deliveries),
            vec![(fallback, "stream_change"), (specific, "subscription"), (specific, "value")]
        );

        let deliveries = registry.on_value(&path("t"), TopicValue::String("w".into())).expect("subscribed");
        assert_eq!(kinds(&deliveries), vec![(specific, "value")]);
    }

    #[test]
    fn unsubscription_drops_cached_value() {
        let mut registry = Registry::default();
        registry.add(selector(">t"), DataType::String);
        registry.on_subscription(path("t"), string_spec());
        registry.on_value(&path("t"), TopicValue::String("v".into())).expect("subscribed");
        registry.on_unsubscription(&path("t"), UnsubscribeReason::BackPressure).expect("subscribed");

        assert!(registry.cached_value(&path("t")).is_none());
        assert!(registry.on_value(&path("t"), TopicValue::String("w".into())).is_none());
    }

    #[test]
    fn close_all_terminates_every_stream_once() {
        let mut registry = Registry::default();
        let (a, _) = registry.add(selector(">t"), DataType::String);
        let (b, _) = registry.add(None, DataType::Json);
        let deliveries = registry.close_all(Notification::Close);
        assert_eq!(kinds(&deliveries), vec![(a, "close"), (b, "close")]);
        assert!(registry.close_all(Notification::Close).is_empty());
    }
}
