use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Recognised specification property keys.
pub mod property {
    pub const COMPRESSION: &str = "COMPRESSION";
    pub const CONFLATION: &str = "CONFLATION";
    pub const DONT_RETAIN_VALUE: &str = "DONT_RETAIN_VALUE";
    pub const OWNER: &str = "OWNER";
    pub const PERSISTENT: &str = "PERSISTENT";
    pub const PRIORITY: &str = "PRIORITY";
    pub const PUBLISH_VALUES_ONLY: &str = "PUBLISH_VALUES_ONLY";
    pub const REMOVAL: &str = "REMOVAL";
    pub const SCHEMA: &str = "SCHEMA";
    pub const TIDY_ON_UNSUBSCRIBE: &str = "TIDY_ON_UNSUBSCRIBE";
    pub const TIME_SERIES_EVENT_VALUE_TYPE: &str = "TIME_SERIES_EVENT_VALUE_TYPE";
    pub const TIME_SERIES_RETAINED_RANGE: &str = "TIME_SERIES_RETAINED_RANGE";
    pub const TIME_SERIES_SUBSCRIPTION_RANGE: &str = "TIME_SERIES_SUBSCRIPTION_RANGE";
    pub const VALIDATE_VALUES: &str = "VALIDATE_VALUES";
}

pub const DEFAULT_RETAINED_EVENTS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicType {
    Binary,
    Json,
    String,
    Int64,
    Double,
    TimeSeries,
    RecordV2,
    Unknown,
}

impl TopicType {
    pub const ALL: [TopicType; 7] = [
        TopicType::Binary,
        TopicType::Json,
        TopicType::String,
        TopicType::Int64,
        TopicType::Double,
        TopicType::TimeSeries,
        TopicType::RecordV2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TopicType::Binary => "binary",
            TopicType::Json => "json",
            TopicType::String => "string",
            TopicType::Int64 => "int64",
            TopicType::Double => "double",
            TopicType::TimeSeries => "time_series",
            TopicType::RecordV2 => "record_v2",
            TopicType::Unknown => "unknown",
        }
    }

    /// Types a time series topic may carry as its event value type.
    pub fn is_event_value_type(self) -> bool {
        !matches!(self, TopicType::TimeSeries | TopicType::Unknown)
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicType {
    type Err = SpecificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(TopicType::Binary),
            "json" => Ok(TopicType::Json),
            "string" => Ok(TopicType::String),
            "int64" => Ok(TopicType::Int64),
            "double" => Ok(TopicType::Double),
            "time_series" => Ok(TopicType::TimeSeries),
            "record_v2" => Ok(TopicType::RecordV2),
            other => Err(SpecificationError::UnknownType { name: other.to_owned() }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SpecificationError {
    #[error("unknown topic type '{name}'")]
    UnknownType { name: String },
    #[error("topics of type unknown cannot be created")]
    UnknownTopicType,
    #[error("time series topics require a {} property", property::TIME_SERIES_EVENT_VALUE_TYPE)]
    MissingEventValueType,
    #[error("'{name}' is not a valid time series event value type")]
    InvalidEventValueType { name: String },
    #[error("invalid value '{value}' for property {key}")]
    InvalidProperty { key: String, value: String },
}

/// Topic type plus opaque properties. Immutable; `with_property` returns a
/// new specification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpecification {
    topic_type: TopicType,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl TopicSpecification {
    pub fn new(topic_type: TopicType) -> Self {
        Self { topic_type, properties: BTreeMap::new() }
    }

    /// A time series specification with the given event value type.
    pub fn time_series(event_type: TopicType) -> Self {
        Self::new(TopicType::TimeSeries)
            .with_property(property::TIME_SERIES_EVENT_VALUE_TYPE, event_type.as_str())
    }

    pub fn with_property(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.properties.insert(key.into(), value.into());
        next
    }

    pub fn with_properties(&self, properties: BTreeMap<String, String>) -> Self {
        Self { topic_type: self.topic_type, properties }
    }

    pub fn without_properties(&self) -> Self {
        Self::new(self.topic_type)
    }

    pub fn topic_type(&self) -> TopicType {
        self.topic_type
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Event value type of a time series specification.
    pub fn event_value_type(&self) -> Option<TopicType> {
        if self.topic_type != TopicType::TimeSeries {
            return None;
        }
        self.property(property::TIME_SERIES_EVENT_VALUE_TYPE)
            .and_then(|name| name.parse().ok())
            .filter(|event_type: &TopicType| event_type.is_event_value_type())
    }

    /// Maximum retained events for a time series topic (`limit N`).
    pub fn retained_event_limit(&self) -> Result<usize, SpecificationError> {
        match self.property(property::TIME_SERIES_RETAINED_RANGE) {
            None => Ok(DEFAULT_RETAINED_EVENTS),
            Some(range) => parse_limit(range).ok_or_else(|| SpecificationError::InvalidProperty {
                key: property::TIME_SERIES_RETAINED_RANGE.to_owned(),
                value: range.to_owned(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), SpecificationError> {
        match self.topic_type {
            TopicType::Unknown => Err(SpecificationError::UnknownTopicType),
            TopicType::TimeSeries => {
                let name = self
                    .property(property::TIME_SERIES_EVENT_VALUE_TYPE)
                    .ok_or(SpecificationError::MissingEventValueType)?;
                if self.event_value_type().is_none() {
                    return Err(SpecificationError::InvalidEventValueType { name: name.to_owned() });
                }
                self.retained_event_limit().map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// Rough encoded size, used when bounding fetch results.
    pub fn approximate_size(&self) -> usize {
        1 + self.properties.iter().map(|(key, value)| key.len() + value.len()).sum::<usize>()
    }
}

fn parse_limit(range: &str) -> Option<usize> {
    let mut words = range.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(keyword), Some(count), None) if keyword.eq_ignore_ascii_case("limit") => {
            count.parse().ok()
        }
        _ => None,
    }
}
