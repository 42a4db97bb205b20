use crate::specification::TopicType;
use crate::time_series::TimeSeriesEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Opaque binary payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binary(pub Vec<u8>);

impl Binary {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Binary {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Binary {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

/// Structured record value: a list of records, each a list of string fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordV2 {
    records: Vec<Vec<String>>,
}

impl RecordV2 {
    pub fn new(records: Vec<Vec<String>>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Vec<String>] {
        &self.records
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.records.iter().flatten().map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TopicValue {
    Binary(Binary),
    Json(JsonValue),
    String(String),
    Int64(i64),
    Double(f64),
    Record(RecordV2),
    Event(Box<TimeSeriesEvent>),
}

impl TopicValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TopicValue::Binary(_) => DataType::Binary,
            TopicValue::Json(_) => DataType::Json,
            TopicValue::String(_) => DataType::String,
            TopicValue::Int64(_) => DataType::Int64,
            TopicValue::Double(_) => DataType::Double,
            TopicValue::Record(_) => DataType::RecordV2,
            TopicValue::Event(_) => DataType::TimeSeriesEvent,
        }
    }

    /// Rough encoded size in bytes.
    pub fn approximate_size(&self) -> usize {
        match self {
            TopicValue::Binary(bytes) => bytes.0.len(),
            TopicValue::Json(json) => json.to_string().len(),
            TopicValue::String(text) => text.len(),
            TopicValue::Int64(_) | TopicValue::Double(_) => 8,
            TopicValue::Record(record) => record.fields().map(|field| field.len() + 1).sum(),
            TopicValue::Event(event) => 24 + event.metadata.author.len() + event.value.approximate_size(),
        }
    }

    /// Numeric view used by lenient comparisons.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TopicValue::Int64(value) => Some(*value as f64),
            TopicValue::Double(value) => Some(*value),
            TopicValue::String(text) => text.trim().parse().ok(),
            TopicValue::Json(JsonValue::Number(number)) => number.as_f64(),
            TopicValue::Json(JsonValue::String(text)) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Textual view used by lenient comparisons.
    pub fn as_text(&self) -> Option<String> {
        match self {
            TopicValue::String(text) | TopicValue::Json(JsonValue::String(text)) => Some(text.clone()),
            TopicValue::Int64(value) => Some(value.to_string()),
            TopicValue::Double(value) => Some(value.to_string()),
            TopicValue::Json(JsonValue::Number(number)) => Some(number.to_string()),
            TopicValue::Json(JsonValue::Bool(flag)) => Some(flag.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for TopicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicValue::Binary(bytes) => write!(f, "<{} bytes>", bytes.0.len()),
            TopicValue::Json(json) => write!(f, "{json}"),
            TopicValue::String(text) => write!(f, "{text}"),
            TopicValue::Int64(value) => write!(f, "{value}"),
            TopicValue::Double(value) => write!(f, "{value}"),
            TopicValue::Record(record) => write!(f, "{:?}", record.records()),
            TopicValue::Event(event) => write!(f, "#{} {}", event.metadata.sequence, event.value),
        }
    }
}

/// The value types streams, fetches and updates are parameterised over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Binary,
    Json,
    String,
    Int64,
    Double,
    RecordV2,
    TimeSeriesEvent,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Binary => "binary",
            DataType::Json => "json",
            DataType::String => "string",
            DataType::Int64 => "int64",
            DataType::Double => "double",
            DataType::RecordV2 => "record_v2",
            DataType::TimeSeriesEvent => "time_series_event",
        }
    }

    /// Topic types whose values this data type can be read from.
    pub fn readable_topic_types(self) -> &'static [TopicType] {
        match self {
            DataType::Binary => &[TopicType::Binary],
            DataType::Json => &[TopicType::Json, TopicType::String, TopicType::Int64, TopicType::Double],
            DataType::String => &[TopicType::String],
            DataType::Int64 => &[TopicType::Int64],
            DataType::Double => &[TopicType::Double],
            DataType::RecordV2 => &[TopicType::RecordV2],
            DataType::TimeSeriesEvent => &[TopicType::TimeSeries],
        }
    }

    pub fn can_read(self, topic_type: TopicType) -> bool {
        self.readable_topic_types().contains(&topic_type)
    }

    /// The only topic type values of this data type may be written to
    /// directly. Time series topics are appended to, never set.
    pub fn writable_topic_type(self) -> Option<TopicType> {
        match self {
            DataType::Binary => Some(TopicType::Binary),
            DataType::Json => Some(TopicType::Json),
            DataType::String => Some(TopicType::String),
            DataType::Int64 => Some(TopicType::Int64),
            DataType::Double => Some(TopicType::Double),
            DataType::RecordV2 => Some(TopicType::RecordV2),
            DataType::TimeSeriesEvent => None,
        }
    }

    pub fn for_topic_type(topic_type: TopicType) -> Option<DataType> {
        match topic_type {
            TopicType::Binary => Some(DataType::Binary),
            TopicType::Json => Some(DataType::Json),
            TopicType::String => Some(DataType::String),
            TopicType::Int64 => Some(DataType::Int64),
            TopicType::Double => Some(DataType::Double),
            TopicType::RecordV2 => Some(DataType::RecordV2),
            TopicType::TimeSeries => Some(DataType::TimeSeriesEvent),
            TopicType::Unknown => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Rust type that topic values can be read as and written from.
pub trait TopicData: Clone + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn from_topic_value(value: &TopicValue) -> Option<Self>;

    fn into_topic_value(self) -> TopicValue;
}

impl TopicData for Binary {
    const DATA_TYPE: DataType = DataType::Binary;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::Binary(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::Binary(self)
    }
}

impl TopicData for JsonValue {
    const DATA_TYPE: DataType = DataType::Json;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::Json(json) => Some(json.clone()),
            TopicValue::String(text) => Some(JsonValue::String(text.clone())),
            TopicValue::Int64(number) => Some(JsonValue::from(*number)),
            TopicValue::Double(number) => serde_json::Number::from_f64(*number).map(JsonValue::Number),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::Json(self)
    }
}

impl TopicData for String {
    const DATA_TYPE: DataType = DataType::String;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::String(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::String(self)
    }
}

impl TopicData for i64 {
    const DATA_TYPE: DataType = DataType::Int64;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::Int64(number) => Some(*number),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::Int64(self)
    }
}

impl TopicData for f64 {
    const DATA_TYPE: DataType = DataType::Double;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::Double(number) => Some(*number),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::Double(self)
    }
}

impl TopicData for RecordV2 {
    const DATA_TYPE: DataType = DataType::RecordV2;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::Record(record) => Some(record.clone()),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::Record(self)
    }
}

impl TopicData for TimeSeriesEvent {
    const DATA_TYPE: DataType = DataType::TimeSeriesEvent;

    fn from_topic_value(value: &TopicValue) -> Option<Self> {
        match value {
            TopicValue::Event(event) => Some(event.as_ref().clone()),
            _ => None,
        }
    }

    fn into_topic_value(self) -> TopicValue {
        TopicValue::Event(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_reads_scalar_topic_types() {
        assert!(DataType::Json.can_read(TopicType::String));
        assert!(DataType::Json.can_read(TopicType::Double));
        assert!(!DataType::Json.can_read(TopicType::Binary));
        assert!(!DataType::String.can_read(TopicType::Json));
        assert!(DataType::TimeSeriesEvent.can_read(TopicType::TimeSeries));
    }

    #[test]
    fn json_converts_scalars() {
        assert_eq!(JsonValue::from_topic_value(&TopicValue::Int64(4)), Some(json!(4)));
        assert_eq!(JsonValue::from_topic_value(&TopicValue::String("x".into())), Some(json!("x")));
        assert_eq!(JsonValue::from_topic_value(&TopicValue::Double(f64::NAN)), None);
        assert_eq!(String::from_topic_value(&TopicValue::Json(json!("x"))), None);
    }

    #[test]
    fn lenient_views() {
        assert_eq!(TopicValue::String(" 12 ".into()).as_number(), Some(12.0));
        assert_eq!(TopicValue::Json(json!(1.5)).as_text().as_deref(), Some("1.5"));
        assert_eq!(TopicValue::Binary(Binary(vec![1])).as_number(), None);
    }
}
