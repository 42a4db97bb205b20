//! # strata-topics
//!
//! The immutable value model shared by the session engine and servers:
//! topic paths and selectors, specifications, typed values, JSON pointers
//! and deltas, update constraints, time series event logs and range queries,
//! fetch selection, and the [`SessionError`] taxonomy.
//!
//! Nothing in this crate performs I/O.

pub mod constraint;
pub mod error;
pub mod fetch;
pub mod json_delta;
pub mod json_pointer;
pub mod path;
pub mod selector;
pub mod specification;
pub mod time_series;
pub mod value;

pub use constraint::{
    ConstraintError, ConstraintOperator, JsonCondition, LockToken, PartialJsonConstraint, UpdateConstraint,
    ValueConstraint,
};
pub use error::SessionError;
pub use fetch::{FetchCandidate, FetchError, FetchRequest, FetchSelection, FetchedTopic};
pub use json_delta::{JsonChangeMap, JsonDelta};
pub use json_pointer::{JsonPointer, Lookup, PointerError};
pub use path::{PathError, TopicPath};
pub use selector::{IntoSelector, SelectorError, TopicSelector};
pub use specification::{property, SpecificationError, TopicSpecification, TopicType};
pub use time_series::{
    EventArrayStructure, EventLog, EventMetadata, QueryError, QueryResult, RangeQuery, TimeSeriesEvent,
};
pub use value::{Binary, DataType, RecordV2, TopicData, TopicValue};

/// JSON values as carried by JSON topics.
pub use serde_json::Value as Json;
