//! Fetch requests and the selection they describe.
//!
//! [`FetchRequest`] is an immutable builder. [`FetchRequest::select`] applies
//! it to a set of candidate topics: selector, topic types and the path range
//! narrow the match set; `first`/`last` and the maximum result size then
//! truncate it, and only truncation reports `has_more`.

use crate::path::TopicPath;
use crate::selector::TopicSelector;
use crate::specification::{TopicSpecification, TopicType};
use crate::value::{DataType, TopicValue};
use std::collections::BTreeSet;
use thiserror::Error;

pub const MAX_FETCH_ARGUMENT: u64 = i32::MAX as u64;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{name} of {value} exceeds the maximum of {MAX_FETCH_ARGUMENT}")]
    ArgumentTooLarge { name: &'static str, value: u64 },
    #[error("topic types {types:?} cannot be read as {data_type}")]
    IncompatibleTopicTypes { data_type: DataType, types: Vec<TopicType> },
    #[error("topic type filter must not be empty")]
    EmptyTopicTypes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RangeBound {
    Inclusive(TopicPath),
    Exclusive(TopicPath),
}

impl RangeBound {
    fn admits_from(&self, path: &TopicPath) -> bool {
        match self {
            RangeBound::Inclusive(bound) => path >= bound,
            RangeBound::Exclusive(bound) => path > bound,
        }
    }

    fn admits_to(&self, path: &TopicPath) -> bool {
        match self {
            RangeBound::Inclusive(bound) => path <= bound,
            RangeBound::Exclusive(bound) => path < bound,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    First(u32),
    Last(u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchRequest {
    from: Option<RangeBound>,
    to: Option<RangeBound>,
    limit: Option<Limit>,
    maximum_result_size: Option<u32>,
    topic_types: Option<BTreeSet<TopicType>>,
    with_values: bool,
    with_properties: bool,
}

impl FetchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Range starts at `path`, inclusive. Overrides `after`.
    pub fn from(&self, path: &TopicPath) -> Self {
        Self { from: Some(RangeBound::Inclusive(path.clone())), ..self.clone() }
    }

    /// Range starts after `path`. Overrides `from`.
    pub fn after(&self, path: &TopicPath) -> Self {
        Self { from: Some(RangeBound::Exclusive(path.clone())), ..self.clone() }
    }

    /// Range ends at `path`, inclusive. Overrides `before`.
    pub fn to(&self, path: &TopicPath) -> Self {
        Self { to: Some(RangeBound::Inclusive(path.clone())), ..self.clone() }
    }

    /// Range ends before `path`. Overrides `to`.
    pub fn before(&self, path: &TopicPath) -> Self {
        Self { to: Some(RangeBound::Exclusive(path.clone())), ..self.clone() }
    }

    /// Keep the first `count` topics of the range. Overrides `last`.
    pub fn first(&self, count: u64) -> Result<Self, FetchError> {
        let count = bounded("first", count)?;
        Ok(Self { limit: Some(Limit::First(count)), ..self.clone() })
    }

    /// Keep the last `count` topics of the range. Overrides `first`.
    pub fn last(&self, count: u64) -> Result<Self, FetchError> {
        let count = bounded("last", count)?;
        Ok(Self { limit: Some(Limit::Last(count)), ..self.clone() })
    }

    pub fn maximum_result_size(&self, bytes: u64) -> Result<Self, FetchError> {
        let bytes = bounded("maximum_result_size", bytes)?;
        Ok(Self { maximum_result_size: Some(bytes), ..self.clone() })
    }

    pub fn topic_types(&self, types: impl IntoIterator<Item = TopicType>) -> Result<Self, FetchError> {
        let types: BTreeSet<TopicType> = types.into_iter().collect();
        if types.is_empty() {
            return Err(FetchError::EmptyTopicTypes);
        }
        Ok(Self { topic_types: Some(types), ..self.clone() })
    }

    pub fn with_properties(&self) -> Self {
        Self { with_properties: true, ..self.clone() }
    }

    /// Requests values readable as `data_type`. An explicit type filter
    /// naming unreadable types is an error.
    pub fn with_values(&self, data_type: DataType) -> Result<Self, FetchError> {
        let readable = data_type.readable_topic_types();
        let types = match &self.topic_types {
            None => readable.iter().copied().collect(),
            Some(types) => {
                let rejected: Vec<TopicType> =
                    types.iter().copied().filter(|topic_type| !readable.contains(topic_type)).collect();
                if !rejected.is_empty() {
                    return Err(FetchError::IncompatibleTopicTypes { data_type, types: rejected });
                }
                types.clone()
            }
        };
        Ok(Self { topic_types: Some(types), with_values: true, ..self.clone() })
    }

    /// Requests time series values, dropping non time series types from an
    /// explicit filter instead of failing.
    pub fn with_time_series_values(&self) -> Self {
        let types = match &self.topic_types {
            None => [TopicType::TimeSeries].into_iter().collect(),
            Some(types) => types.iter().copied().filter(|topic_type| *topic_type == TopicType::TimeSeries).collect(),
        };
        Self { topic_types: Some(types), with_values: true, ..self.clone() }
    }

    /// Caps the result size, keeping any smaller explicit maximum.
    pub fn capped_at(&self, bytes: u32) -> Self {
        let maximum = self.maximum_result_size.map_or(bytes, |current| current.min(bytes));
        Self { maximum_result_size: Some(maximum), ..self.clone() }
    }

    pub fn limit(&self) -> Option<Limit> {
        self.limit
    }

    pub fn wants_values(&self) -> bool {
        self.with_values
    }

    pub fn wants_properties(&self) -> bool {
        self.with_properties
    }

    pub fn topic_type_filter(&self) -> Option<&BTreeSet<TopicType>> {
        self.topic_types.as_ref()
    }

    pub fn select<'a, I>(&self, selector: &TopicSelector, candidates: I) -> FetchSelection
    where
        I: IntoIterator<Item = FetchCandidate<'a>>,
    {
        let mut matched: Vec<FetchCandidate<'a>> = candidates
            .into_iter()
            .filter(|candidate| selector.selects_path(candidate.path))
            .filter(|candidate| {
                self.topic_types
                    .as_ref()
                    .map_or(true, |types| types.contains(&candidate.specification.topic_type()))
            })
            .filter(|candidate| self.from.as_ref().map_or(true, |bound| bound.admits_from(candidate.path)))
            .filter(|candidate| self.to.as_ref().map_or(true, |bound| bound.admits_to(candidate.path)))
            .collect();
        matched.sort_by(|a, b| a.path.cmp(b.path));
        let matched_count = matched.len();

        let limited: Vec<FetchCandidate<'a>> = match self.limit {
            None => matched,
            Some(Limit::First(count)) => matched.into_iter().take(count as usize).collect(),
            Some(Limit::Last(count)) => {
                let skip = matched.len().saturating_sub(count as usize);
                matched.into_iter().skip(skip).collect()
            }
        };

        let topics: Vec<FetchedTopic> = limited.into_iter().map(|candidate| self.project(candidate)).collect();
        let topics = match self.maximum_result_size {
            None => topics,
            Some(maximum) => self.within_size(topics, maximum as usize),
        };

        FetchSelection { has_more: topics.len() < matched_count, matched: matched_count, topics }
    }

    fn project(&self, candidate: FetchCandidate<'_>) -> FetchedTopic {
        let specification = if self.with_properties {
            candidate.specification.clone()
        } else {
            candidate.specification.without_properties()
        };
        let value = if self.with_values { candidate.value.cloned() } else { None };
        FetchedTopic { path: candidate.path.clone(), specification, value }
    }

    /// Keeps topics while the running size fits, from the end of the range
    /// when the request asked for the last topics.
    fn within_size(&self, topics: Vec<FetchedTopic>, maximum: usize) -> Vec<FetchedTopic> {
        let from_end = matches!(self.limit, Some(Limit::Last(_)));
        let mut kept = Vec::with_capacity(topics.len());
        let mut used = 0usize;
        let ordered: Box<dyn Iterator<Item = FetchedTopic>> =
            if from_end { Box::new(topics.into_iter().rev()) } else { Box::new(topics.into_iter()) };
        for topic in ordered {
            let size = topic.approximate_size();
            if used + size > maximum {
                break;
            }
            used += size;
            kept.push(topic);
        }
        if from_end {
            kept.reverse();
        }
        kept
    }
}

fn bounded(name: &'static str, value: u64) -> Result<u32, FetchError> {
    if value > MAX_FETCH_ARGUMENT {
        return Err(FetchError::ArgumentTooLarge { name, value });
    }
    Ok(value as u32)
}

/// A topic as offered to [`FetchRequest::select`].
#[derive(Clone, Copy, Debug)]
pub struct FetchCandidate<'a> {
    pub path: &'a TopicPath,
    pub specification: &'a TopicSpecification,
    pub value: Option<&'a TopicValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchedTopic {
    pub path: TopicPath,
    pub specification: TopicSpecification,
    pub value: Option<TopicValue>,
}

impl FetchedTopic {
    fn approximate_size(&self) -> usize {
        self.path.as_str().len()
            + self.specification.approximate_size()
            + self.value.as_ref().map_or(0, TopicValue::approximate_size)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchSelection {
    pub topics: Vec<FetchedTopic>,
    pub has_more: bool,
    /// Topics matching selector, types and range before truncation.
    pub matched: usize,
}
