//! Time series event logs and range queries.
//!
//! A time series is an append-only log of events. An *original* event is
//! appended with a fresh sequence number; an *edit* event replaces the value
//! of an original for readers of the value view, while the original stays in
//! the log. Every event records the metadata of the original it belongs to,
//! so `original` always names a true original even when an edit of an edit is
//! requested.
//!
//! Range queries select a contiguous run of events. Value queries run over the
//! originals and present each selected original as its latest edit; edit
//! queries run over every event.

use crate::value::{TopicData, TopicValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{name} of {value} exceeds the maximum of {}", i64::MAX)]
    ArgumentTooLarge { name: &'static str, value: u64 },
    #[error("{name} must not be negative")]
    NegativeInterval { name: &'static str },
    #[error("{operation} is not valid for this kind of range query")]
    WrongQueryKind { operation: &'static str },
    #[error("no event with sequence {sequence}")]
    NoSuchEvent { sequence: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMetadata {
    pub sequence: u64,
    pub timestamp: i64,
    pub author: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesEvent {
    pub metadata: EventMetadata,
    pub original: EventMetadata,
    pub value: TopicValue,
}

impl TimeSeriesEvent {
    pub fn is_edit_event(&self) -> bool {
        self.metadata != self.original
    }

    pub fn sequence(&self) -> u64 {
        self.metadata.sequence
    }

    pub fn original_sequence(&self) -> u64 {
        self.original.sequence
    }

    pub fn value_as<T: TopicData>(&self) -> Option<T> {
        T::from_topic_value(&self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventArrayStructure {
    /// Originals and edits, ordered by sequence.
    EditEventStream,
    /// One event per original, the latest edit standing in for it.
    ValueEventStream,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    events: Vec<TimeSeriesEvent>,
    selected_count: u64,
    structure: EventArrayStructure,
}

impl QueryResult {
    pub fn events(&self) -> &[TimeSeriesEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TimeSeriesEvent> {
        self.events
    }

    /// Events selected before the limit was applied.
    pub fn selected_count(&self) -> u64 {
        self.selected_count
    }

    pub fn structure(&self) -> EventArrayStructure {
        self.structure
    }

    pub fn is_complete(&self) -> bool {
        self.selected_count == self.events.len() as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditDetail {
    All,
    Latest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryView {
    Values,
    Edits(EditDetail),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    FromStart,
    Sequence(u64),
    Time(i64),
    LastCount(u64),
    LastMillis(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Span {
    ToEnd,
    ToStart,
    ToSequence(u64),
    ToTime(i64),
    Next(u64),
    NextMillis(i64),
    Previous(u64),
    PreviousMillis(i64),
    UntilLast(u64),
    UntilLastMillis(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub anchor: Anchor,
    pub span: Span,
}

impl Default for Range {
    fn default() -> Self {
        Self { anchor: Anchor::FromStart, span: Span::ToEnd }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    View,
    Edit,
}

/// Immutable range query description. Every builder call returns a new
/// query; anchor and span calls apply to the view range, or to the edit
/// range after [`RangeQuery::edit_range`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeQuery {
    view: QueryView,
    view_range: Range,
    edit_range: Range,
    target: Target,
    limit: Option<u64>,
}

impl Default for RangeQuery {
    fn default() -> Self {
        Self {
            view: QueryView::Values,
            view_range: Range::default(),
            edit_range: Range::default(),
            target: Target::View,
            limit: None,
        }
    }
}

impl RangeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value query over the entire series. Resets both ranges.
    pub fn for_values(&self) -> Self {
        Self { view: QueryView::Values, limit: self.limit, ..Self::default() }
    }

    /// An edit query over the entire series, returning all edits.
    pub fn for_edits(&self) -> Self {
        Self { view: QueryView::Edits(EditDetail::All), limit: self.limit, ..Self::default() }
    }

    /// Switches later anchor and span calls to the edit range, reset to the
    /// entire series. Value queries only.
    pub fn edit_range(&self) -> Result<Self, QueryError> {
        if self.view != QueryView::Values {
            return Err(QueryError::WrongQueryKind { operation: "edit_range" });
        }
        Ok(Self { edit_range: Range::default(), target: Target::Edit, ..self.clone() })
    }

    pub fn all_edits(&self) -> Result<Self, QueryError> {
        self.edit_detail(EditDetail::All, "all_edits")
    }

    pub fn latest_edits(&self) -> Result<Self, QueryError> {
        self.edit_detail(EditDetail::Latest, "latest_edits")
    }

    pub fn from_start(&self) -> Self {
        self.with_anchor(Anchor::FromStart)
    }

    pub fn from_sequence(&self, sequence: u64) -> Result<Self, QueryError> {
        Ok(self.with_anchor(Anchor::Sequence(bounded("sequence", sequence)?)))
    }

    pub fn from_time(&self, timestamp: i64) -> Self {
        self.with_anchor(Anchor::Time(timestamp))
    }

    pub fn from_last(&self, count: u64) -> Result<Self, QueryError> {
        Ok(self.with_anchor(Anchor::LastCount(bounded("count", count)?)))
    }

    pub fn from_last_millis(&self, millis: i64) -> Result<Self, QueryError> {
        Ok(self.with_anchor(Anchor::LastMillis(non_negative("time span", millis)?)))
    }

    pub fn to_end(&self) -> Self {
        self.with_span(Span::ToEnd)
    }

    pub fn to_start(&self) -> Self {
        self.with_span(Span::ToStart)
    }

    pub fn to_sequence(&self, sequence: u64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::ToSequence(bounded("sequence", sequence)?)))
    }

    pub fn to_time(&self, timestamp: i64) -> Self {
        self.with_span(Span::ToTime(timestamp))
    }

    pub fn next(&self, count: u64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::Next(bounded("count", count)?)))
    }

    pub fn next_millis(&self, millis: i64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::NextMillis(non_negative("time span", millis)?)))
    }

    pub fn previous(&self, count: u64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::Previous(bounded("count", count)?)))
    }

    pub fn previous_millis(&self, millis: i64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::PreviousMillis(non_negative("time span", millis)?)))
    }

    pub fn until_last(&self, count: u64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::UntilLast(bounded("count", count)?)))
    }

    pub fn until_last_millis(&self, millis: i64) -> Result<Self, QueryError> {
        Ok(self.with_span(Span::UntilLastMillis(non_negative("time span", millis)?)))
    }

    /// Keeps only the `count` highest-sequence results.
    pub fn limit(&self, count: u64) -> Result<Self, QueryError> {
        Ok(Self { limit: Some(bounded("limit", count)?), ..self.clone() })
    }

    pub fn view(&self) -> QueryView {
        self.view
    }

    pub fn view_range(&self) -> Range {
        self.view_range
    }

    fn edit_detail(&self, detail: EditDetail, operation: &'static str) -> Result<Self, QueryError> {
        match self.view {
            QueryView::Edits(_) => Ok(Self { view: QueryView::Edits(detail), ..self.clone() }),
            QueryView::Values => Err(QueryError::WrongQueryKind { operation }),
        }
    }

    fn with_anchor(&self, anchor: Anchor) -> Self {
        let mut next = self.clone();
        match next.target {
            Target::View => next.view_range.anchor = anchor,
            Target::Edit => next.edit_range.anchor = anchor,
        }
        next
    }

    fn with_span(&self, span: Span) -> Self {
        let mut next = self.clone();
        match next.target {
            Target::View => next.view_range.span = span,
            Target::Edit => next.edit_range.span = span,
        }
        next
    }
}

fn bounded(name: &'static str, value: u64) -> Result<u64, QueryError> {
    if value > i64::MAX as u64 {
        return Err(QueryError::ArgumentTooLarge { name, value });
    }
    Ok(value)
}

fn non_negative(name: &'static str, value: i64) -> Result<i64, QueryError> {
    if value < 0 {
        return Err(QueryError::NegativeInterval { name });
    }
    Ok(value)
}

/// Server side storage for one time series topic.
#[derive(Clone, Debug)]
pub struct EventLog {
    events: Vec<TimeSeriesEvent>,
    next_sequence: u64,
    retained_limit: usize,
}

impl EventLog {
    pub fn new(retained_limit: usize) -> Self {
        Self { events: Vec::new(), next_sequence: 0, retained_limit }
    }

    pub fn events(&self) -> &[TimeSeriesEvent] {
        &self.events
    }

    pub fn latest(&self) -> Option<&TimeSeriesEvent> {
        self.events.last()
    }

    pub fn append(&mut self, value: TopicValue, author: &str, timestamp: i64) -> TimeSeriesEvent {
        let metadata = self.next_metadata(author, timestamp);
        let event = TimeSeriesEvent { metadata: metadata.clone(), original: metadata, value };
        self.events.push(event.clone());
        self.trim();
        event
    }

    /// Appends an edit of `original_sequence`. Editing an edit edits its
    /// original.
    pub fn edit(
        &mut self,
        original_sequence: u64,
        value: TopicValue,
        author: &str,
        timestamp: i64,
    ) -> Result<TimeSeriesEvent, QueryError> {
        let original = self
            .events
            .iter()
            .find(|event| event.metadata.sequence == original_sequence)
            .map(|event| event.original.clone())
            .ok_or(QueryError::NoSuchEvent { sequence: original_sequence })?;
        let metadata = self.next_metadata(author, timestamp);
        let event = TimeSeriesEvent { metadata, original, value };
        self.events.push(event.clone());
        Ok(event)
    }

    pub fn query(&self, query: &RangeQuery) -> QueryResult {
        let (mut events, structure) = match query.view {
            QueryView::Values => {
                let originals: Vec<&TimeSeriesEvent> =
                    self.events.iter().filter(|event| !event.is_edit_event()).collect();
                let edits: Vec<&TimeSeriesEvent> = select(&self.events.iter().collect::<Vec<_>>(), query.edit_range)
                    .into_iter()
                    .filter(|event| event.is_edit_event())
                    .collect();
                let events = select(&originals, query.view_range)
                    .into_iter()
                    .map(|original| {
                        edits
                            .iter()
                            .rev()
                            .find(|edit| edit.original.sequence == original.metadata.sequence)
                            .copied()
                            .unwrap_or(original)
                            .clone()
                    })
                    .collect::<Vec<_>>();
                (events, EventArrayStructure::ValueEventStream)
            }
            QueryView::Edits(detail) => {
                let all: Vec<&TimeSeriesEvent> = self.events.iter().collect();
                let events = select(&all, query.view_range)
                    .into_iter()
                    .filter(|event| detail == EditDetail::All || self.is_current(event))
                    .cloned()
                    .collect::<Vec<_>>();
                (events, EventArrayStructure::EditEventStream)
            }
        };
        let selected_count = events.len() as u64;
        if let Some(limit) = query.limit {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }
        QueryResult { events, selected_count, structure }
    }

    /// Originals, and edits that are the latest edit of their original.
    fn is_current(&self, event: &TimeSeriesEvent) -> bool {
        if !event.is_edit_event() {
            return true;
        }
        self.events
            .iter()
            .rev()
            .find(|candidate| candidate.is_edit_event() && candidate.original == event.original)
            .is_some_and(|latest| latest.metadata == event.metadata)
    }

    fn next_metadata(&mut self, author: &str, timestamp: i64) -> EventMetadata {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        EventMetadata { sequence, timestamp, author: author.to_owned() }
    }

    fn trim(&mut self) {
        loop {
            let originals = self.events.iter().filter(|event| !event.is_edit_event()).count();
            if originals <= self.retained_limit {
                return;
            }
            let Some(oldest) = self.events.iter().find(|event| !event.is_edit_event()).map(|e| e.original.sequence)
            else {
                return;
            };
            self.events.retain(|event| event.original.sequence != oldest);
        }
    }
}

/// Resolves `range` against `domain` (ordered by sequence) and returns the
/// selected run.
fn select<'a>(domain: &[&'a TimeSeriesEvent], range: Range) -> Vec<&'a TimeSeriesEvent> {
    let n = domain.len() as i64;
    let first_where = |pred: &dyn Fn(&TimeSeriesEvent) -> bool| {
        domain.iter().position(|event| pred(event)).map_or(n, |index| index as i64)
    };
    let last_where = |pred: &dyn Fn(&TimeSeriesEvent) -> bool| {
        domain.iter().rposition(|event| pred(event)).map_or(-1, |index| index as i64)
    };
    let last_time = domain.last().map(|event| event.metadata.timestamp);

    // `forward` is the first index at or after the anchor, `backward` the last
    // index at or before it. `FromStart` sits before the first event.
    let (forward, backward, anchor_time) = match range.anchor {
        Anchor::FromStart => (0, -1, domain.first().map(|event| event.metadata.timestamp)),
        Anchor::Sequence(sequence) => {
            let forward = first_where(&|event| event.metadata.sequence >= sequence);
            let time = domain.get(forward as usize).map(|event| event.metadata.timestamp);
            (forward, last_where(&|event| event.metadata.sequence <= sequence), time)
        }
        Anchor::Time(time) => (
            first_where(&|event| event.metadata.timestamp >= time),
            last_where(&|event| event.metadata.timestamp <= time),
            Some(time),
        ),
        Anchor::LastCount(count) => {
            let count = i64::try_from(count).unwrap_or(i64::MAX);
            if count == 0 {
                (n, n - 1, None)
            } else if count > n {
                (0, -1, domain.first().map(|event| event.metadata.timestamp))
            } else {
                let index = n - count;
                (index, index, Some(domain[index as usize].metadata.timestamp))
            }
        }
        Anchor::LastMillis(millis) => match last_time {
            None => (0, -1, None),
            Some(last) => {
                let time = last.saturating_sub(millis);
                (
                    first_where(&|event| event.metadata.timestamp >= time),
                    last_where(&|event| event.metadata.timestamp <= time),
                    Some(time),
                )
            }
        },
    };

    let (lo, hi) = match range.span {
        Span::ToEnd => (forward, n - 1),
        Span::ToStart => (0, backward),
        Span::ToSequence(sequence) => {
            let end = last_where(&|event| event.metadata.sequence <= sequence);
            if end >= forward {
                (forward, end)
            } else {
                (first_where(&|event| event.metadata.sequence >= sequence), backward)
            }
        }
        Span::ToTime(time) => {
            let end = last_where(&|event| event.metadata.timestamp <= time);
            if end >= forward {
                (forward, end)
            } else {
                (first_where(&|event| event.metadata.timestamp >= time), backward)
            }
        }
        Span::Next(count) => (forward, forward.saturating_add(i64::try_from(count).unwrap_or(i64::MAX)) - 1),
        Span::NextMillis(millis) => match anchor_time {
            None => (0, -1),
            Some(time) => {
                let end = time.saturating_add(millis);
                (forward, last_where(&|event| event.metadata.timestamp < end))
            }
        },
        Span::Previous(count) => {
            (backward.saturating_sub(i64::try_from(count).unwrap_or(i64::MAX)) + 1, backward)
        }
        Span::PreviousMillis(millis) => match anchor_time {
            None => (0, -1),
            Some(time) => {
                let start = time.saturating_sub(millis);
                (first_where(&|event| event.metadata.timestamp > start), backward)
            }
        },
        Span::UntilLast(count) => (forward, n - 1 - i64::try_from(count).unwrap_or(i64::MAX).min(n)),
        Span::UntilLastMillis(millis) => match last_time {
            None => (0, -1),
            Some(last) => {
                let end = last.saturating_sub(millis);
                (forward, last_where(&|event| event.metadata.timestamp < end))
            }
        },
    };

    let lo = lo.max(0);
    let hi = hi.min(n - 1);
    if lo > hi {
        return Vec::new();
    }
    domain[lo as usize..=hi as usize].to_vec()
}
