//! Update constraints.
//!
//! A constraint is held in disjunctive normal form: a list of alternatives,
//! each a conjunction of held locks and at most one value condition. `and`
//! distributes over the alternatives and rejects any pairing that would need
//! two different value conditions; `or` concatenates alternatives. The
//! constraint is only ever evaluated by the server.

use crate::json_pointer::{JsonPointer, PointerError};
use crate::value::TopicValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConstraintError {
    #[error("a conjunction cannot hold two different value constraints")]
    ConflictingValues,
    #[error("conflicting partial JSON conditions at '{pointer}'")]
    ConflictingPointer { pointer: String },
    #[error(transparent)]
    Pointer(#[from] PointerError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOperator {
    /// Strict equality: same type and same value.
    Is,
    /// Lenient equality across textual and numeric representations.
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Identifies one acquisition of a session lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockToken {
    pub name: String,
    pub sequence: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueConstraint {
    NoValue,
    NoTopic,
    Compare { operator: ConstraintOperator, value: TopicValue },
    PartialJson(PartialJsonConstraint),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conjunction {
    locks: BTreeSet<LockToken>,
    value: Option<ValueConstraint>,
}

impl Conjunction {
    pub fn locks(&self) -> impl Iterator<Item = &LockToken> {
        self.locks.iter()
    }

    pub fn value(&self) -> Option<&ValueConstraint> {
        self.value.as_ref()
    }

    fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.value.is_none()
    }

    fn merge(&self, other: &Conjunction) -> Result<Conjunction, ConstraintError> {
        let value = match (&self.value, &other.value) {
            (Some(left), Some(right)) if left != right => return Err(ConstraintError::ConflictingValues),
            (Some(value), _) | (None, Some(value)) => Some(value.clone()),
            (None, None) => None,
        };
        let locks = self.locks.union(&other.locks).cloned().collect();
        Ok(Conjunction { locks, value })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateConstraint {
    alternatives: Vec<Conjunction>,
}

impl Default for UpdateConstraint {
    fn default() -> Self {
        Self::unconstrained()
    }
}

impl UpdateConstraint {
    pub fn unconstrained() -> Self {
        Self { alternatives: vec![Conjunction::default()] }
    }

    /// Satisfied while the updating session holds the given lock acquisition.
    pub fn locked(lock: impl Into<LockToken>) -> Self {
        let mut locks = BTreeSet::new();
        locks.insert(lock.into());
        Self { alternatives: vec![Conjunction { locks, value: None }] }
    }

    /// Satisfied if the topic exists and has no value.
    pub fn no_value() -> Self {
        Self::with_value(ValueConstraint::NoValue)
    }

    /// Satisfied if the topic does not exist.
    pub fn no_topic() -> Self {
        Self::with_value(ValueConstraint::NoTopic)
    }

    pub fn value(operator: ConstraintOperator, value: TopicValue) -> Self {
        Self::with_value(ValueConstraint::Compare { operator, value })
    }

    pub fn json_value() -> PartialJsonConstraint {
        PartialJsonConstraint::default()
    }

    pub fn and(&self, other: &UpdateConstraint) -> Result<UpdateConstraint, ConstraintError> {
        let mut alternatives = Vec::with_capacity(self.alternatives.len() * other.alternatives.len());
        for left in &self.alternatives {
            for right in &other.alternatives {
                let merged = left.merge(right)?;
                if !alternatives.contains(&merged) {
                    alternatives.push(merged);
                }
            }
        }
        Ok(Self { alternatives })
    }

    pub fn or(&self, other: &UpdateConstraint) -> UpdateConstraint {
        if self.is_unconstrained() || other.is_unconstrained() {
            return Self::unconstrained();
        }
        let mut alternatives = self.alternatives.clone();
        for alternative in &other.alternatives {
            if !alternatives.contains(alternative) {
                alternatives.push(alternative.clone());
            }
        }
        Self { alternatives }
    }

    pub fn alternatives(&self) -> &[Conjunction] {
        &self.alternatives
    }

    pub fn is_unconstrained(&self) -> bool {
        self.alternatives.iter().any(Conjunction::is_empty)
    }

    fn with_value(value: ValueConstraint) -> Self {
        Self { alternatives: vec![Conjunction { locks: BTreeSet::new(), value: Some(value) }] }
    }
}

impl From<PartialJsonConstraint> for UpdateConstraint {
    fn from(value: PartialJsonConstraint) -> Self {
        Self::with_value(ValueConstraint::PartialJson(value))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum JsonCondition {
    Compare { operator: ConstraintOperator, value: JsonValue },
    Null,
}

/// Conditions on parts of a JSON topic value. Requires the topic to be JSON.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialJsonConstraint {
    with: BTreeMap<JsonPointer, JsonCondition>,
    without: BTreeSet<JsonPointer>,
}

impl PartialJsonConstraint {
    pub fn with_value_at(
        &self,
        pointer: &str,
        operator: ConstraintOperator,
        value: JsonValue,
    ) -> Result<Self, ConstraintError> {
        self.with_condition(pointer, JsonCondition::Compare { operator, value })
    }

    pub fn with_null_at(&self, pointer: &str) -> Result<Self, ConstraintError> {
        self.with_condition(pointer, JsonCondition::Null)
    }

    /// Requires nothing to exist at `pointer`.
    pub fn without(&self, pointer: &str) -> Result<Self, ConstraintError> {
        let parsed = JsonPointer::parse(pointer)?;
        if self.with.keys().any(|key| parsed.is_prefix_of(key)) {
            return Err(ConstraintError::ConflictingPointer { pointer: pointer.to_owned() });
        }
        let mut next = self.clone();
        next.without.insert(parsed);
        Ok(next)
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&JsonPointer, &JsonCondition)> {
        self.with.iter()
    }

    pub fn absent(&self) -> impl Iterator<Item = &JsonPointer> {
        self.without.iter()
    }

    fn with_condition(&self, pointer: &str, condition: JsonCondition) -> Result<Self, ConstraintError> {
        let parsed = JsonPointer::parse(pointer)?;
        if self.without.iter().any(|absent| absent.is_prefix_of(&parsed)) {
            return Err(ConstraintError::ConflictingPointer { pointer: pointer.to_owned() });
        }
        if let Some(existing) = self.with.get(&parsed) {
            if existing != &condition {
                return Err(ConstraintError::ConflictingPointer { pointer: pointer.to_owned() });
            }
        }
        let mut next = self.clone();
        next.with.insert(parsed, condition);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lock(name: &str, sequence: i64) -> LockToken {
        LockToken { name: name.into(), sequence }
    }

    #[test]
    fn many_locks_combine() {
        let both = UpdateConstraint::locked(lock("a", 1))
            .and(&UpdateConstraint::locked(lock("b", 4)))
            .expect("locks combine");
        assert_eq!(both.alternatives().len(), 1);
        assert_eq!(both.alternatives()[0].locks().count(), 2);
    }

    #[test]
    fn two_value_constraints_conflict() {
        let result = UpdateConstraint::no_value().and(&UpdateConstraint::no_topic());
        assert_eq!(result, Err(ConstraintError::ConflictingValues));

        let same = UpdateConstraint::no_value().and(&UpdateConstraint::no_value());
        assert!(same.is_ok());
    }

    #[test]
    fn and_distributes_over_or() {
        let either = UpdateConstraint::no_topic().or(&UpdateConstraint::no_value());
        let combined = either.and(&UpdateConstraint::locked(lock("l", 2))).expect("valid");
        assert_eq!(combined.alternatives().len(), 2);
        assert!(combined.alternatives().iter().all(|alt| alt.locks().count() == 1));

        let conflicting =
            either.and(&UpdateConstraint::value(ConstraintOperator::Eq, TopicValue::Int64(1)));
        assert_eq!(conflicting, Err(ConstraintError::ConflictingValues));
    }

    #[test]
    fn unconstrained_absorbs_or_and_is_identity_for_and() {
        let open = UpdateConstraint::unconstrained();
        assert!(open.or(&UpdateConstraint::no_topic()).is_unconstrained());
        let same = open.and(&UpdateConstraint::no_topic()).expect("valid");
        assert_eq!(same, UpdateConstraint::no_topic());
    }

    #[test]
    fn partial_json_rejects_contradictions() {
        let base = UpdateConstraint::json_value()
            .with_value_at("/a/b", ConstraintOperator::Eq, json!(1))
            .expect("valid");
        assert!(base.with_value_at("/a/b", ConstraintOperator::Eq, json!(1)).is_ok());
        assert!(matches!(
            base.with_value_at("/a/b", ConstraintOperator::Eq, json!(2)),
            Err(ConstraintError::ConflictingPointer { .. })
        ));
        assert!(matches!(base.without("/a"), Err(ConstraintError::ConflictingPointer { .. })));
        assert!(matches!(base.with_null_at("bad"), Err(ConstraintError::Pointer(_))));

        let constraint: UpdateConstraint = base.without("/c").expect("valid").into();
        assert_eq!(constraint.alternatives().len(), 1);
    }
}
