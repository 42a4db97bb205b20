//! Update constraint evaluation against the current state of a topic.

use strata_topics::{
    ConstraintOperator, JsonCondition, JsonPointer, Lookup, LockToken, PartialJsonConstraint, TopicValue,
    UpdateConstraint, ValueConstraint,
};

/// What a constraint sees of an existing topic.
#[derive(Clone, Copy, Debug)]
pub(super) struct TopicView<'a> {
    pub value: Option<&'a TopicValue>,
}

/// Any alternative whose locks are all held and whose value condition holds.
pub(super) fn is_satisfied<F>(constraint: &UpdateConstraint, topic: Option<TopicView<'_>>, holds: F) -> bool
where
    F: Fn(&LockToken) -> bool,
{
    constraint.alternatives().iter().any(|alternative| {
        alternative.locks().all(&holds) && alternative.value().map_or(true, |value| value_holds(value, topic))
    })
}

fn value_holds(constraint: &ValueConstraint, topic: Option<TopicView<'_>>) -> bool {
    let current = topic.and_then(|topic| topic.value);
    match constraint {
        ValueConstraint::NoTopic => topic.is_none(),
        ValueConstraint::NoValue => topic.is_some() && current.is_none(),
        ValueConstraint::Compare { operator, value } => current.is_some_and(|current| compare(*operator, current, value)),
        ValueConstraint::PartialJson(partial) => match current {
            Some(TopicValue::Json(document)) => partial_json_holds(partial, document),
            _ => false,
        },
    }
}

fn partial_json_holds(partial: &PartialJsonConstraint, document: &serde_json::Value) -> bool {
    let conditions = partial.conditions().all(|(pointer, condition)| match (condition, pointer.lookup(document)) {
        (JsonCondition::Null, Lookup::Null) => true,
        (JsonCondition::Compare { operator, value }, Lookup::Value(current)) => compare(
            *operator,
            &TopicValue::Json(current.clone()),
            &TopicValue::Json(value.clone()),
        ),
        _ => false,
    });
    conditions && partial.absent().all(|pointer: &JsonPointer| matches!(pointer.lookup(document), Lookup::Absent))
}

/// `Is` compares type and value. The others compare leniently: numbers by
/// numeric value, anything else by its textual form. Orderings only hold
/// between values with a numeric reading.
pub(super) fn compare(operator: ConstraintOperator, current: &TopicValue, expected: &TopicValue) -> bool {
    match operator {
        ConstraintOperator::Is => current == expected,
        ConstraintOperator::Eq => lenient_eq(current, expected),
        ConstraintOperator::Ne => !lenient_eq(current, expected),
        ConstraintOperator::Gt | ConstraintOperator::Ge | ConstraintOperator::Lt | ConstraintOperator::Le => {
            let (Some(current), Some(expected)) = (current.as_number(), expected.as_number()) else {
                return false;
            };
            match operator {
                ConstraintOperator::Gt => current > expected,
                ConstraintOperator::Ge => current >= expected,
                ConstraintOperator::Lt => current < expected,
                _ => current <= expected,
            }
        }
    }
}

fn lenient_eq(current: &TopicValue, expected: &TopicValue) -> bool {
    if current == expected {
        return true;
    }
    if let (Some(a), Some(b)) = (current.as_number(), expected.as_number()) {
        return a == b;
    }
    matches!((current.as_text(), expected.as_text()), (Some(a), Some(b)) if a == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(value: Option<&TopicValue>) -> Option<TopicView<'_>> {
        Some(TopicView { value })
    }

    #[test]
    fn existence_constraints() {
        let value = TopicValue::String("x".into());
        let nobody = |_: &LockToken| false;

        assert!(is_satisfied(&UpdateConstraint::no_topic(), None, nobody));
        assert!(!is_satisfied(&UpdateConstraint::no_topic(), view(None), nobody));
        assert!(is_satisfied(&UpdateConstraint::no_value(), view(None), nobody));
        assert!(!is_satisfied(&UpdateConstraint::no_value(), view(Some(&value)), nobody));
        assert!(!is_satisfied(&UpdateConstraint::no_value(), None, nobody));
        assert!(is_satisfied(&UpdateConstraint::unconstrained(), None, nobody));
    }

    #[test]
    fn lock_alternatives() {
        let held = LockToken { name: "l".into(), sequence: 4 };
        let stale = LockToken { name: "l".into(), sequence: 3 };
        let holds = |token: &LockToken| token == &held;

        assert!(is_satisfied(&UpdateConstraint::locked(held.clone()), None, holds));
        assert!(!is_satisfied(&UpdateConstraint::locked(stale.clone()), None, holds));
        let either = UpdateConstraint::locked(stale).or(&UpdateConstraint::no_topic());
        assert!(is_satisfied(&either, None, holds));
    }

    #[test]
    fn lenient_comparisons() {
        use ConstraintOperator::*;
        let int = TopicValue::Int64(5);
        assert!(compare(Eq, &int, &TopicValue::String("5".into())));
        assert!(compare(Eq, &int, &TopicValue::Double(5.0)));
        assert!(!compare(Is, &int, &TopicValue::Double(5.0)));
        assert!(compare(Is, &int, &TopicValue::Int64(5)));
        assert!(compare(Ne, &int, &TopicValue::Int64(6)));
        assert!(compare(Gt, &int, &TopicValue::String("4.5".into())));
        assert!(compare(Le, &int, &TopicValue::Int64(5)));
        assert!(!compare(Lt, &int, &TopicValue::String("five".into())));
        assert!(compare(Eq, &TopicValue::Json(json!("abc")), &TopicValue::String("abc".into())));
    }

    #[test]
    fn partial_json_distinguishes_null_from_absent() {
        let value = TopicValue::Json(json!({"a": null, "b": {"c": 3}}));
        let nobody = |_: &LockToken| false;
        let check = |partial: PartialJsonConstraint| {
            is_satisfied(&UpdateConstraint::from(partial), view(Some(&value)), nobody)
        };

        assert!(check(UpdateConstraint::json_value().with_null_at("/a").expect("null")));
        assert!(!check(UpdateConstraint::json_value().without("/a").expect("without")));
        assert!(check(UpdateConstraint::json_value().without("/z").expect("without")));
        assert!(!check(UpdateConstraint::json_value().with_null_at("/z").expect("null")));
        assert!(check(
            UpdateConstraint::json_value().with_value_at("/b/c", ConstraintOperator::Ge, json!(3)).expect("value")
        ));
        assert!(!check(
            UpdateConstraint::json_value().with_value_at("/b/c", ConstraintOperator::Is, json!("3")).expect("value")
        ));
    }

    #[test]
    fn partial_json_needs_a_json_value() {
        let value = TopicValue::String("{}".into());
        let partial = UpdateConstraint::json_value().without("/a").expect("without");
        assert!(!is_satisfied(&UpdateConstraint::from(partial), view(Some(&value)), |_| false));
    }
}
