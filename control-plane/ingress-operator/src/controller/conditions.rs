use chrono::{SecondsFormat, Utc};

use crate::crd::{Condition, ConditionType};

pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Stamp `cond` with a transition time: the previous one when the status is
/// unchanged, `now` otherwise.
pub fn carry_transition_time(
    cond: &mut Condition,
    previous: Option<&Condition>,
    now: &str,
) {
    cond.last_transition_time = match previous {
        Some(prev) if prev.status == cond.status => prev
            .last_transition_time
            .clone()
            .or_else(|| Some(now.to_string())),
        _ => Some(now.to_string()),
    };
}

/// Insert or replace the condition of the same type, keeping list order.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    mut cond: Condition,
    now: &str,
) {
    let type_ = cond.type_;
    carry_transition_time(&mut cond, find(conditions, type_), now);
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(slot) => *slot = cond,
        None => conditions.push(cond),
    }
}

/// Equality that ignores transition timestamps.
pub fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.type_ == y.type_
                && x.status == y.status
                && x.reason == y.reason
                && x.message == y.message
        })
}
