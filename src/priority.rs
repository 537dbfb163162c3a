//! Task ordering: urgency classification, smart sort, manual reorder and the
//! order rendered by task views.
//!
//! Every function here is pure. `now` is the caller's civil local time; due
//! dates carry no timezone, so comparisons happen in the same civil frame.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{Task, TaskStatus};

/// Urgency tiers in ascending sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Overdue,
    DueTodayTimed,
    DueToday,
    /// Days until the due date.
    Future(i64),
    NoDueDate,
}

/// Date-only comparisons are anchored at midday so that a civil date never
/// lands on a day boundary.
fn neutral_hour() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default()
}

fn anchored(date: NaiveDate) -> NaiveDateTime {
    date.and_time(neutral_hour())
}

pub fn is_overdue(task: &Task, now: NaiveDateTime) -> bool {
    if task.status == TaskStatus::Complete {
        return false;
    }
    let Some(due) = task.due_date else {
        return false;
    };
    match task.time {
        Some(time) => due.and_time(time) < now,
        None => anchored(due) < anchored(now.date()),
    }
}

pub fn classify(task: &Task, now: NaiveDateTime) -> Urgency {
    if is_overdue(task, now) {
        return Urgency::Overdue;
    }
    let Some(due) = task.due_date else {
        return Urgency::NoDueDate;
    };
    let today = now.date();
    if due == today {
        if task.time.is_some() {
            Urgency::DueTodayTimed
        } else {
            Urgency::DueToday
        }
    } else {
        Urgency::Future((due - today).num_days())
    }
}

fn due_instant(task: &Task) -> Option<NaiveDateTime> {
    task.due_date
        .map(|date| date.and_time(task.time.unwrap_or_else(neutral_hour)))
}

fn newest_first(a: &Task, b: &Task) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

fn overdue_cmp(a: &Task, b: &Task) -> Ordering {
    due_instant(a)
        .cmp(&due_instant(b))
        .then_with(|| newest_first(a, b))
}

/// Ascending due date; on the same day timed tasks come first; no due date sorts last.
fn due_cmp(a: &Task, b: &Task) -> Ordering {
    match (a.due_date, b.due_date) {
        (Some(da), Some(db)) => da.cmp(&db).then_with(|| match (a.time, b.time) {
            (Some(ta), Some(tb)) => ta.cmp(&tb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn smart_cmp(a: &Task, b: &Task, now: NaiveDateTime) -> Ordering {
    let ua = classify(a, now);
    let ub = classify(b, now);
    if ua == Urgency::Overdue && ub == Urgency::Overdue {
        return overdue_cmp(a, b);
    }
    ua.cmp(&ub)
        .then_with(|| {
            if ua == Urgency::DueTodayTimed {
                a.time.cmp(&b.time)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| newest_first(a, b))
}

fn display_cmp(a: &Task, b: &Task, now: NaiveDateTime) -> Ordering {
    match (is_overdue(a, now), is_overdue(b, now)) {
        (true, true) => return overdue_cmp(a, b),
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    match (a.custom_priority > 0, b.custom_priority > 0) {
        (true, true) => b
            .custom_priority
            .cmp(&a.custom_priority)
            .then_with(|| newest_first(a, b)),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => due_cmp(a, b).then_with(|| newest_first(a, b)),
    }
}

/// Assigns `len - index` to every task so the current list order becomes the manual order.
pub fn bake_priorities(tasks: &mut [Task]) {
    let len = tasks.len();
    for (index, task) in tasks.iter_mut().enumerate() {
        task.custom_priority = (len - index) as i64;
    }
}

/// One-shot re-prioritization: sorts by urgency and bakes the result in.
pub fn smart_sort(mut tasks: Vec<Task>, now: NaiveDateTime) -> Vec<Task> {
    tasks.sort_by(|a, b| smart_cmp(a, b, now));
    bake_priorities(&mut tasks);
    tasks
}

/// Moves `moved_id` to the position currently held by `target_id` and re-bakes
/// the whole list. Returns `None` when either id is unknown.
pub fn manual_reorder(mut tasks: Vec<Task>, moved_id: &str, target_id: &str) -> Option<Vec<Task>> {
    let from = tasks.iter().position(|task| task.id == moved_id)?;
    let to = tasks.iter().position(|task| task.id == target_id)?;
    let moved = tasks.remove(from);
    tasks.insert(to, moved);
    bake_priorities(&mut tasks);
    Some(tasks)
}

/// The order task views render.
pub fn display_order(mut tasks: Vec<Task>, now: NaiveDateTime) -> Vec<Task> {
    tasks.sort_by(|a, b| display_cmp(a, b, now));
    tasks
}
