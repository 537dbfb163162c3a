//! Statistics derived from the completed-task history.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use serde::Serialize;

use crate::models::{CompletedTask, StoreData, TaskType};

/// Length of the daily histogram when the caller does not ask for one.
pub const DEFAULT_HISTORY_DAYS: u32 = 14;
/// Longest daily histogram served; larger requests are clamped.
pub const MAX_HISTORY_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub total: usize,
    /// Calendar days elapsed in the period, today included.
    pub days: u32,
    pub average_per_day: f64,
}

impl PeriodTotals {
    fn new(total: usize, days: u32) -> Self {
        let average_per_day = if days == 0 {
            0.0
        } else {
            total as f64 / f64::from(days)
        };
        Self {
            total,
            days,
            average_per_day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSplit {
    pub academic: usize,
    pub personal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_completed: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub today: PeriodTotals,
    pub week: PeriodTotals,
    pub month: PeriodTotals,
    pub semester: Option<PeriodTotals>,
    /// 24 buckets, local hour of completion.
    pub by_hour: Vec<usize>,
    /// 7 buckets, Monday first.
    pub by_weekday: Vec<usize>,
    /// Oldest day first, ending today.
    pub daily: Vec<DailyCount>,
    pub by_type: TypeSplit,
}

/// Parses the semester bounds stored as `YYYY-MM-DD` strings.
pub fn semester_range(data: &StoreData) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::parse_from_str(data.semester_start_date.trim(), "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(data.semester_end_date.trim(), "%Y-%m-%d").ok()?;
    Some((start, end))
}

fn count_between(per_day: &HashMap<NaiveDate, usize>, start: NaiveDate, end: NaiveDate) -> usize {
    per_day
        .iter()
        .filter(|(date, _)| **date >= start && **date <= end)
        .map(|(_, count)| *count)
        .sum()
}

/// Totals for `[start, min(end, today)]`. A period that has not started yet has zero days.
fn period(
    per_day: &HashMap<NaiveDate, usize>,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> PeriodTotals {
    let end = end.min(today);
    if end < start {
        return PeriodTotals::new(0, 0);
    }
    let days = (end - start).num_days() as u32 + 1;
    PeriodTotals::new(count_between(per_day, start, end), days)
}

fn streaks(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> (u32, u32) {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        run = match previous {
            Some(prev) if prev.succ_opt() == Some(*day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*day);
    }

    let mut cursor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };
    let mut current = 0;
    while let Some(day) = cursor.filter(|day| days.contains(day)) {
        current += 1;
        cursor = day.pred_opt();
    }
    (current, longest)
}

/// Aggregates `completed` as seen from `now`'s timezone. Tasks without a
/// completion instant are ignored.
pub fn summarize<Tz: TimeZone>(
    completed: &[CompletedTask],
    now: DateTime<Tz>,
    semester: Option<(NaiveDate, NaiveDate)>,
    history_days: u32,
) -> StatsSummary {
    let zone = now.timezone();
    let today = now.naive_local().date();
    let finished: Vec<(NaiveDateTime, TaskType)> = completed
        .iter()
        .filter_map(|task| {
            let at = task.completed_at?;
            Some((at.with_timezone(&zone).naive_local(), task.task_type))
        })
        .collect();

    let mut per_day: HashMap<NaiveDate, usize> = HashMap::new();
    let mut by_hour = vec![0; 24];
    let mut by_weekday = vec![0; 7];
    let mut by_type = TypeSplit::default();
    for (at, task_type) in &finished {
        *per_day.entry(at.date()).or_default() += 1;
        by_hour[at.hour() as usize] += 1;
        by_weekday[at.weekday().num_days_from_monday() as usize] += 1;
        match task_type {
            TaskType::Academic => by_type.academic += 1,
            TaskType::Personal => by_type.personal += 1,
        }
    }

    let days: BTreeSet<NaiveDate> = per_day.keys().copied().collect();
    let (current_streak, longest_streak) = streaks(&days, today);

    let week_start = today
        .checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_monday())))
        .unwrap_or(today);
    let month_start = today.with_day(1).unwrap_or(today);

    let daily = (0..history_days.min(MAX_HISTORY_DAYS))
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
        .map(|date| DailyCount {
            date,
            count: per_day.get(&date).copied().unwrap_or(0),
        })
        .collect();

    StatsSummary {
        total_completed: finished.len(),
        current_streak,
        longest_streak,
        today: period(&per_day, today, today, today),
        week: period(&per_day, week_start, today, today),
        month: period(&per_day, month_start, today, today),
        semester: semester.map(|(start, end)| period(&per_day, start, end, today)),
        by_hour,
        by_weekday,
        daily,
        by_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskStatus};
    use chrono::{FixedOffset, Utc};

    fn zone() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    fn local(m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        zone().with_ymd_and_hms(2026, m, d, h, 0, 0).unwrap()
    }

    fn done(id: &str, at: DateTime<FixedOffset>, task_type: TaskType) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            url: None,
            due_date: None,
            time: None,
            status: TaskStatus::Complete,
            task_type,
            attachments: Vec::new(),
            custom_priority: 0,
            created_at: at.with_timezone(&Utc),
            completed_at: Some(at.with_timezone(&Utc)),
        }
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    #[test]
    fn empty_history_yields_zeroes() {
        let summary = summarize(&[], local(10, 16, 12), None, 7);
        assert_eq!(summary.total_completed, 0);
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.longest_streak, 0);
        assert_eq!(summary.today, PeriodTotals::new(0, 1));
        assert_eq!(summary.daily.len(), 7);
        assert!(summary.daily.iter().all(|d| d.count == 0));
        assert!(summary.semester.is_none());
    }

    #[test]
    fn streak_continues_from_yesterday_when_today_is_empty() {
        let history = vec![
            done("a", local(10, 15, 9), TaskType::Academic),
            done("b", local(10, 14, 9), TaskType::Academic),
            done("c", local(10, 13, 9), TaskType::Academic),
            done("d", local(10, 10, 9), TaskType::Academic),
            done("e", local(10, 9, 9), TaskType::Academic),
            done("f", local(10, 8, 9), TaskType::Academic),
            done("g", local(10, 7, 9), TaskType::Academic),
        ];
        let summary = summarize(&history, local(10, 16, 12), None, 7);
        assert_eq!(summary.current_streak, 3);
        assert_eq!(summary.longest_streak, 4);

        let summary = summarize(&history, local(10, 17, 12), None, 7);
        assert_eq!(summary.current_streak, 0);
    }

    #[test]
    fn days_follow_the_callers_timezone() {
        // 23:30 at UTC-5 is already the next day in UTC.
        let late = zone().with_ymd_and_hms(2026, 10, 15, 23, 30, 0).unwrap();
        let history = vec![done("late", late, TaskType::Personal)];
        let summary = summarize(&history, local(10, 16, 8), None, 2);
        assert_eq!(
            summary.daily,
            vec![
                DailyCount { date: day(10, 15), count: 1 },
                DailyCount { date: day(10, 16), count: 0 },
            ]
        );
        assert_eq!(summary.by_hour[23], 1);
        assert_eq!(summary.current_streak, 1);
    }

    #[test]
    fn history_length_is_clamped() {
        let history = vec![done("a", local(10, 16, 9), TaskType::Academic)];
        let summary = summarize(&history, local(10, 16, 18), None, u32::MAX);
        assert_eq!(summary.daily.len(), MAX_HISTORY_DAYS as usize);
        assert_eq!(summary.daily.last().unwrap().count, 1);

        let short = summarize(&history, local(10, 16, 18), None, 3);
        assert_eq!(short.daily.len(), 3);
    }

    #[test]
    fn period_totals_and_histograms() {
        // 2026-10-16 is a Friday; the ISO week started on Monday 10-12.
        let history = vec![
            done("a", local(10, 16, 9), TaskType::Academic),
            done("b", local(10, 16, 14), TaskType::Personal),
            done("c", local(10, 12, 9), TaskType::Academic),
            done("d", local(10, 11, 20), TaskType::Academic),
            done("e", local(9, 30, 9), TaskType::Personal),
        ];
        let semester = Some((day(9, 1), day(12, 20)));
        let summary = summarize(&history, local(10, 16, 18), semester, 14);

        assert_eq!(summary.total_completed, 5);
        assert_eq!(summary.today, PeriodTotals::new(2, 1));
        assert_eq!(summary.week, PeriodTotals::new(3, 5));
        assert_eq!(summary.month, PeriodTotals::new(4, 16));
        assert_eq!(summary.month.average_per_day, 0.25);
        let semester = summary.semester.unwrap();
        assert_eq!(semester.total, 5);
        assert_eq!(semester.days, 46);

        assert_eq!(summary.by_hour[9], 3);
        assert_eq!(summary.by_hour.iter().sum::<usize>(), 5);
        assert_eq!(summary.by_weekday[4], 2, "friday");
        assert_eq!(summary.by_weekday[0], 1, "monday");
        assert_eq!(summary.by_weekday[6], 1, "sunday");
        assert_eq!(summary.by_type, TypeSplit { academic: 3, personal: 2 });
        assert_eq!(summary.daily.first().unwrap().date, day(10, 3));
        assert_eq!(summary.daily.last().unwrap().count, 2);
    }

    #[test]
    fn future_semester_has_no_elapsed_days() {
        let summary = summarize(&[], local(10, 16, 12), Some((day(11, 1), day(12, 1))), 1);
        assert_eq!(summary.semester, Some(PeriodTotals::new(0, 0)));
    }

    #[test]
    fn tasks_without_completion_instant_are_ignored() {
        let mut task = done("x", local(10, 16, 9), TaskType::Academic);
        task.completed_at = None;
        let summary = summarize(&[task], local(10, 16, 12), None, 1);
        assert_eq!(summary.total_completed, 0);
    }

    #[test]
    fn semester_range_requires_both_dates() {
        let mut data = StoreData::default();
        assert_eq!(semester_range(&data), None);
        data.semester_start_date = "2026-09-01".into();
        assert_eq!(semester_range(&data), None);
        data.semester_end_date = "2026-12-20".into();
        assert_eq!(semester_range(&data), Some((day(9, 1), day(12, 20))));
    }
}
