//! Time windows applied before aggregation

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    /// First day of the current month through today
    Month,
    /// First day of (current month − 2) through today
    Quarter,
    /// First day of (current month − 5) through today
    HalfYear,
    /// The whole current calendar year
    Year,
    /// Open-ended, including future-dated records
    #[default]
    AllTime,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown time window '{0}' (expected month, quarter, half_year, year or all_time)")]
pub struct ParseWindowError(String);

impl FromStr for TimeWindow {
    type Err = ParseWindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "month" => Ok(TimeWindow::Month),
            "quarter" => Ok(TimeWindow::Quarter),
            "half_year" | "halfyear" => Ok(TimeWindow::HalfYear),
            "year" => Ok(TimeWindow::Year),
            "all_time" | "all" | "alltime" => Ok(TimeWindow::AllTime),
            _ => Err(ParseWindowError(s.to_string())),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeWindow::Month => "month",
            TimeWindow::Quarter => "quarter",
            TimeWindow::HalfYear => "half_year",
            TimeWindow::Year => "year",
            TimeWindow::AllTime => "all_time",
        })
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Whether `[start, end]` intersects this range. A missing start is the
    /// unbounded past, a missing end means still ongoing.
    pub fn overlaps(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
        start.map_or(true, |s| s <= self.end) && end.map_or(true, |e| e >= self.start)
    }
}

impl TimeWindow {
    /// The concrete range on `today`, or `None` for [`TimeWindow::AllTime`]
    pub fn range(self, today: NaiveDate) -> Option<DateRange> {
        let month_start = |months_back: u32| {
            first_of_month(today)
                .checked_sub_months(Months::new(months_back))
                .unwrap_or(NaiveDate::MIN)
        };
        match self {
            TimeWindow::Month => Some(DateRange {
                start: month_start(0),
                end: today,
            }),
            TimeWindow::Quarter => Some(DateRange {
                start: month_start(2),
                end: today,
            }),
            TimeWindow::HalfYear => Some(DateRange {
                start: month_start(5),
                end: today,
            }),
            TimeWindow::Year => {
                let start = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
                let end = NaiveDate::from_ymd_opt(today.year(), 12, 31)?;
                Some(DateRange { start, end })
            }
            TimeWindow::AllTime => None,
        }
    }

    /// Single-date records. Undated records only count towards all-time.
    pub fn includes_date(self, date: Option<NaiveDate>, today: NaiveDate) -> bool {
        match self.range(today) {
            None => true,
            Some(range) => date.is_some_and(|d| range.contains(d)),
        }
    }

    /// Span records (projects): included when the span overlaps the window
    pub fn includes_span(
        self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> bool {
        match self.range(today) {
            None => true,
            Some(range) => range.overlaps(start, end),
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_range() {
        let range = TimeWindow::Month.range(d(2024, 1, 20)).unwrap();
        assert_eq!(range.start, d(2024, 1, 1));
        assert_eq!(range.end, d(2024, 1, 20));
    }

    #[test]
    fn test_quarter_and_half_year_cross_year_boundary() {
        let q = TimeWindow::Quarter.range(d(2024, 2, 15)).unwrap();
        assert_eq!(q.start, d(2023, 12, 1));
        assert_eq!(q.end, d(2024, 2, 15));

        let h = TimeWindow::HalfYear.range(d(2024, 3, 31)).unwrap();
        assert_eq!(h.start, d(2023, 10, 1));
    }

    #[test]
    fn test_year_is_whole_calendar_year() {
        let y = TimeWindow::Year.range(d(2024, 6, 1)).unwrap();
        assert_eq!(y.start, d(2024, 1, 1));
        assert_eq!(y.end, d(2024, 12, 31));
    }

    #[test]
    fn test_all_time_includes_future_and_undated() {
        let today = d(2024, 1, 20);
        assert!(TimeWindow::AllTime.range(today).is_none());
        assert!(TimeWindow::AllTime.includes_date(Some(d(2030, 1, 1)), today));
        assert!(TimeWindow::AllTime.includes_date(None, today));
    }

    #[test]
    fn test_open_ended_project_stays_included() {
        let start = Some(d(2024, 1, 10));
        assert!(TimeWindow::Month.includes_span(start, None, d(2024, 1, 20)));
        assert!(TimeWindow::Month.includes_span(start, None, d(2024, 3, 1)));
    }

    #[test]
    fn test_span_overlap_edges() {
        let today = d(2024, 3, 15);
        // Ended before the window
        assert!(!TimeWindow::Month.includes_span(Some(d(2024, 1, 1)), Some(d(2024, 2, 29)), today));
        // Ends on the first day of the window
        assert!(TimeWindow::Month.includes_span(Some(d(2024, 1, 1)), Some(d(2024, 3, 1)), today));
        // Starts after today
        assert!(!TimeWindow::Month.includes_span(Some(d(2024, 3, 16)), None, today));
        // No dates at all: treated as ongoing
        assert!(TimeWindow::Month.includes_span(None, None, today));
    }

    #[test]
    fn test_single_date_inclusion() {
        let today = d(2024, 3, 15);
        assert!(TimeWindow::Month.includes_date(Some(d(2024, 3, 1)), today));
        assert!(!TimeWindow::Month.includes_date(Some(d(2024, 2, 29)), today));
        assert!(!TimeWindow::Month.includes_date(Some(d(2024, 3, 16)), today));
        assert!(!TimeWindow::Month.includes_date(None, today));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("half-year".parse::<TimeWindow>().unwrap(), TimeWindow::HalfYear);
        assert_eq!("ALL_TIME".parse::<TimeWindow>().unwrap(), TimeWindow::AllTime);
        assert!("decade".parse::<TimeWindow>().is_err());
        assert_eq!(TimeWindow::HalfYear.to_string(), "half_year");
    }
}
