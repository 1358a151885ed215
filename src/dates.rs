//! Date-window handling for site configurations.
//!
//! A site's `dates` field is either a start/end pair (a continuous search
//! window) or, with more than two entries, an explicit list of single days.

use chrono::{Datelike, NaiveDate};

use crate::error::SiteConfigError;

pub fn parse_date(s: &str) -> Result<NaiveDate, SiteConfigError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| SiteConfigError::BadDate(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSpec {
    Range { start: NaiveDate, end: NaiveDate },
    /// Sorted, deduplicated, never empty.
    Days(Vec<NaiveDate>),
}

impl DateSpec {
    pub fn from_strings(dates: &[String]) -> Result<Self, SiteConfigError> {
        match dates.len() {
            0 | 1 => Err(SiteConfigError::TooFewDates(dates.len())),
            2 => {
                let start = parse_date(&dates[0])?;
                let end = parse_date(&dates[1])?;
                if start > end {
                    return Err(SiteConfigError::ReversedDates {
                        start: dates[0].clone(),
                        end: dates[1].clone(),
                    });
                }
                Ok(DateSpec::Range { start, end })
            }
            _ => {
                let mut days = dates
                    .iter()
                    .map(|d| parse_date(d))
                    .collect::<Result<Vec<_>, _>>()?;
                days.sort_unstable();
                days.dedup();
                Ok(DateSpec::Days(days))
            }
        }
    }

    pub fn start(&self) -> NaiveDate {
        match self {
            DateSpec::Range { start, .. } => *start,
            DateSpec::Days(days) => days[0],
        }
    }

    pub fn end(&self) -> NaiveDate {
        match self {
            DateSpec::Range { end, .. } => *end,
            DateSpec::Days(days) => days[days.len() - 1],
        }
    }

    /// Inclusive list of calendar years the window touches, used to group
    /// the exported line files.
    pub fn year_list(&self) -> Vec<i32> {
        (self.start().year()..=self.end().year()).collect()
    }

    /// Intersect the window with a satellite's operational span. `None`
    /// means the satellite has nothing to offer for this site.
    pub fn clamp(&self, span_start: NaiveDate, span_end: Option<NaiveDate>) -> Option<DateSpec> {
        match self {
            DateSpec::Range { start, end } => {
                let s = (*start).max(span_start);
                let e = span_end.map_or(*end, |se| (*end).min(se));
                (s <= e).then_some(DateSpec::Range { start: s, end: e })
            }
            DateSpec::Days(days) => {
                let kept: Vec<NaiveDate> = days
                    .iter()
                    .copied()
                    .filter(|d| *d >= span_start && span_end.map_or(true, |se| *d <= se))
                    .collect();
                (!kept.is_empty()).then_some(DateSpec::Days(kept))
            }
        }
    }

    /// Search intervals to hand to the catalog: one for a range, one per
    /// day for an explicit list.
    pub fn intervals(&self) -> Vec<(NaiveDate, NaiveDate)> {
        match self {
            DateSpec::Range { start, end } => vec![(*start, *end)],
            DateSpec::Days(days) => days.iter().map(|d| (*d, *d)).collect(),
        }
    }
}

/// Inclusive RFC3339 interval for a STAC `datetime` filter.
pub fn datetime_interval(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{}T00:00:00Z/{}T23:59:59Z",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}
