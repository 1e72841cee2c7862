//! Employment history ordering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A calendar date with optional month/day (`YYYY`, `YYYY-MM`, `YYYY-MM-DD`).
///
/// Less precise dates order before more precise ones within the same year/month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        // Tolerate full timestamps ("2020-05-01T00:00:00Z").
        let raw = raw.split(['T', ' ']).next().unwrap_or(raw);
        let mut parts = raw.split('-');

        let year_str = parts.next()?;
        if year_str.len() != 4 {
            return None;
        }
        let year: i32 = year_str.parse().ok()?;
        let month = match parts.next() {
            Some(m) => {
                let m: u32 = m.parse().ok()?;
                if !(1..=12).contains(&m) {
                    return None;
                }
                Some(m)
            }
            None => None,
        };
        let day = match parts.next() {
            Some(d) => {
                let d: u32 = d.parse().ok()?;
                if !(1..=31).contains(&d) {
                    return None;
                }
                Some(d)
            }
            None => None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { year, month, day })
    }
}

/// One employment entry as returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experience {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl Experience {
    pub fn is_ongoing(&self) -> bool {
        self.end_date
            .as_deref()
            .is_none_or(|d| d.trim().is_empty())
    }
}

// Ongoing < dated (newest first) < present-but-unparseable.
fn end_rank(e: &Experience) -> (u8, Option<std::cmp::Reverse<PartialDate>>) {
    if e.is_ongoing() {
        return (0, None);
    }
    match e.end_date.as_deref().and_then(PartialDate::parse) {
        Some(d) => (1, Some(std::cmp::Reverse(d))),
        None => (2, None),
    }
}

// Dated (newest first) < missing or unparseable.
fn start_rank(e: &Experience) -> (u8, Option<std::cmp::Reverse<PartialDate>>) {
    match e.start_date.as_deref().and_then(PartialDate::parse) {
        Some(d) => (0, Some(std::cmp::Reverse(d))),
        None => (1, None),
    }
}

pub fn compare_recency(a: &Experience, b: &Experience) -> Ordering {
    end_rank(a)
        .cmp(&end_rank(b))
        .then_with(|| start_rank(a).cmp(&start_rank(b)))
}

/// Most recent first. Stable, so ties keep their input order.
pub fn sort_by_recency(entries: &mut [Experience]) {
    entries.sort_by(compare_recency);
}

/// The current (or latest) position, if any.
pub fn most_recent(entries: &[Experience]) -> Option<&Experience> {
    entries
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| compare_recency(a, b).then(ia.cmp(ib)))
        .map(|(_, e)| e)
}
