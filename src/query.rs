use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Bin;
use crate::domain::Tag;
use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Instrument(u32),
    StartTime(DateTime<Utc>),
    EndTime(DateTime<Utc>),
    MinDepth(f64),
    MaxDepth(f64),
    SampleType(String),
    Cruise(String),
    Tag(Tag),
    Pids(Arc<BTreeSet<String>>),
}

impl Predicate {
    pub fn matches(&self, bin: &Bin) -> bool {
        match self {
            Predicate::Instrument(value) => bin.instrument == *value,
            Predicate::StartTime(start) => bin.sample_time >= *start,
            Predicate::EndTime(end) => bin.sample_time <= *end,
            Predicate::MinDepth(min) => bin.depth.is_some_and(|depth| depth >= *min),
            Predicate::MaxDepth(max) => bin.depth.is_some_and(|depth| depth <= *max),
            Predicate::SampleType(value) => bin.sample_type.as_deref() == Some(value.as_str()),
            Predicate::Cruise(value) => bin.cruise.as_deref() == Some(value.as_str()),
            Predicate::Tag(tag) => bin.tags.contains(tag),
            Predicate::Pids(pids) => pids.contains(bin.pid()),
        }
    }
}

/// A conjunction of predicates. The empty conjunction matches every bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    predicates: Vec<Predicate>,
}

impl Criteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn and(mut self, other: Criteria) -> Self {
        self.predicates.extend(other.predicates);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, bin: &Bin) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(bin))
    }
}

/// Optional attribute criteria as given by a caller. Times are strings so
/// date-only bounds can be widened to whole days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub instrument: Option<u32>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub min_depth: Option<f64>,
    #[serde(default)]
    pub max_depth: Option<f64>,
    #[serde(default)]
    pub sample_type: Option<String>,
    #[serde(default)]
    pub cruise: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instrument(mut self, value: u32) -> Self {
        self.instrument = Some(value);
        self
    }

    pub fn start_time(mut self, value: impl Into<String>) -> Self {
        self.start_time = Some(value.into());
        self
    }

    pub fn end_time(mut self, value: impl Into<String>) -> Self {
        self.end_time = Some(value.into());
        self
    }

    pub fn min_depth(mut self, value: f64) -> Self {
        self.min_depth = Some(value);
        self
    }

    pub fn max_depth(mut self, value: f64) -> Self {
        self.max_depth = Some(value);
        self
    }

    pub fn sample_type(mut self, value: impl Into<String>) -> Self {
        self.sample_type = Some(value.into());
        self
    }

    pub fn cruise(mut self, value: impl Into<String>) -> Self {
        self.cruise = Some(value.into());
        self
    }

    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tag = Some(value.into());
        self
    }

    pub fn to_criteria(&self) -> Result<Criteria, CatalogError> {
        let mut criteria = Criteria::all();
        if let Some(value) = self.instrument {
            criteria = criteria.with(Predicate::Instrument(value));
        }
        if let Some(value) = &self.start_time {
            criteria = criteria.with(Predicate::StartTime(parse_time_bound(
                value,
                TimeBound::Start,
            )?));
        }
        if let Some(value) = &self.end_time {
            criteria = criteria.with(Predicate::EndTime(parse_time_bound(value, TimeBound::End)?));
        }
        if let Some(value) = self.min_depth {
            criteria = criteria.with(Predicate::MinDepth(value));
        }
        if let Some(value) = self.max_depth {
            criteria = criteria.with(Predicate::MaxDepth(value));
        }
        if let Some(value) = &self.sample_type {
            criteria = criteria.with(Predicate::SampleType(value.clone()));
        }
        if let Some(value) = &self.cruise {
            criteria = criteria.with(Predicate::Cruise(value.clone()));
        }
        if let Some(value) = &self.tag {
            criteria = criteria.with(Predicate::Tag(value.parse()?));
        }
        Ok(criteria)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    Start,
    End,
}

/// Parses RFC 3339, a naive `YYYY-MM-DD[T ]HH:MM:SS` (taken as UTC) or a bare
/// date. A bare date is the first instant of the day as a start bound and
/// the last instant of the day as an end bound.
pub fn parse_time_bound(value: &str, bound: TimeBound) -> Result<DateTime<Utc>, CatalogError> {
    let trimmed = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(time.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(time.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| CatalogError::InvalidTime(value.to_string()))?;
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    Ok(match bound {
        TimeBound::Start => start,
        TimeBound::End => start + TimeDelta::days(1) - TimeDelta::nanoseconds(1),
    })
}
