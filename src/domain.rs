use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

static V2_PID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<lid>D(?P<date>\d{8})T(?P<time>\d{6})_IFCB(?P<inst>\d+))(?P<rest>.*)$").unwrap()
});

static V1_PID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<lid>IFCB(?P<inst>\d+)_(?P<year>\d{4})_(?P<doy>\d{3})_(?P<time>\d{6}))(?P<rest>.*)$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    V2,
}

/// A parsed permanent identifier.
///
/// Accepts both instrument naming schemes, with or without a namespace
/// prefix and a product or extension suffix. Only the bare bin identifier
/// is kept as the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pid {
    bin_lid: String,
    namespace: Option<String>,
    timestamp: DateTime<Utc>,
    instrument: u32,
    schema: SchemaVersion,
}

impl Pid {
    pub fn as_str(&self) -> &str {
        &self.bin_lid
    }

    pub fn bin_lid(&self) -> &str {
        &self.bin_lid
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn instrument(&self) -> u32 {
        self.instrument
    }

    pub fn schema(&self) -> SchemaVersion {
        self.schema
    }

    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    pub fn day_of_year(&self) -> u32 {
        self.timestamp.ordinal()
    }

    /// Year followed by the zero-padded day of year, e.g. `2022102`.
    pub fn yearday(&self) -> String {
        format!("{:04}{:03}", self.year(), self.day_of_year())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bin_lid)
    }
}

impl FromStr for Pid {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || CatalogError::MalformedIdentifier(value.to_string());
        let trimmed = value.trim();
        let (namespace, local) = match trimmed.rfind('/') {
            Some(idx) => (Some(trimmed[..=idx].to_string()), &trimmed[idx + 1..]),
            None => (None, trimmed),
        };

        if let Some(caps) = V2_PID.captures(local) {
            check_suffix(&caps["rest"]).ok_or_else(malformed)?;
            let date = NaiveDate::parse_from_str(&caps["date"], "%Y%m%d").map_err(|_| malformed())?;
            let time = NaiveTime::parse_from_str(&caps["time"], "%H%M%S").map_err(|_| malformed())?;
            return Ok(Self {
                bin_lid: caps["lid"].to_string(),
                namespace,
                timestamp: date.and_time(time).and_utc(),
                instrument: caps["inst"].parse().map_err(|_| malformed())?,
                schema: SchemaVersion::V2,
            });
        }

        if let Some(caps) = V1_PID.captures(local) {
            check_suffix(&caps["rest"]).ok_or_else(malformed)?;
            let year: i32 = caps["year"].parse().map_err(|_| malformed())?;
            let doy: u32 = caps["doy"].parse().map_err(|_| malformed())?;
            let date = NaiveDate::from_yo_opt(year, doy).ok_or_else(malformed)?;
            let time = NaiveTime::parse_from_str(&caps["time"], "%H%M%S").map_err(|_| malformed())?;
            return Ok(Self {
                bin_lid: caps["lid"].to_string(),
                namespace,
                timestamp: date.and_time(time).and_utc(),
                instrument: caps["inst"].parse().map_err(|_| malformed())?,
                schema: SchemaVersion::V1,
            });
        }

        Err(malformed())
    }
}

fn check_suffix(rest: &str) -> Option<()> {
    (rest.is_empty() || rest.starts_with('_') || rest.starts_with('.')).then_some(())
}

/// A normalized tag label: lowercase, every run of non-alphanumeric
/// characters collapsed to a single `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lowercases `name` and collapses every run of non-alphanumeric characters,
/// whitespace included, into one `_`. Nothing is trimmed, so `" Diatoms "`
/// becomes `_diatoms_` just as `"Diatoms!"` becomes `diatoms_`.
pub fn normalize_tag(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_run = false;
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            normalized.push(ch);
            in_run = false;
        } else if !in_run {
            normalized.push('_');
            in_run = true;
        }
    }
    normalized
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Tag {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_tag(value);
        if normalized.is_empty() || normalized.chars().all(|ch| ch == '_') {
            return Err(CatalogError::InvalidTag(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Tag {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}
