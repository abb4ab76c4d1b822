use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::Pid;
use crate::error::CatalogError;

/// Naming scheme that maps a pid to a store-relative base path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `<pid>`
    #[default]
    Flat,
    /// `<yearday>/<pid>`
    Day,
    /// `<year>/<yearday>/<pid>`
    Yearday,
}

impl Layout {
    pub fn basepath(&self, pid: &Pid) -> Utf8PathBuf {
        match self {
            Layout::Flat => Utf8PathBuf::from(pid.bin_lid()),
            Layout::Day => Utf8PathBuf::from(pid.yearday()).join(pid.bin_lid()),
            Layout::Yearday => Utf8PathBuf::from(format!("{:04}", pid.year()))
                .join(pid.yearday())
                .join(pid.bin_lid()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Flat => "flat",
            Layout::Day => "day",
            Layout::Yearday => "yearday",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Layout {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "flat" => Ok(Layout::Flat),
            "day" => Ok(Layout::Day),
            "yearday" => Ok(Layout::Yearday),
            _ => Err(CatalogError::UnknownLayout(value.to_string())),
        }
    }
}

/// Relative destination path for `pid` under the named layout.
pub fn compute_basepath(pid: &str, layout: &str) -> Result<Utf8PathBuf, CatalogError> {
    let layout: Layout = layout.parse()?;
    let pid: Pid = pid.parse()?;
    Ok(layout.basepath(&pid))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn layout_paths() {
        let pid = "D20220412T000000_IFCB001";
        assert_eq!(compute_basepath(pid, "flat").unwrap(), "D20220412T000000_IFCB001");
        assert_eq!(
            compute_basepath(pid, "day").unwrap(),
            "2022102/D20220412T000000_IFCB001"
        );
        assert_eq!(
            compute_basepath(pid, "yearday").unwrap(),
            "2022/2022102/D20220412T000000_IFCB001"
        );
    }

    #[test]
    fn unknown_layout() {
        let err = compute_basepath("D20220412T000000_IFCB001", "monthly").unwrap_err();
        assert_matches!(err, CatalogError::UnknownLayout(name) if name == "monthly");
    }

    #[test]
    fn layout_checked_before_pid() {
        let err = compute_basepath("garbage", "nope").unwrap_err();
        assert_matches!(err, CatalogError::UnknownLayout(_));
    }
}
