use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::NoopSink;
use crate::catalog::{Bin, Catalog};
use crate::domain::Tag;
use crate::error::CatalogError;
use crate::fs_util::{ZipArchiveWriter, write_bytes_atomic};
use crate::layout::Layout;
use crate::pipeline::{CopyOptions, CopyPipeline, CopyReport};
use crate::query::{Criteria, Filter};
use crate::store::{BinStore, EXTENSIONS, OutputDirectory, RawBin, ReadableStore};

/// Attributes that may be bulk-assigned on a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettableAttribute {
    Lat,
    Lon,
    Depth,
    SampleType,
    Cruise,
}

impl SettableAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettableAttribute::Lat => "lat",
            SettableAttribute::Lon => "lon",
            SettableAttribute::Depth => "depth",
            SettableAttribute::SampleType => "sample_type",
            SettableAttribute::Cruise => "cruise",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            SettableAttribute::Lat | SettableAttribute::Lon | SettableAttribute::Depth
        )
    }

    /// Interprets a textual value (e.g. from the command line) for this
    /// attribute. An empty string or `null` clears it.
    pub fn parse_value(&self, raw: &str) -> Result<AttributeValue, CatalogError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(AttributeValue::Null);
        }
        if self.is_numeric() {
            let number = trimmed
                .parse::<f64>()
                .map_err(|_| self.invalid(raw))?;
            Ok(AttributeValue::Number(number))
        } else {
            Ok(AttributeValue::Text(trimmed.to_string()))
        }
    }

    fn invalid(&self, value: impl fmt::Display) -> CatalogError {
        CatalogError::InvalidAttributeValue {
            key: self.as_str().to_string(),
            value: value.to_string(),
        }
    }

    fn validate(&self, value: &AttributeValue) -> Result<(), CatalogError> {
        let in_range = |number: f64, limit: f64| number.is_finite() && number.abs() <= limit;
        match (self, value) {
            (_, AttributeValue::Null) => Ok(()),
            (SettableAttribute::Lat, AttributeValue::Number(n)) if in_range(*n, 90.0) => Ok(()),
            (SettableAttribute::Lon, AttributeValue::Number(n)) if in_range(*n, 180.0) => Ok(()),
            (SettableAttribute::Depth, AttributeValue::Number(n)) if n.is_finite() => Ok(()),
            (SettableAttribute::SampleType | SettableAttribute::Cruise, AttributeValue::Text(_)) => {
                Ok(())
            }
            (_, value) => Err(self.invalid(value)),
        }
    }

    fn apply(&self, bin: &mut Bin, value: &AttributeValue) {
        let number = match value {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        };
        let text = match value {
            AttributeValue::Text(s) => Some(s.clone()),
            _ => None,
        };
        match self {
            SettableAttribute::Lat => bin.lat = number,
            SettableAttribute::Lon => bin.lon = number,
            SettableAttribute::Depth => bin.depth = number,
            SettableAttribute::SampleType => bin.sample_type = text,
            SettableAttribute::Cruise => bin.cruise = text,
        }
    }
}

impl FromStr for SettableAttribute {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "lat" => Ok(SettableAttribute::Lat),
            "lon" => Ok(SettableAttribute::Lon),
            "depth" => Ok(SettableAttribute::Depth),
            "sample_type" => Ok(SettableAttribute::SampleType),
            "cruise" => Ok(SettableAttribute::Cruise),
            _ => Err(CatalogError::UnsettableAttribute(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    Null,
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Text(s) => write!(f, "{s}"),
            AttributeValue::Null => write!(f, "null"),
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttributeValue::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub archived: Vec<String>,
    pub missing: Vec<String>,
}

/// A lazily evaluated view over the catalog. Criteria are applied when an
/// operation runs, so the selection reflects the catalog at that moment.
#[derive(Clone)]
pub struct BinSelection {
    catalog: Catalog,
    criteria: Criteria,
    data: Option<Arc<dyn BinStore>>,
}

impl BinSelection {
    pub(crate) fn new(catalog: Catalog, criteria: Criteria) -> Self {
        Self {
            catalog,
            criteria,
            data: None,
        }
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    /// Narrows the selection. The data binding is kept.
    pub fn filter(&self, filter: &Filter) -> Result<Self, CatalogError> {
        Ok(self.and(filter.to_criteria()?))
    }

    pub fn and(&self, criteria: Criteria) -> Self {
        Self {
            catalog: self.catalog.clone(),
            criteria: self.criteria.clone().and(criteria),
            data: self.data.clone(),
        }
    }

    pub fn with_data(mut self, store: Arc<dyn BinStore>) -> Result<Self, CatalogError> {
        if store.readable().is_none() {
            return Err(CatalogError::MissingCapability("reading"));
        }
        self.data = Some(store);
        Ok(self)
    }

    pub fn data(&self) -> Option<&dyn ReadableStore> {
        self.data.as_deref().and_then(|store| store.readable())
    }

    pub fn count(&self) -> Result<usize, CatalogError> {
        self.catalog.backend().count(&self.criteria)
    }

    pub fn pids(&self) -> Result<Vec<String>, CatalogError> {
        self.catalog.backend().query(&self.criteria)
    }

    pub fn bins(&self) -> Result<Vec<Bin>, CatalogError> {
        self.catalog.backend().records(&self.criteria)
    }

    /// Adds a tag to every selected bin. Returns how many bins changed.
    pub fn tag(&self, name: &str) -> Result<usize, CatalogError> {
        let tag: Tag = name.parse()?;
        let changed = self.for_each_bin(|bin| bin.tags.insert(tag.clone()))?;
        info!(tag = %tag, changed, "tagged bins");
        Ok(changed)
    }

    /// Removes a tag from every selected bin. Returns how many bins changed.
    pub fn remove_tag(&self, name: &str) -> Result<usize, CatalogError> {
        let tag: Tag = name.parse()?;
        let changed = self.for_each_bin(|bin| bin.tags.remove(&tag))?;
        info!(tag = %tag, changed, "untagged bins");
        Ok(changed)
    }

    /// Assigns whitelisted attributes on every selected bin. All keys and
    /// values are validated before the first bin is touched.
    pub fn set<I, K, V>(&self, attributes: I) -> Result<usize, CatalogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<AttributeValue>,
    {
        let assignments = attributes
            .into_iter()
            .map(|(key, value)| {
                let attribute: SettableAttribute = key.as_ref().parse()?;
                let value = value.into();
                attribute.validate(&value)?;
                Ok((attribute, value))
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        if assignments.is_empty() {
            return Ok(0);
        }

        self.for_each_bin(|bin| {
            for (attribute, value) in &assignments {
                attribute.apply(bin, value);
            }
            true
        })
    }

    /// Overwrites the scientific sample time of every selected bin.
    pub fn set_sample_time(&self, time: DateTime<Utc>) -> Result<usize, CatalogError> {
        self.for_each_bin(|bin| {
            let changed = bin.sample_time != time;
            bin.sample_time = time;
            changed
        })
    }

    /// Writes one pid per line, in selection order.
    pub fn export_list(&self, path: &Utf8Path) -> Result<usize, CatalogError> {
        let pids = self.pids()?;
        let mut content = String::new();
        for pid in &pids {
            content.push_str(pid);
            content.push('\n');
        }
        write_bytes_atomic(path, content.as_bytes())?;
        debug!(%path, count = pids.len(), "exported pid list");
        Ok(pids.len())
    }

    pub fn copy(
        &self,
        destination: &dyn BinStore,
        options: &CopyOptions,
    ) -> Result<CopyReport, CatalogError> {
        CopyPipeline::new(options.clone()).run(self, destination, &NoopSink)
    }

    /// Copies into a directory organized by `layout`.
    pub fn copy_to(
        &self,
        path: impl Into<Utf8PathBuf>,
        layout: Layout,
        options: &CopyOptions,
    ) -> Result<CopyReport, CatalogError> {
        let destination = OutputDirectory::new(path, layout).with_atomicity(options.atomicity);
        self.copy(&destination, options)
    }

    /// Packs every selected fileset into one zip file, entries named by
    /// `layout`. Bins without data are skipped when `skip_missing` is set,
    /// otherwise nothing is written.
    pub fn archive(
        &self,
        path: &Utf8Path,
        layout: Layout,
        skip_missing: bool,
    ) -> Result<ArchiveReport, CatalogError> {
        let source = self.data().ok_or(CatalogError::NoDataBound)?;
        let mut report = ArchiveReport::default();
        let mut resolved: Vec<RawBin> = Vec::new();
        for pid in self.pids()? {
            match source.get(&pid) {
                Ok(raw) if raw.missing_files().is_empty() => resolved.push(raw),
                Ok(_) | Err(CatalogError::NotFound(_)) if skip_missing => {
                    warn!(%pid, "no data for bin, leaving it out of the archive");
                    report.missing.push(pid);
                }
                Ok(raw) => {
                    return Err(CatalogError::IncompleteFileset {
                        pid,
                        missing: raw.missing_files().join(", "),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let mut archive = ZipArchiveWriter::create(path)?;
        for raw in &resolved {
            let base = layout.basepath(raw.pid());
            for ext in EXTENSIONS {
                archive.add_file(&raw.path(ext), &format!("{base}.{ext}"))?;
            }
            report.archived.push(raw.pid().to_string());
        }
        archive.finish()?;
        info!(%path, archived = report.archived.len(), "wrote archive");
        Ok(report)
    }

    fn for_each_bin(&self, mut apply: impl FnMut(&mut Bin) -> bool) -> Result<usize, CatalogError> {
        let backend = self.catalog.backend();
        let mut changed = 0;
        for pid in self.pids()? {
            backend.update(&pid, &mut |bin| {
                if apply(bin) {
                    changed += 1;
                }
            })?;
        }
        Ok(changed)
    }
}

impl fmt::Debug for BinSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinSelection")
            .field("criteria", &self.criteria)
            .field("bound", &self.data.is_some())
            .finish()
    }
}
