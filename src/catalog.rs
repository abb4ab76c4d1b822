use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::Tag;
use crate::error::CatalogError;
use crate::fs_util::write_bytes_atomic;
use crate::query::{Criteria, Filter, Predicate};
use crate::selection::BinSelection;
use crate::store::{BinStore, RawBin};

const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// One cataloged bin. The pid is fixed at insertion and only readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pid: String,
    pub timestamp: DateTime<Utc>,
    pub sample_time: DateTime<Utc>,
    pub instrument: u32,
    pub import_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub depth: Option<f64>,
    #[serde(default)]
    pub sample_type: Option<String>,
    #[serde(default)]
    pub cruise: Option<String>,
    #[serde(default)]
    pub cast: Option<String>,
    #[serde(default)]
    pub niskin: Option<i32>,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
}

impl Bin {
    pub fn pid(&self) -> &str {
        &self.pid
    }

    fn from_derived(fields: &DerivedFields, now: DateTime<Utc>) -> Self {
        Self {
            pid: fields.pid.clone(),
            timestamp: fields.timestamp,
            sample_time: fields.timestamp,
            instrument: fields.instrument,
            import_timestamp: now,
            lat: None,
            lon: None,
            depth: None,
            sample_type: None,
            cruise: None,
            cast: None,
            niskin: None,
            tags: BTreeSet::new(),
        }
    }

    fn apply_derived(&mut self, fields: &DerivedFields) {
        self.timestamp = fields.timestamp;
        self.sample_time = fields.timestamp;
        self.instrument = fields.instrument;
    }
}

/// Metadata an import derives from a raw bin. `sample_time` is reset to
/// `timestamp` whenever these fields are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedFields {
    pub pid: String,
    pub timestamp: DateTime<Utc>,
    pub instrument: u32,
}

impl DerivedFields {
    pub fn from_raw(bin: &RawBin) -> Self {
        Self {
            pid: bin.pid().to_string(),
            timestamp: bin.timestamp(),
            instrument: bin.instrument(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Record store behind a [`Catalog`]. Mutations of one pid are serialized;
/// different pids never contend on a shared lock while being mutated.
pub trait CatalogBackend: Send + Sync {
    fn get(&self, pid: &str) -> Result<Option<Bin>, CatalogError>;
    fn upsert_derived(&self, fields: &DerivedFields) -> Result<UpsertOutcome, CatalogError>;
    fn insert_if_absent(&self, fields: &DerivedFields) -> Result<bool, CatalogError>;
    /// Runs `apply` on the record under its lock. `Ok(false)` if absent.
    fn update(&self, pid: &str, apply: &mut dyn FnMut(&mut Bin)) -> Result<bool, CatalogError>;
    /// Matching records ordered by `(sample_time, pid)`.
    fn records(&self, criteria: &Criteria) -> Result<Vec<Bin>, CatalogError>;
    fn query(&self, criteria: &Criteria) -> Result<Vec<String>, CatalogError>;
    fn count(&self, criteria: &Criteria) -> Result<usize, CatalogError>;

    fn flush(&self) -> Result<(), CatalogError> {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    schema_version: u32,
    bins: Vec<Bin>,
}

/// In-memory backend, optionally persisted as a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    bins: RwLock<HashMap<String, Arc<Mutex<Bin>>>>,
    path: Option<Utf8PathBuf>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path` if it exists; `flush` writes back to it.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let mut bins = HashMap::new();
        if path.as_std_path().exists() {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| CatalogError::Filesystem(format!("read {path}: {err}")))?;
            let snapshot: CatalogSnapshot = serde_json::from_str(&content)
                .map_err(|err| CatalogError::CatalogParse(err.to_string()))?;
            for bin in snapshot.bins {
                bins.insert(bin.pid.clone(), Arc::new(Mutex::new(bin)));
            }
            debug!(%path, bins = bins.len(), "loaded catalog snapshot");
        }
        Ok(Self {
            bins: RwLock::new(bins),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.read().is_empty()
    }

    fn entry(&self, pid: &str) -> Option<Arc<Mutex<Bin>>> {
        self.bins.read().get(pid).cloned()
    }
}

impl CatalogBackend for MemoryCatalog {
    fn get(&self, pid: &str) -> Result<Option<Bin>, CatalogError> {
        Ok(self.entry(pid).map(|entry| entry.lock().clone()))
    }

    fn upsert_derived(&self, fields: &DerivedFields) -> Result<UpsertOutcome, CatalogError> {
        if let Some(entry) = self.entry(&fields.pid) {
            entry.lock().apply_derived(fields);
            return Ok(UpsertOutcome::Updated);
        }
        // Another writer may have inserted the pid since the read above.
        let raced = match self.bins.write().entry(fields.pid.clone()) {
            Entry::Occupied(occupied) => Some(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(Bin::from_derived(fields, Utc::now()))));
                None
            }
        };
        match raced {
            Some(entry) => {
                entry.lock().apply_derived(fields);
                Ok(UpsertOutcome::Updated)
            }
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    fn insert_if_absent(&self, fields: &DerivedFields) -> Result<bool, CatalogError> {
        let mut bins = self.bins.write();
        match bins.entry(fields.pid.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(Bin::from_derived(fields, Utc::now()))));
                Ok(true)
            }
        }
    }

    fn update(&self, pid: &str, apply: &mut dyn FnMut(&mut Bin)) -> Result<bool, CatalogError> {
        match self.entry(pid) {
            Some(entry) => {
                apply(&mut entry.lock());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn records(&self, criteria: &Criteria) -> Result<Vec<Bin>, CatalogError> {
        let mut matched: Vec<Bin> = self
            .bins
            .read()
            .values()
            .filter_map(|entry| {
                let bin = entry.lock();
                criteria.matches(&bin).then(|| bin.clone())
            })
            .collect();
        matched.sort_by(|a, b| (a.sample_time, &a.pid).cmp(&(b.sample_time, &b.pid)));
        Ok(matched)
    }

    fn query(&self, criteria: &Criteria) -> Result<Vec<String>, CatalogError> {
        let mut matched: Vec<(DateTime<Utc>, String)> = self
            .bins
            .read()
            .values()
            .filter_map(|entry| {
                let bin = entry.lock();
                criteria
                    .matches(&bin)
                    .then(|| (bin.sample_time, bin.pid.clone()))
            })
            .collect();
        matched.sort();
        Ok(matched.into_iter().map(|(_, pid)| pid).collect())
    }

    fn count(&self, criteria: &Criteria) -> Result<usize, CatalogError> {
        Ok(self
            .bins
            .read()
            .values()
            .filter(|entry| criteria.matches(&entry.lock()))
            .count())
    }

    fn flush(&self) -> Result<(), CatalogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut bins: Vec<Bin> = self
            .bins
            .read()
            .values()
            .map(|entry| entry.lock().clone())
            .collect();
        bins.sort_by(|a, b| a.pid.cmp(&b.pid));
        let snapshot = CatalogSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            bins,
        };
        let content = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)?;
        debug!(%path, bins = snapshot.bins.len(), "flushed catalog snapshot");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Insert new bins and refresh the derived fields of known ones.
    #[default]
    Update,
    /// Insert new bins only.
    CreateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// In create-only mode, skip known pids instead of failing.
    pub skip_existing: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            mode: ImportMode::Update,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub pids: BTreeSet<String>,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Explicit handle to the bin catalog.
#[derive(Clone)]
pub struct Catalog {
    backend: Arc<dyn CatalogBackend>,
}

impl Catalog {
    pub fn new(backend: impl CatalogBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryCatalog::new())
    }

    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, CatalogError> {
        Ok(Self::new(MemoryCatalog::open(path)?))
    }

    pub fn backend(&self) -> &dyn CatalogBackend {
        self.backend.as_ref()
    }

    pub fn get(&self, pid: &str) -> Result<Option<Bin>, CatalogError> {
        self.backend.get(pid)
    }

    pub fn flush(&self) -> Result<(), CatalogError> {
        self.backend.flush()
    }

    pub fn reconcile(
        &self,
        source: &dyn BinStore,
        options: ImportOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ImportReport, CatalogError> {
        let iterable = source
            .iterable()
            .ok_or(CatalogError::MissingCapability("iteration"))?;
        let started = std::time::Instant::now();
        let mut report = ImportReport::default();

        for raw in iterable.stream()? {
            let fields = DerivedFields::from_raw(&raw);
            match options.mode {
                ImportMode::Update => {
                    match self.backend.upsert_derived(&fields)? {
                        UpsertOutcome::Inserted => report.inserted += 1,
                        UpsertOutcome::Updated => report.updated += 1,
                    }
                    report.pids.insert(fields.pid);
                }
                ImportMode::CreateOnly => {
                    if self.backend.insert_if_absent(&fields)? {
                        report.inserted += 1;
                        report.pids.insert(fields.pid);
                    } else if options.skip_existing {
                        debug!(pid = %fields.pid, "already cataloged, skipping");
                        report.skipped += 1;
                    } else {
                        return Err(CatalogError::DuplicateBin(fields.pid));
                    }
                }
            }
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "import finished"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Import; {} inserted, {} updated, {} skipped",
                report.inserted, report.updated, report.skipped
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    pub fn select_all(&self) -> BinSelection {
        BinSelection::new(self.clone(), Criteria::all())
    }

    pub fn filter(&self, filter: &Filter) -> Result<BinSelection, CatalogError> {
        Ok(BinSelection::new(self.clone(), filter.to_criteria()?))
    }

    pub fn select_pids<I, S>(&self, pids: I) -> BinSelection
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pids: BTreeSet<String> = pids.into_iter().map(Into::into).collect();
        BinSelection::new(
            self.clone(),
            Criteria::all().with(Predicate::Pids(Arc::new(pids))),
        )
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}
