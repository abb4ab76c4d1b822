use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::catalog::{Bin, Catalog, ImportMode, ImportOptions, ImportReport};
use crate::config::ResolvedConfig;
use crate::error::CatalogError;
use crate::fileset::{FilesetIndex, FilesetStore};
use crate::layout::Layout;
use crate::pipeline::{CopyOptions, CopyPipeline, CopyReport, CopySummary};
use crate::query::Filter;
use crate::selection::{ArchiveReport, AttributeValue, BinSelection, SettableAttribute};
use crate::store::{BinStore, OutputDirectory};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the `tracing` subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CopyOverrides {
    pub layout: Option<Layout>,
    pub workers: Option<usize>,
    pub skip_existing: Option<bool>,
    pub skip_missing: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub source: String,
    pub mode: ImportMode,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub pids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub bins: Vec<Bin>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountResult {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    pub source: String,
    pub destination: String,
    pub layout: Layout,
    pub summary: CopySummary,
    pub report: CopyReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagResult {
    pub tag: String,
    pub added: bool,
    pub selected: usize,
    pub changed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetResult {
    pub attributes: Vec<String>,
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub path: String,
    pub exported: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResult {
    pub path: String,
    pub layout: Layout,
    pub report: ArchiveReport,
}

/// Front door used by the command line: every operation runs against the
/// configured catalog and flushes it after mutating.
#[derive(Clone)]
pub struct App {
    catalog: Catalog,
    config: ResolvedConfig,
}

impl App {
    pub fn new(catalog: Catalog, config: ResolvedConfig) -> Self {
        Self { catalog, config }
    }

    pub fn open(config: ResolvedConfig) -> Result<Self, CatalogError> {
        let catalog = Catalog::open(config.catalog_path.clone())?;
        Ok(Self::new(catalog, config))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn source_store(&self, root: impl Into<Utf8PathBuf>) -> FilesetStore {
        FilesetStore::from_index(
            FilesetIndex::new(root).with_exclude_dirs(self.config.exclude_dirs.clone()),
        )
    }

    pub fn import(
        &self,
        source: impl Into<Utf8PathBuf>,
        mode: ImportMode,
        skip_existing: Option<bool>,
        sink: &dyn ProgressSink,
    ) -> Result<ImportResult, CatalogError> {
        let source = source.into();
        let store = self.source_store(source.clone());
        let options = ImportOptions {
            mode,
            skip_existing: skip_existing.unwrap_or(self.config.skip_existing),
        };
        let ImportReport {
            pids,
            inserted,
            updated,
            skipped,
        } = self.catalog.reconcile(&store, options, sink)?;
        self.catalog.flush()?;
        Ok(ImportResult {
            source: source.to_string(),
            mode,
            inserted,
            updated,
            skipped,
            pids: pids.into_iter().collect(),
        })
    }

    pub fn select(&self, filter: &Filter) -> Result<BinSelection, CatalogError> {
        self.catalog.filter(filter)
    }

    pub fn list(&self, filter: &Filter) -> Result<ListResult, CatalogError> {
        Ok(ListResult {
            bins: self.select(filter)?.bins()?,
        })
    }

    pub fn count(&self, filter: &Filter) -> Result<CountResult, CatalogError> {
        Ok(CountResult {
            count: self.select(filter)?.count()?,
        })
    }

    pub fn copy(
        &self,
        source: impl Into<Utf8PathBuf>,
        destination: impl Into<Utf8PathBuf>,
        filter: &Filter,
        overrides: CopyOverrides,
        sink: &dyn ProgressSink,
    ) -> Result<CopyResult, CatalogError> {
        let source = source.into();
        let destination = destination.into();
        let layout = overrides.layout.unwrap_or(self.config.layout);
        let options = CopyOptions {
            skip_missing: overrides.skip_missing.unwrap_or(self.config.skip_missing),
            skip_existing: overrides.skip_existing.unwrap_or(self.config.skip_existing),
            workers: overrides.workers.unwrap_or(self.config.workers).max(1),
            atomicity: self.config.atomicity,
        };

        let store: Arc<dyn BinStore> = Arc::new(self.source_store(source.clone()));
        let selection = self.select(filter)?.with_data(store)?;
        let output =
            OutputDirectory::new(destination.clone(), layout).with_atomicity(options.atomicity);
        let report = CopyPipeline::new(options).run(&selection, &output, sink)?;
        Ok(CopyResult {
            source: source.to_string(),
            destination: destination.to_string(),
            layout,
            summary: report.summary(),
            report,
        })
    }

    pub fn tag(&self, filter: &Filter, name: &str) -> Result<TagResult, CatalogError> {
        self.change_tag(filter, name, true)
    }

    pub fn untag(&self, filter: &Filter, name: &str) -> Result<TagResult, CatalogError> {
        self.change_tag(filter, name, false)
    }

    fn change_tag(&self, filter: &Filter, name: &str, add: bool) -> Result<TagResult, CatalogError> {
        let selection = self.select(filter)?;
        let selected = selection.count()?;
        let changed = if add {
            selection.tag(name)?
        } else {
            selection.remove_tag(name)?
        };
        self.catalog.flush()?;
        Ok(TagResult {
            tag: crate::domain::normalize_tag(name),
            added: add,
            selected,
            changed,
        })
    }

    /// Applies `key=value` assignments.
    pub fn set(&self, filter: &Filter, assignments: &[String]) -> Result<SetResult, CatalogError> {
        let parsed = assignments
            .iter()
            .map(|assignment| {
                let (key, raw) = assignment
                    .split_once('=')
                    .ok_or_else(|| CatalogError::UnsettableAttribute(assignment.clone()))?;
                let attribute: SettableAttribute = key.parse()?;
                let value = attribute.parse_value(raw)?;
                Ok((attribute.as_str(), value))
            })
            .collect::<Result<Vec<(&str, AttributeValue)>, CatalogError>>()?;
        let attributes: Vec<String> = parsed.iter().map(|(key, _)| key.to_string()).collect();
        let updated = self.select(filter)?.set(parsed)?;
        self.catalog.flush()?;
        Ok(SetResult {
            attributes,
            updated,
        })
    }

    pub fn export(
        &self,
        filter: &Filter,
        path: impl Into<Utf8PathBuf>,
    ) -> Result<ExportResult, CatalogError> {
        let path = path.into();
        let exported = self.select(filter)?.export_list(&path)?;
        Ok(ExportResult {
            path: path.to_string(),
            exported,
        })
    }

    pub fn archive(
        &self,
        source: impl Into<Utf8PathBuf>,
        path: impl Into<Utf8PathBuf>,
        filter: &Filter,
        layout: Option<Layout>,
    ) -> Result<ArchiveResult, CatalogError> {
        let path = path.into();
        let layout = layout.unwrap_or(self.config.layout);
        let store: Arc<dyn BinStore> = Arc::new(self.source_store(source));
        let report = self
            .select(filter)?
            .with_data(store)?
            .archive(&path, layout, self.config.skip_missing)?;
        Ok(ArchiveResult {
            path: path.to_string(),
            layout,
            report,
        })
    }
}
