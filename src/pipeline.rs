use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::CatalogError;
use crate::selection::BinSelection;
use crate::store::{Atomicity, BinStore, RawBin, WritableStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    pub skip_missing: bool,
    pub skip_existing: bool,
    pub workers: usize,
    #[serde(default)]
    pub atomicity: Atomicity,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            skip_missing: true,
            skip_existing: true,
            workers: 4,
            atomicity: Atomicity::File,
        }
    }
}

/// Shared flag checked before each bin starts copying.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BinOutcome {
    Copied { files: usize, bytes: u64 },
    SkippedExisting,
    Missing,
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub copied: usize,
    pub skipped_existing: usize,
    pub missing: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Per-pid outcomes of one copy run. Keyed by pid, so the report does not
/// depend on the order in which workers finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub outcomes: BTreeMap<String, BinOutcome>,
    /// Set when at least one bin never started because of cancellation.
    pub cancelled: bool,
}

impl CopyReport {
    fn record(&mut self, pid: String, outcome: BinOutcome) {
        self.outcomes.insert(pid, outcome);
    }

    pub fn outcome(&self, pid: &str) -> Option<&BinOutcome> {
        self.outcomes.get(pid)
    }

    pub fn summary(&self) -> CopySummary {
        let mut summary = CopySummary::default();
        for outcome in self.outcomes.values() {
            match outcome {
                BinOutcome::Copied { .. } => summary.copied += 1,
                BinOutcome::SkippedExisting => summary.skipped_existing += 1,
                BinOutcome::Missing => summary.missing += 1,
                BinOutcome::Failed { .. } => summary.failed += 1,
                BinOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .values()
            .any(|outcome| matches!(outcome, BinOutcome::Failed { .. }))
    }
}

pub struct CopyPipeline {
    options: CopyOptions,
    cancel: CancelToken,
}

impl CopyPipeline {
    pub fn new(options: CopyOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Copies every bin of `selection` from its bound store into
    /// `destination`.
    ///
    /// All handles are resolved before anything is written, so a missing
    /// bin with `skip_missing` off aborts the run with no writes at all.
    /// Write failures are recorded per bin and never abort the run.
    pub fn run(
        &self,
        selection: &BinSelection,
        destination: &dyn BinStore,
        sink: &dyn ProgressSink,
    ) -> Result<CopyReport, CatalogError> {
        let source = selection.data().ok_or(CatalogError::NoDataBound)?;
        let writer = destination
            .writable()
            .ok_or(CatalogError::MissingCapability("writing"))?;
        let started = Instant::now();
        let mut report = CopyReport::default();

        let mut resolved: Vec<RawBin> = Vec::new();
        for pid in selection.pids()? {
            match source.get(&pid) {
                Ok(raw) => resolved.push(raw),
                Err(CatalogError::NotFound(_)) if self.options.skip_missing => {
                    warn!(%pid, "no raw data for bin, skipping");
                    report.record(pid, BinOutcome::Missing);
                }
                Err(err @ CatalogError::NotFound(_)) => return Err(err),
                Err(err) => {
                    warn!(%pid, %err, "could not resolve bin");
                    report.record(pid, BinOutcome::Failed { error: err.to_string() });
                }
            }
        }
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} bins to copy", resolved.len()),
            elapsed: Some(started.elapsed()),
        });

        let pool = worker_pool(self.options.workers)?;
        let outcomes: Vec<(String, BinOutcome)> = pool.install(|| {
            resolved
                .par_iter()
                .map(|raw| (raw.pid().to_string(), self.copy_one(raw, writer, sink, started)))
                .collect()
        });
        for (pid, outcome) in outcomes {
            report.record(pid, outcome);
        }
        report.cancelled = report.summary().cancelled > 0;

        let summary = report.summary();
        info!(
            copied = summary.copied,
            skipped = summary.skipped_existing,
            missing = summary.missing,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "copy finished"
        );
        Ok(report)
    }

    fn copy_one(
        &self,
        raw: &RawBin,
        writer: &dyn WritableStore,
        sink: &dyn ProgressSink,
        started: Instant,
    ) -> BinOutcome {
        if self.cancel.is_cancelled() {
            return BinOutcome::Cancelled;
        }
        let outcome = match writer.write(raw, self.options.skip_existing) {
            Ok(written) if written.is_skipped() => BinOutcome::SkippedExisting,
            Ok(written) => BinOutcome::Copied {
                files: written.written.len(),
                bytes: written.bytes,
            },
            Err(err) => {
                warn!(pid = %raw.pid(), %err, "copy failed");
                BinOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        debug!(pid = %raw.pid(), ?outcome, "bin done");
        sink.event(ProgressEvent {
            message: format!("phase=Copy; {}", raw.pid()),
            elapsed: Some(started.elapsed()),
        });
        outcome
    }
}

fn worker_pool(workers: usize) -> Result<rayon::ThreadPool, CatalogError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("ifcb-copy-{index}"))
        .build()
        .map_err(|err| CatalogError::WorkerPool(err.to_string()))
}
