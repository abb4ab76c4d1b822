use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("malformed bin identifier: {0}")]
    MalformedIdentifier(String),

    #[error("unknown layout: {0}")]
    #[diagnostic(help("known layouts are flat, day and yearday"))]
    UnknownLayout(String),

    #[error("no raw data found for bin: {0}")]
    NotFound(String),

    #[error("incomplete fileset for bin {pid}: missing {missing}")]
    IncompleteFileset { pid: String, missing: String },

    #[error("bin already cataloged: {0}")]
    DuplicateBin(String),

    #[error("attribute cannot be set: {0}")]
    #[diagnostic(help("settable attributes are lat, lon, depth, sample_type and cruise"))]
    UnsettableAttribute(String),

    #[error("invalid value for attribute {key}: {value}")]
    InvalidAttributeValue { key: String, value: String },

    #[error("invalid tag name: {0:?}")]
    InvalidTag(String),

    #[error("invalid time value: {0}")]
    InvalidTime(String),

    #[error("selection has no data store bound")]
    #[diagnostic(help("bind a readable store with `with_data` before copying"))]
    NoDataBound,

    #[error("store does not support {0}")]
    MissingCapability(&'static str),

    #[error("failed to start copy workers: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse catalog snapshot: {0}")]
    CatalogParse(String),
}
