use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ArchiveResult, CopyResult, CountResult, ExportResult, ImportResult, ListResult, SetResult,
    TagResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(result: &ImportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_count(result: &CountResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_copy(result: &CopyResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_tag(result: &TagResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_set(result: &SetResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_archive(result: &ArchiveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}
