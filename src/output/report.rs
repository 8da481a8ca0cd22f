// Tue Jan 13 2026 - Alex

use crate::finders::{CombinedResults, StructureOffsetResult};
use indexmap::IndexMap;
use std::fmt;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Text,
    Markdown,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Json => write!(f, "JSON"),
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Markdown => write!(f, "markdown"),
        }
    }
}

pub struct ReportGenerator<'a> {
    results: &'a CombinedResults,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(results: &'a CombinedResults) -> Self {
        Self { results }
    }

    pub fn write<W: Write>(&self, format: ReportFormat, out: &mut W) -> io::Result<()> {
        match format {
            ReportFormat::Json => self.write_json(out),
            ReportFormat::Text => self.write_text(out),
            ReportFormat::Markdown => self.write_markdown(out),
        }
    }

    pub fn render(&self, format: ReportFormat) -> io::Result<String> {
        let mut buf = Vec::new();
        self.write(format, &mut buf)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_json<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut document: IndexMap<&str, serde_json::Value> = IndexMap::new();
        document.insert("generator", serde_json::json!(env!("CARGO_PKG_NAME")));
        document.insert("version", serde_json::json!(env!("CARGO_PKG_VERSION")));
        document.insert("binary", serde_json::json!(self.results.binary));
        document.insert(
            "structures",
            serde_json::to_value(self.results.to_json_map()).map_err(io::Error::from)?,
        );

        serde_json::to_writer_pretty(&mut *out, &document).map_err(io::Error::from)?;
        writeln!(out)
    }

    fn write_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Store Manager Offset Report")?;
        writeln!(out, "===========================")?;
        if let Some(binary) = &self.results.binary {
            writeln!(out, "Binary: {}", binary)?;
        }
        writeln!(out)?;

        writeln!(
            out,
            "Structure Offsets ({} of {} found):",
            self.results.found_count(),
            self.results.total_count()
        )?;
        writeln!(out, "-----------------------")?;
        for result in &self.results.structure_offsets {
            writeln!(out, "  {}: {} ({})", result.qualified_name(), offset_text(result), result.method)?;
        }
        writeln!(out)?;

        let missing: Vec<_> = self.results.missing().filter(|r| r.error.is_some()).collect();
        if !missing.is_empty() {
            writeln!(out, "Failures ({}):", missing.len())?;
            writeln!(out, "-------------")?;
            for result in missing {
                writeln!(out, "  {}: {}", result.qualified_name(), result.error.as_deref().unwrap_or("-"))?;
            }
            writeln!(out)?;
        }

        Ok(())
    }

    fn write_markdown<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "# Store Manager Offset Report")?;
        writeln!(out)?;
        writeln!(out, "## Summary")?;
        writeln!(out)?;
        writeln!(out, "| Category | Count |")?;
        writeln!(out, "|----------|-------|")?;
        writeln!(out, "| Probed fields | {} |", self.results.total_count())?;
        writeln!(out, "| Found | {} |", self.results.found_count())?;
        writeln!(out, "| Assumed | {} |", self.results.assumed_count())?;
        writeln!(out)?;

        writeln!(out, "## Structure Offsets")?;
        writeln!(out)?;
        writeln!(out, "| Structure | Field | Offset | Method | Source |")?;
        writeln!(out, "|-----------|-------|--------|--------|--------|")?;
        for result in &self.results.structure_offsets {
            let offset = match result.offset {
                Some(o) => format!("`0x{:x}`", o),
                None => "-".to_string(),
            };
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                result.structure_name,
                result.field_name,
                offset,
                result.method,
                result.source.as_deref().map(|s| format!("`{}`", s)).unwrap_or_else(|| "-".to_string())
            )?;
        }
        writeln!(out)?;

        Ok(())
    }
}

fn offset_text(result: &StructureOffsetResult) -> String {
    match result.offset {
        Some(offset) => format!("0x{:x}", offset),
        None => "not found".to_string(),
    }
}
