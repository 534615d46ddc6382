// src/export.rs
//
// Final tabular export: canonicalName, variations, occurrenceCounts. The
// two list columns are semicolon-joined and element-wise aligned. Fields
// are written unquoted, so the re-parser understands the dialect instead of
// generic CSV: a comma inside a stored name is always followed by a space,
// a field-separating comma never is.

use std::fs;
use std::path::Path;

use csv::{QuoteStyle, WriterBuilder};
use log::info;

use crate::error::{PipelineError, Result};
use crate::models::CanonicalEntity;

const HEADER: [&str; 3] = ["canonicalName", "variations", "occurrenceCounts"];

/// Write all entities to `path`. UTF-8, no BOM, no field quoting, no
/// confidence columns. Returns the number of rows written.
pub fn export_csv(entities: &[CanonicalEntity], path: &Path) -> Result<usize> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Never)
        .from_path(path)?;
    writer.write_record(HEADER)?;
    for entity in entities {
        let variations: Vec<&str> = entity
            .variations
            .iter()
            .map(|v| v.variation_text.as_str())
            .collect();
        let counts: Vec<String> = entity
            .variations
            .iter()
            .map(|v| v.occurrence_count.to_string())
            .collect();
        writer.write_record([
            entity.canonical_name.as_str(),
            variations.join(";").as_str(),
            counts.join(";").as_str(),
        ])?;
    }
    writer.flush()?;
    info!("exported {} canonical entities to {}", entities.len(), path.display());
    Ok(entities.len())
}

/// One parsed export row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub canonical_name: String,
    pub variations: Vec<String>,
    pub occurrence_counts: Vec<u64>,
}

/// Read an exported file back into rows.
pub fn read_export(path: &Path) -> Result<Vec<ExportRow>> {
    let raw = fs::read_to_string(path)?;
    let mut lines = raw.lines();
    match lines.next() {
        Some(header) if split_fields(header).len() == 3 => {}
        other => {
            return Err(PipelineError::RecordFailed {
                id: path.display().to_string(),
                reason: format!("missing export header, got {other:?}"),
            })
        }
    }

    let mut rows = Vec::new();
    for (number, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields = split_fields(line);
        if fields.len() != 3 {
            return Err(PipelineError::RecordFailed {
                id: format!("{}:{}", path.display(), number + 2),
                reason: format!("expected 3 fields, found {}", fields.len()),
            });
        }
        let occurrence_counts = fields[2]
            .split(';')
            .map(|c| {
                c.parse::<u64>().map_err(|e| PipelineError::RecordFailed {
                    id: format!("{}:{}", path.display(), number + 2),
                    reason: format!("bad occurrence count {c:?}: {e}"),
                })
            })
            .collect::<Result<Vec<u64>>>()?;
        rows.push(ExportRow {
            canonical_name: fields[0].clone(),
            variations: fields[1].split(';').map(str::to_string).collect(),
            occurrence_counts,
        });
    }
    Ok(rows)
}

/// Split on field-separating commas only: a separator comma is never
/// followed by whitespace, a comma inside a name always is.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ',' && chars.peek().map_or(false, |next| !next.is_whitespace()) {
            fields.push(String::new());
        } else {
            fields.last_mut().expect("nonempty").push(c);
        }
    }
    fields
}
