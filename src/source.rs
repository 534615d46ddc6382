// src/source.rs

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use log::warn;
use serde_json::Value;

use crate::error::Result;
use crate::models::RecordId;

/// One record pulled from the source: an opaque identifier and the raw
/// collector field.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: RecordId,
    pub collector_text: String,
}

/// Pull-model record source. The driver asks for the next record; nothing
/// is materialized up front. Producers are expected to have filtered by
/// their own domain predicate (e.g. `kingdom = Plantae`).
pub trait RecordSource {
    fn next_record(&mut self) -> Result<Option<SourceRecord>>;
}

/// Line-delimited JSON source. Each line is an object carrying an `id`
/// (or `_id`) and the collector field under `recordedBy` or `collector`.
/// Lines without a collector field are skipped with a warning.
pub struct JsonlSource {
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl JsonlSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(JsonlSource {
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

impl RecordSource for JsonlSource {
    fn next_record(&mut self) -> Result<Option<SourceRecord>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line?;
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => {
                    warn!("line {}: unparseable record: {e}", self.line_number);
                    continue;
                }
            };
            let collector = value
                .get("recordedBy")
                .or_else(|| value.get("collector"))
                .and_then(Value::as_str);
            let Some(collector) = collector else {
                warn!("line {}: record has no collector field", self.line_number);
                continue;
            };
            let id = value
                .get("id")
                .or_else(|| value.get("_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("line-{}", self.line_number));
            return Ok(Some(SourceRecord {
                id: RecordId(id),
                collector_text: collector.to_string(),
            }));
        }
    }
}

/// In-memory source for tests and small batches.
pub struct VecSource {
    records: std::vec::IntoIter<SourceRecord>,
}

impl VecSource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        VecSource {
            records: records.into_iter(),
        }
    }

    /// Convenience: build records from bare collector strings.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| SourceRecord {
                id: RecordId(format!("rec-{index}")),
                collector_text: text.into(),
            })
            .collect();
        VecSource::new(records)
    }
}

impl RecordSource for VecSource {
    fn next_record(&mut self) -> Result<Option<SourceRecord>> {
        Ok(self.records.next())
    }
}
