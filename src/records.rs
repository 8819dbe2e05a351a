use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transform::{Aggregate, AggregateSpec};

const CSV_EXTENSION: &str = "csv";

/// One input row, keyed by column name. Column order is kept so extra fields
/// pass through untouched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Record(IndexMap<String, String>);

impl Record {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    fn has_value(&self, field: &str) -> bool {
        self.get(field).is_some_and(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields = iter.into_iter().map(|(k, v)| (k.into(), v.into()));
        Self(fields.collect())
    }
}

/// Reads one CSV file with a header row. Rows missing any of `required` (or
/// holding an empty value there) are skipped, as are rows the reader cannot
/// decode.
pub fn read_csv<P: AsRef<Path>>(path: P, required: &[&str]) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // The CSV reader is buffered automatically, so it does not need to
    // wrap the file in a buffered reader like io::BufReader
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Fields)
        .from_reader(file);
    let headers = rdr.headers()?.clone();

    let mut records = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row_number = i + 1;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!("Skipping bad row {} in {}: {}", row_number, name, err);
                continue;
            }
        };

        let record: Record = headers.iter().zip(row.iter()).collect();
        if let Some(field) = required.iter().find(|f| !record.has_value(f)) {
            warn!(
                "Skipping bad row {} in {}: missing {}",
                row_number, name, field
            );
            continue;
        }
        records.push(record);
    }

    debug!("Read {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Reads every `*.csv` file directly inside `folder`, in file-name order.
pub fn read_csv_folder<P: AsRef<Path>>(folder: P, required: &[&str]) -> Result<Vec<Record>> {
    let folder = folder.as_ref();
    let mut files: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == CSV_EXTENSION))
        .collect();
    files.sort();

    if files.is_empty() {
        info!("No CSV files found in {}", folder.display());
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for file in files {
        records.extend(read_csv(&file, required)?);
    }
    Ok(records)
}

/// One output line. The header is written separately because its column
/// names depend on the aggregate spec.
#[derive(Debug, Serialize)]
struct AggregateRow<'a> {
    key: Option<&'a str>,
    #[serde(serialize_with = "serialize_f64_4dp")]
    total: f64,
}

/// Writes aggregates as `<group_field>,total_<value_field>` CSV. An absent
/// group key becomes an empty cell.
pub fn write_aggregates<W: Write>(
    writer: W,
    spec: &AggregateSpec,
    aggregates: &[Aggregate],
) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record([spec.group_field.as_str(), spec.total_column().as_str()])?;
    for aggregate in aggregates {
        wtr.serialize(AggregateRow {
            key: aggregate.key.as_deref(),
            total: aggregate.total,
        })?;
    }

    wtr.flush()?;

    Ok(())
}

fn serialize_f64_4dp<S>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let rounded = (value * 10_000.0).round() / 10_000.0;
    serializer.serialize_str(&format!("{:.4}", rounded))
}
