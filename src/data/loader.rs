use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use log::{error, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::model::{
    SequenceConfig, SignalDatabase, SignalRecord, COL_B1, COL_ECHO, COL_INDEX, COL_MAG, COL_PHASE,
    COL_T1, COL_T2, REQUIRED_COLUMNS,
};
use crate::error::{DbError, Result};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Read a record table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one row per echo sample (the layout the store writes)
/// * `.json`    – `[{ "t1": .., "t2": .., "b1": .., "echo": .., "emc_mag": .., "emc_phase": .. }, ...]`
/// * `.csv`     – header row with the same column names
///
/// `index` is optional in every format; the row ordinal is used when it is absent.
pub fn load_table(path: impl AsRef<Path>) -> Result<Vec<SignalRecord>> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => read_parquet(path).map(|(records, _)| records),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => Err(DbError::UnsupportedFormat(other.to_string())),
    }
}

/// Build a database from a record table; the name is the file stem.
pub fn import_table(path: impl AsRef<Path>, config: SequenceConfig) -> Result<SignalDatabase> {
    let path = path.as_ref();
    let records = load_table(path)?;
    info!("imported {} records from {}", records.len(), path.display());
    SignalDatabase::from_records(records, config, path)
}

/// Write the record table as CSV for external tools.
pub fn export_csv(db: &SignalDatabase, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in db.records() {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("wrote {} records to {}", db.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Schema checks
// ---------------------------------------------------------------------------

/// Positions of the record columns in a table header.
struct ColumnIndex {
    index: Option<usize>,
    t1: usize,
    t2: usize,
    b1: usize,
    echo: usize,
    mag: usize,
    phase: usize,
}

fn locate_columns(found: &[String]) -> Result<ColumnIndex> {
    let pos = |name: &str| found.iter().position(|f| f == name);
    match (
        pos(COL_T1),
        pos(COL_T2),
        pos(COL_B1),
        pos(COL_ECHO),
        pos(COL_MAG),
        pos(COL_PHASE),
    ) {
        (Some(t1), Some(t2), Some(b1), Some(echo), Some(mag), Some(phase)) => Ok(ColumnIndex {
            index: pos(COL_INDEX),
            t1,
            t2,
            b1,
            echo,
            mag,
            phase,
        }),
        _ => Err(schema_error(found)),
    }
}

fn schema_error<S: AsRef<str>>(found: &[S]) -> DbError {
    let err = DbError::schema(&REQUIRED_COLUMNS, found);
    error!("{err}");
    err
}

/// Row shape shared by the JSON and CSV readers.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    index: Option<usize>,
    t1: f64,
    t2: f64,
    b1: f64,
    echo: usize,
    emc_mag: f64,
    emc_phase: f64,
}

impl RawRecord {
    fn into_record(self, ordinal: usize) -> SignalRecord {
        SignalRecord {
            index: self.index.unwrap_or(ordinal),
            t1: self.t1,
            t2: self.t2,
            b1: self.b1,
            echo: self.echo,
            magnitude: self.emc_mag,
            phase: self.emc_phase,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON, as written by `df.to_json(orient='records')`.
fn load_json(path: &Path) -> Result<Vec<SignalRecord>> {
    let text = std::fs::read_to_string(path)?;
    let root: JsonValue = serde_json::from_str(&text)?;
    let rows = root
        .as_array()
        .ok_or_else(|| DbError::Invalid("expected a top-level JSON array of records".into()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let obj = row
                .as_object()
                .ok_or_else(|| DbError::Invalid(format!("row {i} is not a JSON object")))?;
            if REQUIRED_COLUMNS.iter().any(|c| !obj.contains_key(*c)) {
                let found: Vec<&str> = obj.keys().map(String::as_str).collect();
                return Err(schema_error(&found));
            }
            let raw: RawRecord = serde_json::from_value(row.clone())?;
            Ok(raw.into_record(i))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

fn load_csv(path: &Path) -> Result<Vec<SignalRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    locate_columns(&headers)?;

    reader
        .deserialize::<RawRecord>()
        .enumerate()
        .map(|(i, row)| Ok(row?.into_record(i)))
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Read a Parquet record table together with its Arrow schema metadata.
///
/// Numeric columns may be any integer or float type; they are cast to
/// `f64` (parameters, samples) or checked non-negative integers (`index`, `echo`).
pub(crate) fn read_parquet(path: &Path) -> Result<(Vec<SignalRecord>, HashMap<String, String>)> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let found: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let columns = locate_columns(&found)?;
    let reader = builder.build()?;

    let mut records = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;

        let t1 = f64_column(batch.column(columns.t1), COL_T1)?;
        let t2 = f64_column(batch.column(columns.t2), COL_T2)?;
        let b1 = f64_column(batch.column(columns.b1), COL_B1)?;
        let echo = usize_column(batch.column(columns.echo), COL_ECHO)?;
        let mag = f64_column(batch.column(columns.mag), COL_MAG)?;
        let phase = f64_column(batch.column(columns.phase), COL_PHASE)?;
        let index = columns
            .index
            .map(|i| usize_column(batch.column(i), COL_INDEX))
            .transpose()?;

        for row in 0..batch.num_rows() {
            let ordinal = records.len();
            records.push(SignalRecord {
                index: index.as_ref().map_or(ordinal, |ix| ix[row]),
                t1: t1[row],
                t2: t2[row],
                b1: b1[row],
                echo: echo[row],
                magnitude: mag[row],
                phase: phase[row],
            });
        }
    }

    Ok((records, schema.metadata().clone()))
}

// -- Arrow helpers --

fn f64_column(col: &ArrayRef, name: &str) -> Result<Vec<f64>> {
    let casted = cast(col.as_ref(), &DataType::Float64)?;
    if casted.null_count() > 0 {
        return Err(DbError::Invalid(format!("column '{name}' contains null values")));
    }
    Ok(casted.as_primitive::<Float64Type>().values().to_vec())
}

fn usize_column(col: &ArrayRef, name: &str) -> Result<Vec<usize>> {
    let casted = cast(col.as_ref(), &DataType::Int64)?;
    if casted.null_count() > 0 {
        return Err(DbError::Invalid(format!("column '{name}' contains null values")));
    }
    casted
        .as_primitive::<Int64Type>()
        .values()
        .iter()
        .map(|&v| {
            usize::try_from(v)
                .map_err(|_| DbError::Invalid(format!("column '{name}' has negative value {v}")))
        })
        .collect()
}
