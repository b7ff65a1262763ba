use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::debug;
use ndarray::{Array2, ArrayView1, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DbError, Result};

/// Curves whose L2 norm is at or below this value are treated as all-zero.
pub const NORM_EPSILON: f64 = 1e-12;

/// Name used when no usable file stem is available.
pub const DEFAULT_NAME: &str = "db_";

// -- Tabular column names --

pub const COL_INDEX: &str = "index";
pub const COL_T1: &str = "t1";
pub const COL_T2: &str = "t2";
pub const COL_B1: &str = "b1";
pub const COL_ECHO: &str = "echo";
pub const COL_MAG: &str = "emc_mag";
pub const COL_PHASE: &str = "emc_phase";

/// Columns every record table must carry. `index` is optional.
pub const REQUIRED_COLUMNS: [&str; 6] = [COL_T1, COL_T2, COL_B1, COL_ECHO, COL_MAG, COL_PHASE];

// ---------------------------------------------------------------------------
// SignalRecord – one row of the record table
// ---------------------------------------------------------------------------

/// A single echo sample of one simulated curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Row ordinal. Not stable across rebuilds.
    pub index: usize,
    /// T1 relaxation [s].
    pub t1: f64,
    /// T2 relaxation [s].
    pub t2: f64,
    /// B1 transmit field scaling.
    pub b1: f64,
    /// Position in the echo train, starting at 0.
    pub echo: usize,
    #[serde(rename = "emc_mag")]
    pub magnitude: f64,
    /// Phase [rad].
    #[serde(rename = "emc_phase")]
    pub phase: f64,
}

// ---------------------------------------------------------------------------
// SequenceConfig – opaque simulator configuration
// ---------------------------------------------------------------------------

/// Configuration of the simulator run that produced a database.
///
/// The database never looks inside; it keeps the value and persists it next
/// to the curves so a consumer can recover the sequence settings later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceConfig(JsonValue);

impl Default for SequenceConfig {
    fn default() -> Self {
        SequenceConfig(JsonValue::Object(Default::default()))
    }
}

impl From<JsonValue> for SequenceConfig {
    fn from(value: JsonValue) -> Self {
        SequenceConfig(value)
    }
}

impl SequenceConfig {
    /// Capture any serializable simulator parameter struct.
    pub fn from_serializable<T: Serialize>(params: &T) -> Result<Self> {
        Ok(SequenceConfig(serde_json::to_value(params)?))
    }

    /// Read the configuration back into a typed parameter struct.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    pub fn as_json(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_json(self) -> JsonValue {
        self.0
    }
}

// ---------------------------------------------------------------------------
// CurveView – borrowed access to one (t1, t2, b1) curve
// ---------------------------------------------------------------------------

/// One curve of the database, borrowed from the columnar store.
#[derive(Debug, Clone)]
pub struct CurveView<'a> {
    /// Curve ordinal (row of the magnitude / phase arrays).
    pub index: usize,
    pub t1: f64,
    pub t2: f64,
    pub b1: f64,
    pub magnitude: ArrayView1<'a, f64>,
    pub phase: ArrayView1<'a, f64>,
}

impl CurveView<'_> {
    /// L2 norm of the magnitude curve.
    pub fn norm(&self) -> f64 {
        l2_norm(self.magnitude.iter().copied())
    }
}

// ---------------------------------------------------------------------------
// SignalDatabase – the columnar store
// ---------------------------------------------------------------------------

/// The EMC signal database.
///
/// Stored column-wise: one `t1`/`t2`/`b1` entry per curve and two
/// `(num_curves, etl)` arrays for magnitude and phase. Record `i` of the
/// row table is echo `i % etl` of curve `i / etl`; rows are computed on
/// demand and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDatabase {
    name: String,
    config: SequenceConfig,
    t1: Vec<f64>,
    t2: Vec<f64>,
    b1: Vec<f64>,
    magnitude: Array2<f64>,
    phase: Array2<f64>,
}

impl SignalDatabase {
    /// Assemble a database from its columns and normalize it.
    pub(crate) fn from_columns(
        name: String,
        config: SequenceConfig,
        t1: Vec<f64>,
        t2: Vec<f64>,
        b1: Vec<f64>,
        magnitude: Array2<f64>,
        phase: Array2<f64>,
    ) -> Result<Self> {
        if magnitude.dim() != phase.dim() {
            return Err(DbError::Shape(format!(
                "magnitude array {:?} and phase array {:?} differ",
                magnitude.dim(),
                phase.dim()
            )));
        }
        let num_curves = magnitude.nrows();
        if t1.len() != num_curves || t2.len() != num_curves || b1.len() != num_curves {
            return Err(DbError::Shape(format!(
                "parameter columns (t1: {}, t2: {}, b1: {}) do not match {num_curves} curves",
                t1.len(),
                t2.len(),
                b1.len()
            )));
        }

        let mut db = SignalDatabase {
            name,
            config,
            t1,
            t2,
            b1,
            magnitude,
            phase,
        };
        db.normalize();
        Ok(db)
    }

    /// Build a database from a record table.
    ///
    /// Rows are ordered by `index` and grouped into curves by their exact
    /// `(t1, t2, b1)` triple, in order of first appearance. Every curve must
    /// carry echoes `0..etl` exactly once, with the same `etl` for all curves.
    pub fn from_records(
        mut records: Vec<SignalRecord>,
        config: SequenceConfig,
        name: impl AsRef<Path>,
    ) -> Result<Self> {
        records.sort_by_key(|r| r.index);

        let mut curve_of: HashMap<[u64; 3], usize> = HashMap::new();
        let mut params: Vec<(f64, f64, f64)> = Vec::new();
        let mut samples: Vec<Vec<Option<(f64, f64)>>> = Vec::new();

        for r in &records {
            if r.echo >= records.len() {
                return Err(DbError::Shape(format!(
                    "row {}: echo {} cannot belong to a complete curve of {} rows",
                    r.index,
                    r.echo,
                    records.len()
                )));
            }
            let key = [r.t1.to_bits(), r.t2.to_bits(), r.b1.to_bits()];
            let curve = *curve_of.entry(key).or_insert_with(|| {
                params.push((r.t1, r.t2, r.b1));
                samples.push(Vec::new());
                params.len() - 1
            });
            let slots = &mut samples[curve];
            if slots.len() <= r.echo {
                slots.resize(r.echo + 1, None);
            }
            if slots[r.echo].replace((r.magnitude, r.phase)).is_some() {
                return Err(DbError::Shape(format!(
                    "duplicate echo {} for curve t1={} t2={} b1={}",
                    r.echo, r.t1, r.t2, r.b1
                )));
            }
        }

        let etl = samples.first().map_or(0, Vec::len);
        let mut mag = Vec::with_capacity(samples.len() * etl);
        let mut phase = Vec::with_capacity(samples.len() * etl);
        for (curve, slots) in samples.iter().enumerate() {
            let (t1, t2, b1) = params[curve];
            if slots.len() != etl {
                return Err(DbError::Shape(format!(
                    "curve t1={t1} t2={t2} b1={b1} has {} echoes, expected {etl}",
                    slots.len()
                )));
            }
            for (echo, &slot) in slots.iter().enumerate() {
                let (m, p) = slot.ok_or_else(|| {
                    DbError::Shape(format!("curve t1={t1} t2={t2} b1={b1} is missing echo {echo}"))
                })?;
                mag.push(m);
                phase.push(p);
            }
        }

        let num_curves = params.len();
        let magnitude = Array2::from_shape_vec((num_curves, etl), mag)
            .map_err(|e| DbError::Shape(e.to_string()))?;
        let phase = Array2::from_shape_vec((num_curves, etl), phase)
            .map_err(|e| DbError::Shape(e.to_string()))?;

        Self::from_columns(
            name_from_path(name),
            config,
            params.iter().map(|p| p.0).collect(),
            params.iter().map(|p| p.1).collect(),
            params.iter().map(|p| p.2).collect(),
            magnitude,
            phase,
        )
    }

    /// Rebuild a database from rows laid out curve by curve, as the store
    /// writes them: row `i` is echo `i % etl` of curve `i / etl`.
    ///
    /// Unlike [`SignalDatabase::from_records`] curves are not regrouped by
    /// parameter value, so grids with repeated coordinates survive.
    pub(crate) fn from_row_layout(
        mut records: Vec<SignalRecord>,
        etl: usize,
        config: SequenceConfig,
        name: String,
    ) -> Result<Self> {
        records.sort_by_key(|r| r.index);
        if etl == 0 || records.len() % etl != 0 {
            return Err(DbError::Shape(format!(
                "{} rows do not split into curves of {etl} echoes",
                records.len()
            )));
        }

        let num_curves = records.len() / etl;
        let mut t1 = Vec::with_capacity(num_curves);
        let mut t2 = Vec::with_capacity(num_curves);
        let mut b1 = Vec::with_capacity(num_curves);
        let mut mag = Vec::with_capacity(records.len());
        let mut phase = Vec::with_capacity(records.len());

        for (row, r) in records.iter().enumerate() {
            if r.index != row || r.echo != row % etl {
                return Err(DbError::Shape(format!(
                    "row {row} (index {}, echo {}) does not fit curves of {etl} echoes",
                    r.index, r.echo
                )));
            }
            let curve = row / etl;
            if r.echo == 0 {
                t1.push(r.t1);
                t2.push(r.t2);
                b1.push(r.b1);
            } else if [r.t1, r.t2, r.b1].map(f64::to_bits)
                != [t1[curve], t2[curve], b1[curve]].map(f64::to_bits)
            {
                return Err(DbError::Shape(format!(
                    "row {row} changes t1/t2/b1 inside curve {curve}"
                )));
            }
            mag.push(r.magnitude);
            phase.push(r.phase);
        }

        let magnitude = Array2::from_shape_vec((num_curves, etl), mag)
            .map_err(|e| DbError::Shape(e.to_string()))?;
        let phase = Array2::from_shape_vec((num_curves, etl), phase)
            .map_err(|e| DbError::Shape(e.to_string()))?;
        Self::from_columns(name, config, t1, t2, b1, magnitude, phase)
    }

    /// Re-derive the database name from a path or file name.
    pub fn with_name(mut self, name: impl AsRef<Path>) -> Self {
        self.name = name_from_path(name);
        self
    }

    /// Replace the name verbatim; used when restoring a persisted name.
    pub(crate) fn renamed(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    /// L2-normalize every magnitude curve along the echo axis.
    ///
    /// Curves with norm `<= NORM_EPSILON` (or a non-finite norm) become
    /// all-zero. Phase is not touched. Idempotent.
    pub fn normalize(&mut self) {
        let mut zeroed = 0usize;
        for mut curve in self.magnitude.axis_iter_mut(Axis(0)) {
            let norm = l2_norm(curve.iter().copied());
            if norm > NORM_EPSILON {
                curve.mapv_inplace(|v| v / norm);
            } else {
                curve.fill(0.0);
                zeroed += 1;
            }
        }
        debug!(
            "normalized {} curves of db '{}' ({zeroed} degenerate, left at zero)",
            self.num_curves(),
            self.name
        );
    }

    // -- Accessors --

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Echo train length, shared by all curves.
    pub fn etl(&self) -> usize {
        self.magnitude.ncols()
    }

    pub fn num_curves(&self) -> usize {
        self.magnitude.nrows()
    }

    /// Number of rows in the record table (`num_curves * etl`).
    pub fn len(&self) -> usize {
        self.num_curves() * self.etl()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalized magnitudes, shaped `(num_curves, etl)`.
    pub fn magnitude(&self) -> &Array2<f64> {
        &self.magnitude
    }

    /// Phases, shaped `(num_curves, etl)`.
    pub fn phase(&self) -> &Array2<f64> {
        &self.phase
    }

    /// Magnitude and phase arrays together.
    pub fn arrays(&self) -> (&Array2<f64>, &Array2<f64>) {
        (&self.magnitude, &self.phase)
    }

    /// Per-curve T1 values.
    pub fn t1_column(&self) -> &[f64] {
        &self.t1
    }

    /// Per-curve T2 values.
    pub fn t2_column(&self) -> &[f64] {
        &self.t2
    }

    /// Per-curve B1 values.
    pub fn b1_column(&self) -> &[f64] {
        &self.b1
    }

    pub fn curve(&self, index: usize) -> Option<CurveView<'_>> {
        if index >= self.num_curves() {
            return None;
        }
        Some(CurveView {
            index,
            t1: self.t1[index],
            t2: self.t2[index],
            b1: self.b1[index],
            magnitude: self.magnitude.row(index),
            phase: self.phase.row(index),
        })
    }

    pub fn curves(&self) -> impl Iterator<Item = CurveView<'_>> + '_ {
        (0..self.num_curves()).filter_map(move |i| self.curve(i))
    }

    /// Row `row` of the record table.
    pub fn record(&self, row: usize) -> Option<SignalRecord> {
        let etl = self.etl();
        if etl == 0 || row >= self.len() {
            return None;
        }
        let (curve, echo) = (row / etl, row % etl);
        Some(SignalRecord {
            index: row,
            t1: self.t1[curve],
            t2: self.t2[curve],
            b1: self.b1[curve],
            echo,
            magnitude: self.magnitude[[curve, echo]],
            phase: self.phase[[curve, echo]],
        })
    }

    pub fn records(&self) -> impl Iterator<Item = SignalRecord> + '_ {
        (0..self.len()).filter_map(move |row| self.record(row))
    }

    pub fn to_records(&self) -> Vec<SignalRecord> {
        self.records().collect()
    }
}

impl fmt::Display for SignalDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} curves x {} echoes ({} records)",
            self.name,
            self.num_curves(),
            self.etl(),
            self.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Derive a filesystem-safe database name from the stem of `path`.
pub fn name_from_path(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        safe
    }
}

fn l2_norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve_records(start: usize, t2: f64, mags: &[f64]) -> Vec<SignalRecord> {
        mags.iter()
            .enumerate()
            .map(|(echo, &m)| SignalRecord {
                index: start + echo,
                t1: 1.5,
                t2,
                b1: 1.0,
                echo,
                magnitude: m,
                phase: 0.1 * echo as f64,
            })
            .collect()
    }

    #[test]
    fn from_records_groups_curves_and_normalizes() {
        let mut records = curve_records(0, 0.03, &[3.0, 4.0]);
        records.extend(curve_records(2, 0.05, &[0.0, 0.0]));

        let db = SignalDatabase::from_records(records, SequenceConfig::default(), "db_test").unwrap();
        assert_eq!(db.num_curves(), 2);
        assert_eq!(db.etl(), 2);
        assert_eq!(db.len(), 4);
        assert!((db.magnitude()[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((db.magnitude()[[0, 1]] - 0.8).abs() < 1e-12);
        assert_eq!(db.magnitude().row(1).to_vec(), vec![0.0, 0.0]);
        // phase is never scaled
        assert!((db.phase()[[0, 1]] - 0.1).abs() < 1e-15);
    }

    #[test]
    fn from_records_sorts_by_index() {
        let mut records = curve_records(0, 0.03, &[1.0, 2.0, 3.0]);
        records.reverse();
        let db = SignalDatabase::from_records(records, SequenceConfig::default(), "x").unwrap();
        let row = db.record(2).unwrap();
        assert_eq!(row.echo, 2);
        assert!(row.magnitude > db.record(0).unwrap().magnitude);
    }

    #[test]
    fn ragged_echo_trains_are_rejected() {
        let mut records = curve_records(0, 0.03, &[1.0, 2.0, 3.0]);
        records.extend(curve_records(3, 0.05, &[1.0, 2.0]));
        let err = SignalDatabase::from_records(records, SequenceConfig::default(), "x").unwrap_err();
        assert!(matches!(err, DbError::Shape(_)));
    }

    #[test]
    fn duplicate_echo_is_rejected() {
        let mut records = curve_records(0, 0.03, &[1.0, 2.0]);
        let dup = SignalRecord { index: 9, ..records[1] };
        records.push(dup);
        let err = SignalDatabase::from_records(records, SequenceConfig::default(), "x").unwrap_err();
        assert!(matches!(err, DbError::Shape(_)));
    }

    #[test]
    fn empty_record_table_gives_empty_database() {
        let db = SignalDatabase::from_records(Vec::new(), SequenceConfig::default(), "x").unwrap();
        assert!(db.is_empty());
        assert_eq!(db.etl(), 0);
        assert!(db.record(0).is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        let records = curve_records(0, 0.03, &[0.9, 0.4, 0.2, 0.05]);
        let mut db = SignalDatabase::from_records(records, SequenceConfig::default(), "x").unwrap();
        let once = db.magnitude().clone();
        db.normalize();
        for (a, b) in once.iter().zip(db.magnitude().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!((db.curve(0).unwrap().norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tiny_curves_stay_zero() {
        let records = curve_records(0, 0.03, &[1e-14, 0.0]);
        let db = SignalDatabase::from_records(records, SequenceConfig::default(), "x").unwrap();
        assert!(db.magnitude().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn names_come_from_file_stems() {
        assert_eq!(name_from_path("out/dir/test_db.pkl"), "test_db");
        assert_eq!(name_from_path("db_"), "db_");
        assert_eq!(name_from_path("my run #2.parquet"), "my_run__2");
        assert_eq!(name_from_path(""), DEFAULT_NAME);
    }

    #[test]
    fn sequence_config_round_trips_typed_params() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Params {
            etl: usize,
            esp: f64,
        }
        let cfg = SequenceConfig::from_serializable(&Params { etl: 8, esp: 9.0 }).unwrap();
        let back: Params = cfg.to_typed().unwrap();
        assert_eq!(back, Params { etl: 8, esp: 9.0 });
    }
}
