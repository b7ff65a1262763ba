use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::{error, info};
use ndarray::Array2;
use parquet::arrow::ArrowWriter;

use super::loader::read_parquet;
use super::model::{
    name_from_path, SequenceConfig, SignalDatabase, COL_B1, COL_ECHO, COL_INDEX, COL_MAG,
    COL_PHASE, COL_T1, COL_T2,
};
use crate::error::{DbError, Result};

/// Extension of database files; enforced on save and on load.
pub const STORE_EXTENSION: &str = "parquet";

const META_NAME: &str = "emc_db.name";
const META_ETL: &str = "emc_db.etl";
const META_CONFIG: &str = "emc_db.sequence_config";

// ---------------------------------------------------------------------------
// Path handling
// ---------------------------------------------------------------------------

/// All dot-suffixes of the file name, without the dots: `a.tar.gz` → `[tar, gz]`.
/// Leading dots (hidden files) do not start a suffix.
fn suffixes(path: &Path) -> Vec<String> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    if name.ends_with('.') {
        return Vec::new();
    }
    name.trim_start_matches('.')
        .split('.')
        .skip(1)
        .map(str::to_string)
        .collect()
}

fn has_store_suffix(path: &Path) -> bool {
    suffixes(path).iter().any(|s| s == STORE_EXTENSION)
}

/// Final location for saving a database called `name` to `path`.
///
/// A path without any suffix is a directory and gets
/// `<name>_database_file.parquet` appended; any other suffix is replaced by
/// the store extension.
pub fn resolve_save_path(path: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let mut path = std::path::absolute(path.as_ref())?;
    if suffixes(&path).is_empty() {
        path = path.join(format!("{name}_database_file.{STORE_EXTENSION}"));
    }
    if !has_store_suffix(&path) {
        info!("database saved as .{STORE_EXTENSION}, adapting suffix");
        path.set_extension(STORE_EXTENSION);
    }
    Ok(path)
}

/// Location a database is loaded from; a missing store suffix is added.
pub fn resolve_load_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut path = std::path::absolute(path.as_ref())?;
    if !has_store_suffix(&path) {
        info!("filename not .{STORE_EXTENSION}, trying with adapted suffix");
        path.set_extension(STORE_EXTENSION);
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Save / load
// ---------------------------------------------------------------------------

/// Write `db` as a single Parquet file and return where it went.
///
/// Missing parent directories are created.
pub fn save(db: &SignalDatabase, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = resolve_save_path(path, db.name())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("writing file {}", path.display());
    let batch = record_batch(db)?;
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(path)
}

/// Read a database written by [`save`].
///
/// Rows are read back in the curve-by-curve layout recorded in the file
/// metadata and normalized again, so a loaded database satisfies the same
/// invariants as a freshly built one. Files without that metadata are
/// regrouped by parameter values like any imported table.
pub fn load(path: impl AsRef<Path>) -> Result<SignalDatabase> {
    let path = resolve_load_path(path)?;
    if !path.is_file() {
        let err = DbError::NotFound { path };
        error!("{err}");
        return Err(err);
    }

    info!("reading file {}", path.display());
    let (records, metadata) = read_parquet(&path)?;

    let config = match metadata.get(META_CONFIG) {
        Some(json) => serde_json::from_str::<SequenceConfig>(json)?,
        None => SequenceConfig::default(),
    };
    let name = metadata
        .get(META_NAME)
        .cloned()
        .unwrap_or_else(|| name_from_path(&path));
    let etl = metadata
        .get(META_ETL)
        .map(|v| v.parse::<usize>())
        .transpose()
        .map_err(|e| DbError::Invalid(format!("{META_ETL} metadata: {e}")))?;

    match etl {
        Some(etl) if !records.is_empty() => {
            SignalDatabase::from_row_layout(records, etl, config, name)
        }
        Some(etl) => SignalDatabase::from_columns(
            name,
            config,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Array2::zeros((0, etl)),
            Array2::zeros((0, etl)),
        ),
        // no layout recorded: regroup by parameter values
        None => Ok(SignalDatabase::from_records(records, config, &path)?.renamed(name)),
    }
}

fn record_batch(db: &SignalDatabase) -> Result<RecordBatch> {
    let rows = db.len();
    let mut index = Vec::with_capacity(rows);
    let mut t1 = Vec::with_capacity(rows);
    let mut t2 = Vec::with_capacity(rows);
    let mut b1 = Vec::with_capacity(rows);
    let mut echo = Vec::with_capacity(rows);
    let mut mag = Vec::with_capacity(rows);
    let mut phase = Vec::with_capacity(rows);
    for r in db.records() {
        index.push(r.index as i64);
        t1.push(r.t1);
        t2.push(r.t2);
        b1.push(r.b1);
        echo.push(r.echo as i64);
        mag.push(r.magnitude);
        phase.push(r.phase);
    }

    let metadata = HashMap::from([
        (META_NAME.to_string(), db.name().to_string()),
        (META_ETL.to_string(), db.etl().to_string()),
        (META_CONFIG.to_string(), serde_json::to_string(db.config())?),
    ]);
    let schema = Arc::new(Schema::new_with_metadata(
        vec![
            Field::new(COL_INDEX, DataType::Int64, false),
            Field::new(COL_T1, DataType::Float64, false),
            Field::new(COL_T2, DataType::Float64, false),
            Field::new(COL_B1, DataType::Float64, false),
            Field::new(COL_ECHO, DataType::Int64, false),
            Field::new(COL_MAG, DataType::Float64, false),
            Field::new(COL_PHASE, DataType::Float64, false),
        ],
        metadata,
    ));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(index)),
        Arc::new(Float64Array::from(t1)),
        Arc::new(Float64Array::from(t2)),
        Arc::new(Float64Array::from(b1)),
        Arc::new(Int64Array::from(echo)),
        Arc::new(Float64Array::from(mag)),
        Arc::new(Float64Array::from(phase)),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

impl SignalDatabase {
    /// See [`save`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        save(self, path)
    }

    /// See [`load`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_follow_file_name_dots() {
        assert_eq!(suffixes(Path::new("out/a.tar.gz")), vec!["tar", "gz"]);
        assert!(suffixes(Path::new("out/")).is_empty());
        assert!(suffixes(Path::new("out/.hidden")).is_empty());
        assert!(suffixes(Path::new("out/trailing.")).is_empty());
    }

    #[test]
    fn directory_target_gets_database_file_name() {
        let path = resolve_save_path("out/", "db_test").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("out/db_test_database_file.parquet"));
    }

    #[test]
    fn foreign_suffix_is_replaced_keeping_stem() {
        let path = resolve_save_path("out/myfile.dat", "db_test").unwrap();
        assert!(path.ends_with("out/myfile.parquet"));

        let kept = resolve_save_path("out/myfile.parquet", "db_test").unwrap();
        assert!(kept.ends_with("out/myfile.parquet"));
    }

    #[test]
    fn load_path_gains_store_suffix() {
        assert!(resolve_load_path("dir/run1").unwrap().ends_with("dir/run1.parquet"));
        assert!(resolve_load_path("dir/run1.pkl").unwrap().ends_with("dir/run1.parquet"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("nonexistent/path")).unwrap_err();
        match err {
            DbError::NotFound { path } => assert!(path.ends_with("nonexistent/path.parquet")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    fn write_batch(path: &Path, batch: &RecordBatch) {
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
    }

    fn two_curves() -> SignalDatabase {
        let records = (0..6)
            .map(|i| crate::data::model::SignalRecord {
                index: i,
                t1: 1.0,
                t2: if i < 3 { 0.02 } else { 0.04 },
                b1: 1.0,
                echo: i % 3,
                magnitude: 1.0 + i as f64,
                phase: 0.0,
            })
            .collect();
        SignalDatabase::from_records(records, SequenceConfig::default(), "two").unwrap()
    }

    #[test]
    fn store_without_phase_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_phase.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new(COL_T1, DataType::Float64, false),
            Field::new(COL_T2, DataType::Float64, false),
            Field::new(COL_B1, DataType::Float64, false),
            Field::new(COL_ECHO, DataType::Int64, false),
            Field::new(COL_MAG, DataType::Float64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Float64Array::from(vec![1.0])),
            Arc::new(Float64Array::from(vec![0.03])),
            Arc::new(Float64Array::from(vec![1.0])),
            Arc::new(Int64Array::from(vec![0])),
            Arc::new(Float64Array::from(vec![1.0])),
        ];
        write_batch(&path, &RecordBatch::try_new(schema, columns).unwrap());

        match load(&path).unwrap_err() {
            DbError::Schema { missing, .. } => assert_eq!(missing, vec!["emc_phase".to_string()]),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn etl_metadata_disagreeing_with_rows_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let batch = record_batch(&two_curves()).unwrap();

        for etl in ["4", "2"] {
            let mut metadata = batch.schema().metadata().clone();
            metadata.insert(META_ETL.to_string(), etl.to_string());
            let schema = Arc::new(batch.schema().as_ref().clone().with_metadata(metadata));
            let relabeled = RecordBatch::try_new(schema, batch.columns().to_vec()).unwrap();

            let path = dir.path().join(format!("etl_{etl}.parquet"));
            write_batch(&path, &relabeled);
            let err = load(&path).unwrap_err();
            assert!(matches!(err, DbError::Shape(_)), "etl {etl}: {err:?}");
        }
    }

    #[test]
    fn store_without_layout_metadata_regroups_by_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let batch = record_batch(&two_curves()).unwrap();
        let schema = Arc::new(batch.schema().as_ref().clone().with_metadata(HashMap::new()));
        let path = dir.path().join("plain_table.parquet");
        write_batch(&path, &RecordBatch::try_new(schema, batch.columns().to_vec()).unwrap());

        let db = load(&path).unwrap();
        assert_eq!(db.name(), "plain_table");
        assert_eq!(db.num_curves(), 2);
        assert_eq!(db.etl(), 3);
    }
}
