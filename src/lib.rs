//! Precomputed EMC (echo modulation curve) signal database.
//!
//! A [`SignalDatabase`] holds one magnitude/phase echo-train curve per
//! (T1, T2, B1) combination simulated by an external Bloch simulator. It can
//! be built from the simulator's 4-D output, queried by parameter range and
//! persisted to a single Parquet file.

pub mod data;
pub mod error;

pub use data::filter::{Bounds, ParamRange, RangeFilter, Selection};
pub use data::index::ParameterIndex;
pub use data::loader::{export_csv, import_table, load_table};
pub use data::model::{
    CurveView, SequenceConfig, SignalDatabase, SignalRecord, DEFAULT_NAME, NORM_EPSILON,
};
pub use data::simulation::SimulationData;
pub use data::store::{load, resolve_load_path, resolve_save_path, save, STORE_EXTENSION};
pub use error::{DbError, Result};
