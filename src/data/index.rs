use super::model::SignalDatabase;

/// Distinct parameter values present in a database.
///
/// A snapshot taken by [`SignalDatabase::parameter_index`]; it is never
/// kept inside the database, so it cannot go stale there.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterIndex {
    pub t1: Vec<f64>,
    pub t2: Vec<f64>,
    pub b1: Vec<f64>,
}

impl ParameterIndex {
    /// Number of distinct (t1, t2, b1) combinations the axes span.
    pub fn grid_size(&self) -> usize {
        self.t1.len() * self.t2.len() * self.b1.len()
    }
}

impl SignalDatabase {
    pub fn unique_t1_values(&self) -> Vec<f64> {
        sorted_unique(self.t1_column())
    }

    pub fn unique_t2_values(&self) -> Vec<f64> {
        sorted_unique(self.t2_column())
    }

    pub fn unique_b1_values(&self) -> Vec<f64> {
        sorted_unique(self.b1_column())
    }

    /// Distinct T2 and B1 values, as used for fitting grids.
    pub fn t2_b1_values(&self) -> (Vec<f64>, Vec<f64>) {
        (self.unique_t2_values(), self.unique_b1_values())
    }

    pub fn parameter_index(&self) -> ParameterIndex {
        ParameterIndex {
            t1: self.unique_t1_values(),
            t2: self.unique_t2_values(),
            b1: self.unique_b1_values(),
        }
    }
}

/// Sorted distinct values; NaN is dropped.
pub(crate) fn sorted_unique(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{SequenceConfig, SignalRecord};

    fn db(params: &[(f64, f64, f64)]) -> SignalDatabase {
        let records = params
            .iter()
            .enumerate()
            .map(|(i, &(t1, t2, b1))| SignalRecord {
                index: i,
                t1,
                t2,
                b1,
                echo: 0,
                magnitude: 1.0,
                phase: 0.0,
            })
            .collect();
        SignalDatabase::from_records(records, SequenceConfig::default(), "idx").unwrap()
    }

    #[test]
    fn unique_values_are_sorted_and_distinct() {
        let db = db(&[
            (1.5, 0.05, 1.0),
            (1.5, 0.02, 0.8),
            (1.5, 0.05, 0.8),
            (2.0, 0.03, 1.0),
        ]);
        assert_eq!(db.unique_t1_values(), vec![1.5, 2.0]);
        assert_eq!(db.unique_t2_values(), vec![0.02, 0.03, 0.05]);
        assert_eq!(db.unique_b1_values(), vec![0.8, 1.0]);

        let index = db.parameter_index();
        assert_eq!(index.grid_size(), 2 * 3 * 2);
        assert_eq!(db.t2_b1_values(), (index.t2, index.b1));
    }

    #[test]
    fn nan_is_not_a_value() {
        assert_eq!(sorted_unique(&[f64::NAN, 2.0, 1.0, 2.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn empty_database_has_no_values() {
        let db = db(&[]);
        assert!(db.unique_t2_values().is_empty());
        assert_eq!(db.parameter_index(), ParameterIndex::default());
    }
}
