use ndarray::Array2;

use super::index::sorted_unique;
use super::model::{CurveView, SignalDatabase, SignalRecord};

// ---------------------------------------------------------------------------
// Range predicates
// ---------------------------------------------------------------------------

/// Whether the end points of a [`ParamRange`] belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bounds {
    #[default]
    Inclusive,
    Exclusive,
}

/// A closed or open interval over one parameter axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub bounds: Bounds,
}

impl ParamRange {
    /// `min <= v <= max`.
    pub fn inclusive(min: f64, max: f64) -> Self {
        ParamRange { min, max, bounds: Bounds::Inclusive }
    }

    /// `min < v < max`.
    pub fn exclusive(min: f64, max: f64) -> Self {
        ParamRange { min, max, bounds: Bounds::Exclusive }
    }

    pub fn contains(&self, value: f64) -> bool {
        match self.bounds {
            Bounds::Inclusive => self.min <= value && value <= self.max,
            Bounds::Exclusive => self.min < value && value < self.max,
        }
    }
}

/// Per-axis ranges a curve must satisfy. An axis set to `None` is not filtered.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeFilter {
    pub t1: Option<ParamRange>,
    pub t2: Option<ParamRange>,
    pub b1: Option<ParamRange>,
}

impl RangeFilter {
    /// A filter that lets everything through.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn t1(mut self, range: ParamRange) -> Self {
        self.t1 = Some(range);
        self
    }

    pub fn t2(mut self, range: ParamRange) -> Self {
        self.t2 = Some(range);
        self
    }

    pub fn b1(mut self, range: ParamRange) -> Self {
        self.b1 = Some(range);
        self
    }

    /// Whether a curve with these parameters passes every active range.
    pub fn accepts(&self, t1: f64, t2: f64, b1: f64) -> bool {
        passes(self.t1.as_ref(), t1) && passes(self.t2.as_ref(), t2) && passes(self.b1.as_ref(), b1)
    }
}

fn passes(range: Option<&ParamRange>, value: f64) -> bool {
    range.map_or(true, |r| r.contains(value))
}

// ---------------------------------------------------------------------------
// Selection – borrowed subset of curves
// ---------------------------------------------------------------------------

/// Curves of a database that passed a [`RangeFilter`].
///
/// Several T1 values may remain. Callers that need one curve per (t2, b1)
/// must pin a T1 themselves with [`Selection::pin_t1`] or
/// [`Selection::pin_first_t1`].
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    db: &'a SignalDatabase,
    curves: Vec<usize>,
}

impl<'a> Selection<'a> {
    /// Selected curve ordinals, ascending.
    pub fn curve_indices(&self) -> &[usize] {
        &self.curves
    }

    /// Number of selected curves.
    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    pub fn curves(&self) -> impl Iterator<Item = CurveView<'a>> + '_ {
        let db = self.db;
        self.curves.iter().filter_map(move |&i| db.curve(i))
    }

    /// Record-table rows of every selected curve, all echoes.
    pub fn records(&self) -> impl Iterator<Item = SignalRecord> + '_ {
        let db = self.db;
        let etl = db.etl();
        self.curves
            .iter()
            .flat_map(move |&curve| (0..etl).filter_map(move |echo| db.record(curve * etl + echo)))
    }

    /// Magnitudes of the selected curves, shaped `(len, etl)`.
    pub fn magnitude(&self) -> Array2<f64> {
        self.gather(self.db.magnitude())
    }

    /// Phases of the selected curves, shaped `(len, etl)`.
    pub fn phase(&self) -> Array2<f64> {
        self.gather(self.db.phase())
    }

    pub fn unique_t1_values(&self) -> Vec<f64> {
        sorted_unique(&self.column(self.db.t1_column()))
    }

    pub fn unique_t2_values(&self) -> Vec<f64> {
        sorted_unique(&self.column(self.db.t2_column()))
    }

    pub fn unique_b1_values(&self) -> Vec<f64> {
        sorted_unique(&self.column(self.db.b1_column()))
    }

    /// Keep only curves whose T1 equals `t1` exactly.
    pub fn pin_t1(&self, t1: f64) -> Selection<'a> {
        let column = self.db.t1_column();
        Selection {
            db: self.db,
            curves: self.curves.iter().copied().filter(|&i| column[i] == t1).collect(),
        }
    }

    /// Keep only curves sharing the T1 of the first selected curve.
    pub fn pin_first_t1(&self) -> Selection<'a> {
        match self.curves.first() {
            Some(&first) => self.pin_t1(self.db.t1_column()[first]),
            None => self.clone(),
        }
    }

    fn gather(&self, source: &Array2<f64>) -> Array2<f64> {
        Array2::from_shape_fn((self.curves.len(), source.ncols()), |(row, echo)| {
            source[[self.curves[row], echo]]
        })
    }

    fn column(&self, column: &[f64]) -> Vec<f64> {
        self.curves.iter().map(|&i| column[i]).collect()
    }
}

impl SignalDatabase {
    /// Ordinals of the curves that pass `filter`.
    pub fn select_curves(&self, filter: &RangeFilter) -> Vec<usize> {
        let (t1, t2, b1) = (self.t1_column(), self.t2_column(), self.b1_column());
        (0..self.num_curves())
            .filter(|&i| filter.accepts(t1[i], t2[i], b1[i]))
            .collect()
    }

    /// Borrowed view of the curves that pass `filter`. Empty when nothing matches.
    pub fn filter(&self, filter: &RangeFilter) -> Selection<'_> {
        Selection {
            db: self,
            curves: self.select_curves(filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::SequenceConfig;
    use crate::data::simulation::SimulationData;
    use ndarray::{array, Array4};

    fn db() -> SignalDatabase {
        let shape = (2, 3, 2, 3);
        let data = SimulationData {
            t1_vals: array![1.0, 2.5],
            t2_vals: array![0.02, 0.03, 0.05],
            b1_vals: array![0.8, 1.0],
            emc_signal_mag: Array4::from_shape_fn(shape, |(_, _, _, e)| 1.0 / (e + 1) as f64),
            emc_signal_phase: Array4::zeros(shape),
        };
        SignalDatabase::build_from_simulation(SequenceConfig::default(), &data).unwrap()
    }

    #[test]
    fn exclusive_t2_range_keeps_only_inner_value() {
        let db = db();
        let filter = RangeFilter::new().t2(ParamRange::exclusive(0.02, 0.04));
        let selection = db.filter(&filter);

        assert_eq!(selection.len(), 2 * 2);
        assert!(selection.records().all(|r| r.t2 == 0.03));
        assert_eq!(selection.records().count(), 2 * 2 * 3);
        assert_eq!(selection.unique_t2_values(), vec![0.03]);
    }

    #[test]
    fn inclusive_range_keeps_end_points() {
        let db = db();
        let filter = RangeFilter::new()
            .t2(ParamRange::inclusive(0.02, 0.03))
            .b1(ParamRange::inclusive(1.0, 1.0));
        let selection = db.filter(&filter);
        assert_eq!(selection.unique_t2_values(), vec![0.02, 0.03]);
        assert_eq!(selection.unique_b1_values(), vec![1.0]);
        assert_eq!(selection.len(), 2 * 2);
    }

    #[test]
    fn no_ranges_select_everything() {
        let db = db();
        assert_eq!(db.select_curves(&RangeFilter::new()).len(), db.num_curves());
    }

    #[test]
    fn unmatched_range_is_empty_not_an_error() {
        let db = db();
        let selection = db.filter(&RangeFilter::new().t2(ParamRange::inclusive(0.2, 0.4)));
        assert!(selection.is_empty());
        assert_eq!(selection.records().count(), 0);
        assert_eq!(selection.magnitude().dim(), (0, 3));
        assert!(selection.pin_first_t1().is_empty());
    }

    #[test]
    fn pinning_t1_is_explicit() {
        let db = db();
        let selection = db.filter(&RangeFilter::new().b1(ParamRange::inclusive(0.9, 1.1)));
        assert_eq!(selection.unique_t1_values(), vec![1.0, 2.5]);

        let pinned = selection.pin_first_t1();
        assert_eq!(pinned.unique_t1_values(), vec![1.0]);
        assert_eq!(pinned.len(), 3);

        let other = selection.pin_t1(2.5);
        assert!(other.curves().all(|c| c.t1 == 2.5));
        assert_eq!(other.magnitude().nrows(), 3);
    }

    #[test]
    fn selected_rows_point_back_into_the_table() {
        let db = db();
        let selection = db.filter(&RangeFilter::new().t1(ParamRange::exclusive(2.0, 3.0)));
        for r in selection.records() {
            assert_eq!(Some(r), db.record(r.index));
        }
    }
}
