use log::debug;
use ndarray::{Array1, Array2, Array4};

use super::model::{SequenceConfig, SignalDatabase, DEFAULT_NAME};
use crate::error::{DbError, Result};

// ---------------------------------------------------------------------------
// SimulationData – raw simulator output
// ---------------------------------------------------------------------------

/// Raw output of one simulator run.
///
/// Signal tensors are shaped `(|T1|, |T2|, |B1|, ETL)`; the coordinate
/// vectors give the parameter value along each of the first three axes.
/// `A` is whatever plain numeric type the simulator hands over (`f32` or
/// `f64`); values are widened to `f64` when the database is built.
#[derive(Debug, Clone)]
pub struct SimulationData<A = f64> {
    pub t1_vals: Array1<A>,
    pub t2_vals: Array1<A>,
    pub b1_vals: Array1<A>,
    pub emc_signal_mag: Array4<A>,
    pub emc_signal_phase: Array4<A>,
}

impl<A> SimulationData<A> {
    /// Check that both tensors and the coordinate vectors agree.
    pub fn check_shapes(&self) -> Result<()> {
        let mag_dim = self.emc_signal_mag.dim();
        let phase_dim = self.emc_signal_phase.dim();
        if mag_dim != phase_dim {
            return Err(DbError::Shape(format!(
                "magnitude tensor {mag_dim:?} and phase tensor {phase_dim:?} differ"
            )));
        }

        let (n_t1, n_t2, n_b1, etl) = mag_dim;
        for (axis, coords, expected) in [
            ("t1", self.t1_vals.len(), n_t1),
            ("t2", self.t2_vals.len(), n_t2),
            ("b1", self.b1_vals.len(), n_b1),
        ] {
            if coords != expected {
                return Err(DbError::Shape(format!(
                    "{axis} has {coords} values but the signal tensor axis has {expected}"
                )));
            }
        }

        if etl == 0 && n_t1 * n_t2 * n_b1 > 0 {
            return Err(DbError::Shape("signal tensor has an empty echo train".into()));
        }
        Ok(())
    }
}

impl SignalDatabase {
    /// Build a normalized database from a simulator run.
    ///
    /// Rows enumerate t1 (outermost), t2, b1 and echo (innermost), so the
    /// record table has exactly `|T1|·|T2|·|B1|·ETL` rows with contiguous
    /// indices starting at 0. `config` is kept as-is.
    pub fn build_from_simulation<A>(config: SequenceConfig, sim: &SimulationData<A>) -> Result<Self>
    where
        A: Copy + Into<f64>,
    {
        sim.check_shapes()?;
        let (n_t1, n_t2, n_b1, etl) = sim.emc_signal_mag.dim();
        let num_curves = n_t1 * n_t2 * n_b1;

        let mut t1: Vec<f64> = Vec::with_capacity(num_curves);
        let mut t2: Vec<f64> = Vec::with_capacity(num_curves);
        let mut b1: Vec<f64> = Vec::with_capacity(num_curves);
        let mut mag: Vec<f64> = Vec::with_capacity(num_curves * etl);
        let mut phase: Vec<f64> = Vec::with_capacity(num_curves * etl);

        for i_t1 in 0..n_t1 {
            for i_t2 in 0..n_t2 {
                for i_b1 in 0..n_b1 {
                    t1.push(sim.t1_vals[i_t1].into());
                    t2.push(sim.t2_vals[i_t2].into());
                    b1.push(sim.b1_vals[i_b1].into());
                    for echo in 0..etl {
                        let at = [i_t1, i_t2, i_b1, echo];
                        mag.push(sim.emc_signal_mag[at].into());
                        phase.push(sim.emc_signal_phase[at].into());
                    }
                }
            }
        }

        let magnitude = Array2::from_shape_vec((num_curves, etl), mag)
            .map_err(|e| DbError::Shape(e.to_string()))?;
        let phase = Array2::from_shape_vec((num_curves, etl), phase)
            .map_err(|e| DbError::Shape(e.to_string()))?;

        debug!("building db from simulation: {n_t1} t1 x {n_t2} t2 x {n_b1} b1, etl {etl}");
        SignalDatabase::from_columns(DEFAULT_NAME.to_string(), config, t1, t2, b1, magnitude, phase)
    }
}
