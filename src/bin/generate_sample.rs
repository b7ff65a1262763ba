use anyhow::{Context, Result};
use emc_db::{SequenceConfig, SignalDatabase, SimulationData};
use log::info;
use ndarray::{Array1, Array4};
use serde::Serialize;

/// Sequence settings recorded with the sample database.
#[derive(Debug, Serialize)]
struct SampleSequence {
    etl: usize,
    esp_ms: f64,
    tr_ms: f64,
    phase_noise_rad: f64,
    seed: u64,
}

/// Toy multi-echo spin-echo signal: T1 recovery, T2 decay and an even/odd
/// echo modulation that grows as the refocusing flip angle drifts from B1 = 1.
fn echo_signal(t1: f64, t2: f64, b1: f64, echo: usize, seq: &SampleSequence) -> f64 {
    let t = (echo + 1) as f64 * seq.esp_ms * 1e-3;
    let recovery = 1.0 - (-seq.tr_ms * 1e-3 / t1).exp();
    let stimulated = if echo % 2 == 1 { 1.0 - 0.5 * (1.0 - b1).abs() } else { 1.0 };
    b1.min(1.0) * recovery * (-t / t2).exp() * stimulated
}

/// Phase jitter for one tensor cell, uniform in `±seq.phase_noise_rad`.
///
/// A splitmix64 hash of the seed and the cell coordinates, so every cell is
/// reproducible on its own regardless of fill order.
fn phase_jitter(seq: &SampleSequence, cell: [usize; 4]) -> f64 {
    let mut z = cell
        .iter()
        .fold(seq.seed, |acc, &c| acc.rotate_left(16) ^ c as u64)
        .wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    let unit = (z >> 11) as f64 / (1u64 << 53) as f64;
    (2.0 * unit - 1.0) * seq.phase_noise_rad
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "sample_db".to_string());
    let seq = SampleSequence {
        etl: 8,
        esp_ms: 9.0,
        tr_ms: 4500.0,
        phase_noise_rad: 0.01,
        seed: 42,
    };

    // T1 in s, T2 10..100 ms, B1 0.5..1.4
    let t1_vals = Array1::from(vec![1.0, 1.5]);
    let t2_vals = Array1::from_iter((1..=10).map(|i| i as f64 * 0.01));
    let b1_vals = Array1::from_iter((5..=14).map(|i| i as f64 * 0.1));

    let shape = (t1_vals.len(), t2_vals.len(), b1_vals.len(), seq.etl);
    let emc_signal_mag = Array4::from_shape_fn(shape, |(i1, i2, ib, echo)| {
        echo_signal(t1_vals[i1], t2_vals[i2], b1_vals[ib], echo, &seq)
    });
    let emc_signal_phase = Array4::from_shape_fn(shape, |(i1, i2, ib, echo)| {
        phase_jitter(&seq, [i1, i2, ib, echo])
    });

    let sim = SimulationData {
        t1_vals,
        t2_vals,
        b1_vals,
        emc_signal_mag,
        emc_signal_phase,
    };
    let config = SequenceConfig::from_serializable(&seq).context("capturing sequence settings")?;
    let db = SignalDatabase::build_from_simulation(config, &sim)
        .context("building database")?
        .with_name("sample");

    let path = db
        .save(&out_dir)
        .with_context(|| format!("saving database to {out_dir}"))?;
    info!("wrote {db} to {}", path.display());
    Ok(())
}
