use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use emc_db::{export_csv, ParamRange, RangeFilter, SignalDatabase};
use log::{error, info, warn, LevelFilter};

const USAGE: &str = "usage: emc-db [--debug] <database-path> \
[--t1 MIN MAX] [--t2 MIN MAX] [--b1 MIN MAX] [--export-csv PATH]";

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

struct Args {
    path: PathBuf,
    filter: RangeFilter,
    export_csv: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut path = None;
    let mut filter = RangeFilter::new();
    let mut export = None;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--debug" => {}
            "--t1" => filter = filter.t1(parse_range(&mut it, arg)?),
            "--t2" => filter = filter.t2(parse_range(&mut it, arg)?),
            "--b1" => filter = filter.b1(parse_range(&mut it, arg)?),
            "--export-csv" => {
                let target = it.next().context("--export-csv needs a path")?;
                export = Some(PathBuf::from(target));
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            other => {
                if path.replace(PathBuf::from(other)).is_some() {
                    bail!("more than one database path given");
                }
            }
        }
    }

    Ok(Args {
        path: path.context("no database path given")?,
        filter,
        export_csv: export,
    })
}

fn parse_range<'a>(it: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<ParamRange> {
    let mut bound = |which: &str| -> Result<f64> {
        let raw = it.next().with_context(|| format!("{flag} needs MIN and MAX"))?;
        raw.parse::<f64>()
            .with_context(|| format!("{flag} {which}: '{raw}' is not a number"))
    };
    let min = bound("MIN")?;
    let max = bound("MAX")?;
    Ok(ParamRange::inclusive(min, max))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn run(args: &Args) -> Result<()> {
    let db = SignalDatabase::load(&args.path)
        .with_context(|| format!("loading database {}", args.path.display()))?;
    info!("{db}");
    info!("config: {}", db.config().as_json());

    let (t2s, b1s) = db.t2_b1_values();
    let t2_ms: Vec<f64> = t2s.iter().map(|t2| (t2 * 1e5).round() / 1e2).collect();
    info!("t1 values [s]: {:?}", db.unique_t1_values());
    info!("t2 values [ms]: {t2_ms:?}");
    info!("b1 values: {b1s:?}");

    let grid = db.parameter_index();
    info!(
        "parameter grid: {} t1 x {} t2 x {} b1 = {} combinations, {} curves stored",
        grid.t1.len(),
        grid.t2.len(),
        grid.b1.len(),
        grid.grid_size(),
        db.num_curves()
    );
    if grid.grid_size() != db.num_curves() {
        warn!("curves do not cover the parameter grid exactly once");
    }

    let selection = db.filter(&args.filter);
    info!(
        "selection: {} of {} curves, t1 values {:?}",
        selection.len(),
        db.num_curves(),
        selection.unique_t1_values()
    );

    if let Some(target) = &args.export_csv {
        export_csv(&db, target)
            .with_context(|| format!("exporting record table to {}", target.display()))?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.iter().any(|a| a == "--debug") {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    info!("__________________ EMC signal database __________________");

    match parse_args(&args).and_then(|args| run(&args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}
