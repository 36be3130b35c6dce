use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use liftbal::{
    list_estimators, load_table, max_overtravel, min_pit_vertical_distance, recommend,
    samples_from_blocks, BalanceSettings, BlockReading, CurrentSample, EstimateStatus,
    EstimatorKind, ShaftGeometry, DEFAULT_TEST_PERCENTAGES,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Elevator balance coefficient CLI", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate the balance coefficient for one or more CSV readings files
    Estimate(EstimateArgs),
    /// Suggest counterweight block adjustments for a known coefficient
    Recommend(RecommendArgs),
    /// Print whole-block test loads for nominal load percentages
    Table(TableArgs),
    /// Compute maximum overtravel from a shaft geometry JSON file
    Overtravel(OvertravelArgs),
    /// List the available estimators
    Estimators,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// Settings JSON (estimator and target band)
    #[arg(long, value_hint = ValueHint::FilePath)]
    settings: Option<PathBuf>,

    /// Estimator identifier, overrides the settings file
    #[arg(long)]
    estimator: Option<String>,

    /// Lower bound of the target band (%)
    #[arg(long = "target-min")]
    k_min: Option<f64>,

    /// Upper bound of the target band (%)
    #[arg(long = "target-max")]
    k_max: Option<f64>,

    /// Ideal coefficient (%)
    #[arg(long = "ideal")]
    ideal_k: Option<f64>,
}

#[derive(Parser, Debug)]
struct EstimateArgs {
    /// CSV files with `blocks,up,down` or `load_pct,up,down` columns
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Emit JSON instead of CSV
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Rated load (kg)
    #[arg(long)]
    rated_load: Option<f64>,

    /// Weight of one counterweight block (kg)
    #[arg(long)]
    block_weight: Option<f64>,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Parser, Debug)]
struct RecommendArgs {
    /// Current balance coefficient (%)
    #[arg(long)]
    k: f64,

    /// Rated load (kg)
    #[arg(long)]
    rated_load: Option<f64>,

    /// Weight of one counterweight block (kg)
    #[arg(long)]
    block_weight: Option<f64>,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Parser, Debug)]
struct TableArgs {
    /// Rated load (kg)
    #[arg(long)]
    rated_load: f64,

    /// Weight of one counterweight block (kg)
    #[arg(long)]
    block_weight: f64,

    /// Nominal load percentages (comma separated)
    #[arg(long)]
    percentages: Option<String>,
}

#[derive(Parser, Debug)]
struct OvertravelArgs {
    /// Shaft geometry JSON
    #[arg(value_hint = ValueHint::FilePath)]
    geometry: PathBuf,

    /// Horizontal distance (m) for the minimum pit vertical distance
    #[arg(long)]
    horizontal: Option<f32>,
}

/// Column positions of a readings file, decided from its header.
#[derive(Clone, Copy, Debug)]
enum Layout {
    Blocks { blocks: usize, up: usize, down: usize },
    LoadPct { load: usize, up: usize, down: usize },
}

#[derive(Debug, Serialize)]
struct InputSummary {
    file: String,
    estimator: &'static str,
    status: EstimateStatus,
    k_value: Option<f64>,
    has_actual_intersection: bool,
    r_squared: Option<f64>,
    samples: usize,
}

#[derive(Debug, Serialize)]
struct EstimateReport<'a> {
    settings_fingerprint: &'a str,
    settings: &'a BalanceSettings,
    results: &'a [InputSummary],
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Estimate(args) => handle_estimate(args),
        Command::Recommend(args) => handle_recommend(args),
        Command::Table(args) => handle_table(args),
        Command::Overtravel(args) => handle_overtravel(args),
        Command::Estimators => handle_estimators(),
    }
}

fn load_settings(args: &SettingsArgs) -> Result<BalanceSettings> {
    let mut settings = match args.settings.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            BalanceSettings::from_json(&text)
                .with_context(|| format!("invalid settings in {}", path.display()))?
        }
        None => BalanceSettings::default(),
    };

    if let Some(id) = args.estimator.as_deref() {
        settings.estimator =
            EstimatorKind::from_id(id).ok_or_else(|| anyhow!("unknown estimator '{}'", id))?;
    }
    if let Some(v) = args.k_min {
        settings.targets.k_min = v;
    }
    if let Some(v) = args.k_max {
        settings.targets.k_max = v;
    }
    if let Some(v) = args.ideal_k {
        settings.targets.ideal_k = v;
    }
    settings.targets.validate()?;
    Ok(settings)
}

fn handle_estimate(args: EstimateArgs) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let fingerprint = settings.fingerprint()?;
    debug!(
        "Estimator {} with settings {}",
        settings.estimator.id(),
        fingerprint
    );

    let t_compute = Instant::now();
    let summaries = args
        .inputs
        .par_iter()
        .map(|path| estimate_file(path, &settings, args.rated_load, args.block_weight))
        .collect::<Result<Vec<_>>>()?;
    info!(
        "Estimated {} input(s) in {:.1} ms",
        summaries.len(),
        t_compute.elapsed().as_secs_f64() * 1000.0
    );

    if let (Some(rated_load), Some(block_weight)) = (args.rated_load, args.block_weight) {
        for summary in &summaries {
            if summary.k_value.is_none() {
                continue;
            }
            match recommend(
                summary.k_value,
                Some(rated_load),
                Some(block_weight),
                &settings.targets,
            ) {
                Ok(report) => info!("{}:\n{}", summary.file, report),
                Err(err) => warn!("{}: {}", summary.file, err),
            }
        }
    }

    if args.json {
        let report = EstimateReport {
            settings_fingerprint: &fingerprint,
            settings: &settings,
            results: &summaries,
        };
        let text = serde_json::to_string_pretty(&report)?;
        write_text(&args.output, &text)
    } else if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_summary_rows(&summaries, &fingerprint, &mut writer)
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_summary_rows(&summaries, &fingerprint, &mut writer)?;
        info!("Wrote {}", args.output.display());
        Ok(())
    }
}

fn estimate_file(
    path: &Path,
    settings: &BalanceSettings,
    rated_load: Option<f64>,
    block_weight: Option<f64>,
) -> Result<InputSummary> {
    let (upward, downward) = read_samples(path, rated_load, block_weight)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if upward.len() < 2 {
        warn!(
            "{}: only {} complete reading(s), need at least 2",
            path.display(),
            upward.len()
        );
    }

    let result = settings.estimator.estimate(&upward, &downward);
    debug!("{}: {:?}", path.display(), result);
    Ok(InputSummary {
        file: path.display().to_string(),
        estimator: settings.estimator.id(),
        status: result.status(),
        k_value: result.k_value,
        has_actual_intersection: result.has_actual_intersection,
        r_squared: result.r_squared,
        samples: upward.len(),
    })
}

fn read_samples(
    path: &Path,
    rated_load: Option<f64>,
    block_weight: Option<f64>,
) -> Result<(Vec<CurrentSample>, Vec<CurrentSample>)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let layout = detect_layout(reader.headers()?)?;

    let mut readings = Vec::new();
    let mut upward = Vec::new();
    let mut downward = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let row = line + 2;
        match layout {
            Layout::Blocks { blocks, up, down } => readings.push(BlockReading {
                blocks: parse_cell(&record, blocks, path, row),
                upward_a: parse_cell(&record, up, path, row),
                downward_a: parse_cell(&record, down, path, row),
            }),
            Layout::LoadPct { load, up, down } => {
                let load_pct: Option<f64> = parse_cell(&record, load, path, row);
                let up_a: Option<f32> = parse_cell(&record, up, path, row);
                let down_a: Option<f32> = parse_cell(&record, down, path, row);
                if let (Some(load_pct), Some(up_a), Some(down_a)) = (load_pct, up_a, down_a) {
                    upward.push(CurrentSample::new(load_pct, up_a));
                    downward.push(CurrentSample::new(load_pct, down_a));
                }
            }
        }
    }

    if let Layout::Blocks { .. } = layout {
        let rated_load = rated_load
            .ok_or_else(|| anyhow!("block-count input requires --rated-load"))?;
        let block_weight = block_weight
            .ok_or_else(|| anyhow!("block-count input requires --block-weight"))?;
        return Ok(samples_from_blocks(rated_load, block_weight, &readings)?);
    }
    Ok((upward, downward))
}

fn detect_layout(headers: &csv::StringRecord) -> Result<Layout> {
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let up = find(&["up", "upward", "upward_a"]).ok_or_else(|| anyhow!("missing 'up' column"))?;
    let down = find(&["down", "downward", "downward_a"])
        .ok_or_else(|| anyhow!("missing 'down' column"))?;
    if let Some(blocks) = find(&["blocks"]) {
        return Ok(Layout::Blocks { blocks, up, down });
    }
    if let Some(load) = find(&["load_pct", "load"]) {
        return Ok(Layout::LoadPct { load, up, down });
    }
    Err(anyhow!("expected a 'blocks' or 'load_pct' column"))
}

fn parse_cell<T: std::str::FromStr>(
    record: &csv::StringRecord,
    index: usize,
    path: &Path,
    row: usize,
) -> Option<T> {
    let cell = record.get(index)?;
    if cell.is_empty() {
        return None;
    }
    match cell.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                "{}:{}: skipping unparsable value '{}'",
                path.display(),
                row,
                cell
            );
            None
        }
    }
}

fn write_summary_rows<W: Write>(
    summaries: &[InputSummary],
    fingerprint: &str,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "file",
        "estimator",
        "status",
        "k_pct",
        "actual_intersection",
        "r_squared",
        "samples",
        "settings",
    ])?;

    for summary in summaries {
        writer.write_record([
            summary.file.clone(),
            summary.estimator.to_string(),
            format!("{:?}", summary.status),
            summary
                .k_value
                .map(|v| format!("{:.3}", v))
                .unwrap_or_else(|| "".into()),
            summary.has_actual_intersection.to_string(),
            summary
                .r_squared
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "".into()),
            summary.samples.to_string(),
            fingerprint.chars().take(12).collect(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", text)?;
        return Ok(());
    }
    fs::write(path, format!("{}\n", text))
        .with_context(|| format!("failed to write {}", path.display()))
}

fn handle_recommend(args: RecommendArgs) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let report = recommend(
        Some(args.k),
        args.rated_load,
        args.block_weight,
        &settings.targets,
    )?;
    println!("{}", report);
    Ok(())
}

fn handle_table(args: TableArgs) -> Result<()> {
    let percentages = match args.percentages.as_deref() {
        Some(list) => parse_percentages(list)?,
        None => DEFAULT_TEST_PERCENTAGES.to_vec(),
    };
    let rows = load_table(args.rated_load, args.block_weight, &percentages)?;
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_percentages(input: &str) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: u32 = trimmed
            .parse()
            .with_context(|| format!("invalid percentage '{}'", trimmed))?;
        out.push(value);
    }
    if out.is_empty() {
        return Err(anyhow!("--percentages list was empty"));
    }
    Ok(out)
}

fn handle_overtravel(args: OvertravelArgs) -> Result<()> {
    let text = fs::read_to_string(&args.geometry)
        .with_context(|| format!("failed to read {}", args.geometry.display()))?;
    let geometry: ShaftGeometry = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid geometry JSON", args.geometry.display()))?;
    let result = max_overtravel(&geometry);
    if !result.complete {
        warn!("Geometry incomplete: {:?}", result.limit);
    }

    let mut value = serde_json::json!({ "overtravel": result });
    if let Some(horizontal) = args.horizontal {
        value["min_pit_vertical_distance"] =
            serde_json::json!(min_pit_vertical_distance(horizontal));
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn handle_estimators() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&list_estimators())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percentages() {
        assert_eq!(parse_percentages("30, 45,,60").unwrap(), vec![30, 45, 60]);
        assert!(parse_percentages("30,abc").is_err());
        assert!(parse_percentages(" , ").is_err());
    }

    #[test]
    fn test_detect_layout() {
        let headers = csv::StringRecord::from(vec!["Blocks", "up", "down"]);
        assert!(matches!(
            detect_layout(&headers).unwrap(),
            Layout::Blocks {
                blocks: 0,
                up: 1,
                down: 2
            }
        ));
        let headers = csv::StringRecord::from(vec!["down", "up", "load_pct"]);
        assert!(matches!(
            detect_layout(&headers).unwrap(),
            Layout::LoadPct {
                load: 2,
                up: 1,
                down: 0
            }
        ));
        let headers = csv::StringRecord::from(vec!["x", "up", "down"]);
        assert!(detect_layout(&headers).is_err());
    }
}
