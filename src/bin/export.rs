extern crate chrono;
extern crate clap;
extern crate failure;
extern crate graphmf;
#[macro_use]
extern crate tracing;

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;

use graphmf::artifact::ModelArtifact;
use graphmf::export::{ExportFormat, WebModel};
use graphmf::report::timestamp;

/// Export a trained model's item parameters as web-friendly JSON.
#[derive(Debug, Parser)]
#[command(name = "export")]
struct Args {
    /// Path to model.json written by `train`.
    #[arg(long, default_value = "models/graph_mf/model.json")]
    model: PathBuf,
    /// Output JSON path.
    #[arg(long, default_value = "data/model-mf-web.compact.json")]
    out: PathBuf,
    /// `compact` or `legacy`.
    #[arg(long, default_value_t = ExportFormat::Compact)]
    format: ExportFormat,
    /// Decimal places of exported floats.
    #[arg(long, default_value_t = 5, allow_hyphen_values = true)]
    round: i32,
}

fn main() -> Result<(), failure::Error> {
    graphmf::init_tracing();

    let args = Args::parse();
    let artifact = ModelArtifact::load(&args.model)?;

    let web = WebModel::from_artifact(
        &artifact,
        &args.model.display().to_string(),
        timestamp(Utc::now()),
        args.format,
        args.round,
    )?;
    let size = web.save(&args.out)?;

    info!(
        "Exported web model -> {} ({:.2} MB)",
        args.out.display(),
        size as f64 / (1024.0 * 1024.0)
    );

    Ok(())
}
