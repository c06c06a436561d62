extern crate clap;
extern crate failure;
extern crate graphmf;
extern crate serde_json;

use std::path::PathBuf;

use clap::Parser;

use graphmf::artifact::ModelArtifact;
use graphmf::recommend::{parse_watched, recommend, Options, Query};

/// Recommend items from a trained graph MF model, for a known user or
/// for an ad-hoc list of watched items.
#[derive(Debug, Parser)]
#[command(name = "recommend")]
struct Args {
    /// Path to model.json written by `train`.
    #[arg(long, default_value = "models/graph_mf/model.json")]
    model: PathBuf,
    /// Known user id from the training data.
    #[arg(long, default_value = "")]
    user_id: String,
    /// Comma-separated item ids, optionally weighted: `1535,9253:1.5`.
    #[arg(long, default_value = "")]
    watched: String,
    #[arg(long, default_value_t = 15)]
    top_n: usize,
    /// Number of watched items shown as the reason for each pick.
    #[arg(long, default_value_t = 3)]
    explain_top: usize,
    /// Drop recommendations scoring below this.
    #[arg(long, default_value_t = f32::NEG_INFINITY, allow_hyphen_values = true)]
    min_score: f32,
    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), failure::Error> {
    graphmf::init_tracing();

    let args = Args::parse();
    let watched = parse_watched(&args.watched)?;
    let query = Query::from_request(&args.user_id, &watched)?;

    let artifact = ModelArtifact::load(&args.model)?;
    let options = Options {
        top_n: args.top_n,
        explain_top: args.explain_top,
        min_score: args.min_score,
    };
    let recommendations = recommend(&artifact, &query, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&recommendations)?);
    } else {
        print!("{}", recommendations.to_plain_text());
    }

    Ok(())
}
