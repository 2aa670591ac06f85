//! Build or extend the detector/classifier feature files from annotations.

use clap::Parser;
use tracing::{info, warn};

use melonml::cli::{SplitSelection, StorageArgs, TaskSelection, open_store};
use melonml::dataset::builder::{BuildMode, FeatureCorpusBuilder, SplitOutcome};
use melonml::dataset::extractor::ColorTextureExtractor;
use melonml::events::{LineSink, TeeSink, TracingSink};
use melonml::logging;

#[derive(Parser, Debug)]
#[command(name = "melonml-extract-features")]
#[command(about = "Extract detector and classifier features from annotated images")]
#[command(version)]
struct Args {
    /// Which feature files to build.
    #[arg(long = "type", value_enum, default_value_t = TaskSelection::All)]
    task: TaskSelection,
    /// Which dataset splits to process.
    #[arg(long = "set", value_enum, default_value_t = SplitSelection::All)]
    split: SplitSelection,
    /// Keep existing rows and only add new identifiers.
    #[arg(long, default_value_t = false)]
    incremental: bool,
    #[command(flatten)]
    storage: StorageArgs,
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, String> {
    let args = Args::parse();
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let config = args.storage.load_config().map_err(|err| err.to_string())?;
    let store = open_store(&config);
    let extractor = ColorTextureExtractor::default();
    let sink = TeeSink {
        first: LineSink::stdout(),
        second: TracingSink,
    };
    let mode = if args.incremental {
        BuildMode::Incremental
    } else {
        BuildMode::Full
    };
    info!(root = %config.storage.root.display(), ?mode, "Extracting features");

    let builder = FeatureCorpusBuilder::new(&store, &extractor, &sink, config.layout.clone())
        .with_visibility(config.storage.visibility);
    let tasks = args.task.tasks();
    let report = builder
        .run(&args.split.splits(), &tasks, mode)
        .map_err(|err| err.to_string())?;

    for outcome in &report.splits {
        match outcome {
            SplitOutcome::Completed { split, report } => {
                for &task in &tasks {
                    let totals = report.totals(task);
                    println!(
                        "{split} {task}: written={} skipped={} errors={}",
                        totals.written, totals.skipped, totals.errors
                    );
                }
            }
            SplitOutcome::Failed { split, error } => {
                warn!(split = %split, "Split failed: {error}");
                println!("{split}: failed ({error})");
            }
        }
    }
    Ok(report.any_succeeded())
}
