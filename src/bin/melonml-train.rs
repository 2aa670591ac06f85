//! Train, validate and version every model in the catalog.

use clap::Parser;
use tracing::info;

use melonml::cache::InMemoryCache;
use melonml::cli::{StorageArgs, TaskSelection, open_store};
use melonml::events::{LineSink, TeeSink, TracingSink};
use melonml::logging;
use melonml::training::{ModelOutcome, RunOptions, TaskOutcome, Trainer};

#[derive(Parser, Debug)]
#[command(name = "melonml-train")]
#[command(about = "Train detector and ripeness classifier models")]
#[command(version)]
struct Args {
    /// Which models to train.
    #[arg(long = "type", value_enum, default_value_t = TaskSelection::All)]
    task: TaskSelection,
    /// Evaluate every trained model on the test split.
    #[arg(long, default_value_t = false)]
    with_test: bool,
    /// Run k-fold cross-validation for every model.
    #[arg(long, default_value_t = false)]
    with_cv: bool,
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
    let cache = InMemoryCache::new();
    let sink = TeeSink {
        first: LineSink::stdout(),
        second: TracingSink,
    };
    info!(root = %config.storage.root.display(), "Training models");

    let trainer = Trainer::new(
        &store,
        &cache,
        &sink,
        config.layout.clone(),
        config.training.clone(),
    )
    .with_visibility(config.storage.visibility);
    let report = trainer.run(
        &args.task.tasks(),
        RunOptions {
            with_cv: args.with_cv,
            with_test: args.with_test,
        },
    );

    for outcome in &report.tasks {
        match outcome {
            TaskOutcome::Completed(task_report) => {
                for model in &task_report.models {
                    match model {
                        ModelOutcome::Trained {
                            model_key,
                            version,
                            training_accuracy,
                            validation,
                            ..
                        } => {
                            let validation = validation
                                .as_ref()
                                .map(|bundle| format!("{:.4}", bundle.metrics.accuracy))
                                .unwrap_or_else(|| "n/a".to_string());
                            println!(
                                "{model_key} v{version}: train={training_accuracy:.4} valid={validation}"
                            );
                        }
                        ModelOutcome::Failed { model_key, message } => {
                            println!("{model_key}: failed ({message})");
                        }
                    }
                }
            }
            TaskOutcome::Failed { task, error } => println!("{task}: failed ({error})"),
        }
    }
    Ok(report.any_succeeded())
}
